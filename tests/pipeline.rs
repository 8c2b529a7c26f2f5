//! Pipeline integration: sampler, session and stats wired together against
//! in-process fakes, no broker and no backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use vision_dash::channel::FrameSink;
use vision_dash::sampler::{sample_once, SharedSource};
use vision_dash::session::SessionController;
use vision_dash::source::{FrameDirSource, PlaybackState, SyntheticSource, VideoSource};
use vision_dash::wire::{DetectionBox, DetectionFrame, FramePayload};
use vision_dash::{Mode, ViewConfig, ViewHandle};

struct RecordingSink {
    open: AtomicBool,
    sent: Mutex<Vec<FramePayload>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn last_target(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|p| p.target.clone())
    }
}

impl FrameSink for RecordingSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_frame(&self, payload: &FramePayload) {
        self.sent.lock().unwrap().push(FramePayload {
            image: payload.image.clone(),
            target: payload.target.clone(),
        });
    }
}

fn detection_frame(label: &str, count: u32) -> DetectionFrame {
    DetectionFrame {
        detections: (0..count)
            .map(|i| DetectionBox {
                label: label.to_string(),
                conf: 0.9,
                bbox: [8.0 + i as f32, 8.0, 32.0, 32.0],
            })
            .collect(),
        all_counts: BTreeMap::from([(label.to_string(), count)]),
    }
}

fn start(
    interval_ms: u64,
) -> (
    SessionController,
    Arc<RecordingSink>,
    mpsc::Sender<DetectionFrame>,
) {
    let sink = Arc::new(RecordingSink::new());
    let (tx, rx) = mpsc::channel();
    let view = ViewHandle::new(ViewConfig {
        sample_interval_ms: interval_ms,
        ..ViewConfig::default()
    })
    .unwrap();
    let session = SessionController::start(
        view,
        Box::new(SyntheticSource::new(64, 48)),
        Arc::clone(&sink) as Arc<dyn FrameSink>,
        rx,
        (32, 24),
    );
    (session, sink, tx)
}

fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached within 2s");
}

#[test]
fn sampled_frames_reach_the_sink_with_the_live_target() {
    let (mut session, sink, _tx) = start(50);

    wait_for(|| sink.count() >= 2);
    assert_eq!(sink.last_target().as_deref(), Some("person"));

    session.set_target("car").unwrap();
    let before = sink.count();
    wait_for(|| sink.count() > before && sink.last_target().as_deref() == Some("car"));

    session.shutdown();
}

#[test]
fn interval_change_rearms_a_single_timer() {
    let (mut session, sink, _tx) = start(50);
    wait_for(|| sink.count() >= 2);

    session.set_sample_interval_ms(1000).unwrap();
    // First tick of the new timer fires immediately; after that the old
    // cadence must be gone.
    std::thread::sleep(Duration::from_millis(100));
    let settled = sink.count();
    std::thread::sleep(Duration::from_millis(400));
    let grown = sink.count() - settled;
    assert!(grown <= 1, "old timer still ticking: {} extra frames", grown);

    session.shutdown();
}

#[test]
fn detections_update_stats_and_paint_the_overlay() {
    let (session, _sink, tx) = start(200);

    tx.send(detection_frame("person", 2)).unwrap();
    wait_for(|| session.stats_snapshot().get("person").map(|s| s.current) == Some(2));

    let stat = session.stats_snapshot()["person"];
    assert_eq!(stat.max, 2);
    let painted = session.with_overlay(|s| s.pixels().pixels().any(|p| p.0[3] != 0));
    assert!(painted, "overlay stayed blank after a detection frame");

    session.shutdown();
}

#[test]
fn empty_detection_frame_clears_the_overlay_but_keeps_max() {
    let (session, _sink, tx) = start(200);

    tx.send(detection_frame("person", 3)).unwrap();
    wait_for(|| session.stats_snapshot().get("person").map(|s| s.current) == Some(3));

    tx.send(DetectionFrame::default()).unwrap();
    wait_for(|| session.stats_snapshot().get("person").map(|s| s.current) == Some(0));

    assert_eq!(session.stats_snapshot()["person"].max, 3);
    let painted = session.with_overlay(|s| s.pixels().pixels().any(|p| p.0[3] != 0));
    assert!(!painted, "overlay must be cleared when nothing is detected");

    session.shutdown();
}

#[test]
fn selecting_a_new_video_resets_stats_and_keeps_sampling() {
    let (mut session, sink, tx) = start(50);

    tx.send(detection_frame("car", 1)).unwrap();
    wait_for(|| !session.stats_snapshot().is_empty());

    session.select_video(Box::new(SyntheticSource::new(32, 32)));
    assert!(session.stats_snapshot().is_empty());

    let before = sink.count();
    wait_for(|| sink.count() > before);

    session.shutdown();
}

#[test]
fn frame_directory_source_streams_through_the_sampler() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        let img = image::RgbImage::from_pixel(20, 10, image::Rgb([10, 20, 30]));
        img.save(dir.path().join(name)).unwrap();
    }

    let mut source = FrameDirSource::open(dir.path()).unwrap();
    source.play();
    let source: SharedSource = Arc::new(Mutex::new(Box::new(source)));
    let sink = RecordingSink::new();
    let view = ViewHandle::new(ViewConfig::default()).unwrap();

    for _ in 0..10 {
        sample_once(&source, &sink, &view);
    }

    // Every still reaches the sink exactly once, then playback ends and
    // further ticks send nothing.
    assert_eq!(sink.count(), 3);
    assert_eq!(source.lock().unwrap().state(), PlaybackState::Ended);
    assert!(!sample_once(&source, &sink, &view));
    assert_eq!(sink.count(), 3);
}

#[test]
fn single_mode_session_counts_only_the_target() {
    let (mut session, _sink, tx) = start(200);
    session.set_target("cat").unwrap();
    session.set_mode(Mode::Single);

    tx.send(detection_frame("dog", 5)).unwrap();
    tx.send(detection_frame("cat", 1)).unwrap();
    wait_for(|| session.stats_snapshot().get("cat").is_some());

    assert!(session.stats_snapshot().get("dog").is_none());

    session.shutdown();
}
