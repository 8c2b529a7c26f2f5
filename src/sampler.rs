//! Frame sampler: the capture/encode/send timer.
//!
//! On each tick the sampler captures the current frame of the video source,
//! encodes it as a JPEG (quality traded for latency), wraps it in a base64
//! data URI and hands it to the transport tagged with the live target label.
//!
//! A tick is skipped silently when the channel is not open, the source has
//! no decoded dimensions, or playback is paused/ended/loading. A capture
//! error also drops the tick: no frame is more important than pipeline
//! liveness. Skipped ticks are never retried or queued.

use anyhow::Result;
use base64::{prelude::BASE64_STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::FrameSink;
use crate::source::{Frame, PlaybackState, VideoSource};
use crate::wire::FramePayload;
use crate::ViewHandle;

/// Latency over fidelity: roughly half-quality JPEG.
pub const JPEG_QUALITY: u8 = 50;

/// Shared, replaceable video source. The session controller swaps the boxed
/// source when a new video is selected; the sampler locks it per tick.
pub type SharedSource = Arc<Mutex<Box<dyn VideoSource>>>;

/// Encode one captured frame as a `data:image/jpeg;base64,...` URI.
pub fn encode_data_uri(frame: &Frame) -> Result<String> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder.encode(
        &frame.rgb,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        BASE64_STANDARD.encode(&jpeg)
    ))
}

/// One sampler tick. Returns true when a frame was actually sent.
///
/// Standalone so tests (and one-shot tools) can drive a tick without the
/// timer thread.
pub fn sample_once(source: &SharedSource, sink: &dyn FrameSink, view: &ViewHandle) -> bool {
    if !sink.is_open() {
        return false;
    }

    let mut source = source.lock().expect("video source lock poisoned");
    if source.state() != PlaybackState::Playing {
        return false;
    }
    match source.native_size() {
        Some((w, _)) if w > 0 => {}
        _ => return false,
    }

    let frame = match source.capture() {
        Ok(frame) => frame,
        Err(e) => {
            // Transient decode state; drop the tick.
            debug!("capture failed, dropping tick: {}", e);
            return false;
        }
    };
    drop(source);

    let image = match encode_data_uri(&frame) {
        Ok(uri) => uri,
        Err(e) => {
            debug!("frame encode failed, dropping tick: {}", e);
            return false;
        }
    };

    sink.send_frame(&FramePayload {
        image,
        target: view.target(),
    });
    true
}

/// Running timer for one view. Exactly one exists per active view; the
/// session controller stops the old handle before arming a new one.
pub struct FrameSampler;

impl FrameSampler {
    /// Arm the repeating timer. The period is re-read from the live view
    /// config on every tick.
    pub fn start(source: SharedSource, sink: Arc<dyn FrameSink>, view: ViewHandle) -> SamplerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let frames_sent = Arc::new(AtomicU64::new(0));

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_sent = Arc::clone(&frames_sent);
        let join = std::thread::spawn(move || {
            info!(
                "sampler armed at {} ms",
                view.sample_interval_ms()
            );
            while !thread_shutdown.load(Ordering::SeqCst) {
                let started = Instant::now();
                if sample_once(&source, sink.as_ref(), &view) {
                    thread_sent.fetch_add(1, Ordering::SeqCst);
                }

                let period = Duration::from_millis(view.sample_interval_ms());
                // Sleep in short slices so stop() stays responsive.
                while started.elapsed() < period {
                    if thread_shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        });

        SamplerHandle {
            shutdown,
            frames_sent,
            join: Some(join),
        }
    }
}

/// Handle to a running sampler timer.
pub struct SamplerHandle {
    shutdown: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    /// Disarm the timer and wait for the tick thread to exit. Always called
    /// before arming a replacement, so two timers never run for one view.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticSource;
    use anyhow::anyhow;

    struct RecordingSink {
        open: AtomicBool,
        sent: Mutex<Vec<FramePayload>>,
    }

    impl RecordingSink {
        fn new(open: bool) -> Self {
            Self {
                open: AtomicBool::new(open),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<FramePayload> {
            std::mem::take(&mut self.sent.lock().unwrap())
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

    struct FailingSource;

    impl VideoSource for FailingSource {
        fn native_size(&self) -> Option<(u32, u32)> {
            Some((640, 480))
        }
        fn state(&self) -> PlaybackState {
            PlaybackState::Playing
        }
        fn capture(&mut self) -> Result<Frame> {
            Err(anyhow!("decoder not ready"))
        }
        fn play(&mut self) {}
        fn pause(&mut self) {}
    }

    fn shared(source: impl VideoSource + 'static) -> SharedSource {
        Arc::new(Mutex::new(Box::new(source)))
    }

    fn view() -> ViewHandle {
        ViewHandle::new(crate::ViewConfig::default()).unwrap()
    }

    #[test]
    fn tick_sends_data_uri_with_live_target() {
        let source = shared(SyntheticSource::new(16, 16));
        let sink = RecordingSink::new(true);
        let view = view();

        assert!(sample_once(&source, &sink, &view));
        view.set_target("dog").unwrap();
        assert!(sample_once(&source, &sink, &view));

        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].image.starts_with("data:image/jpeg;base64,"));
        assert_eq!(sent[0].target, "person");
        // Target changed after the first tick; the second reads it live.
        assert_eq!(sent[1].target, "dog");
    }

    #[test]
    fn tick_while_paused_sends_nothing() {
        let mut inner = SyntheticSource::new(16, 16);
        inner.pause();
        let source = shared(inner);
        let sink = RecordingSink::new(true);

        assert!(!sample_once(&source, &sink, &view()));
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn tick_with_closed_channel_sends_nothing() {
        let source = shared(SyntheticSource::new(16, 16));
        let sink = RecordingSink::new(false);

        assert!(!sample_once(&source, &sink, &view()));
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn capture_error_drops_the_tick() {
        let source = shared(FailingSource);
        let sink = RecordingSink::new(true);

        assert!(!sample_once(&source, &sink, &view()));
        assert!(sink.sent().is_empty());

        // Pipeline stays live: a later good tick still goes through.
        let source = shared(SyntheticSource::new(8, 8));
        assert!(sample_once(&source, &sink, &view()));
    }

    #[test]
    fn timer_ticks_repeatedly_and_stops_cleanly() {
        let source = shared(SyntheticSource::new(8, 8));
        let sink = Arc::new(RecordingSink::new(true));
        let view = ViewHandle::new(crate::ViewConfig {
            sample_interval_ms: 50,
            ..crate::ViewConfig::default()
        })
        .unwrap();

        let handle = FrameSampler::start(source, sink.clone(), view);
        std::thread::sleep(Duration::from_millis(180));
        handle.stop();

        let sent = sink.sent().len();
        assert!(sent >= 2, "expected repeated ticks, got {}", sent);
    }
}
