//! Session controller: page/mode/target state and component wiring.
//!
//! The controller owns the live view config, the shared video source, the
//! stats board and the overlay surface, and runs two callbacks against them:
//! the sampler timer (outbound) and the inbound consumer, which fans each
//! detection frame out to the aggregator and the renderer. Both read
//! mode/target through the [`ViewHandle`] at invocation time.
//!
//! Reset semantics: the stats board is cleared on mode change, target
//! change, page change, video selection and explicit user reset. These are
//! the only operations that can lower a label's recorded max.

use log::info;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;

use crate::channel::FrameSink;
use crate::overlay::{OverlayRenderer, RgbaSurface};
use crate::sampler::{FrameSampler, SamplerHandle, SharedSource};
use crate::source::VideoSource;
use crate::stats::{LabelStat, StatsBoard};
use crate::wire::DetectionFrame;
use crate::{Mode, ViewHandle};

/// Dashboard page. Only the detection pages drive the pipeline; Profile is
/// plain API glue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Page {
    Upload,
    Live,
    Profile,
}

pub struct SessionController {
    view: ViewHandle,
    page: Page,
    stats: Arc<Mutex<StatsBoard>>,
    source: SharedSource,
    sink: Arc<dyn FrameSink>,
    display_size: Arc<RwLock<(u32, u32)>>,
    surface: Arc<Mutex<RgbaSurface>>,
    sampler: Option<SamplerHandle>,
    consumer_shutdown: Arc<AtomicBool>,
    consumer: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Wire the pipeline: arm the sampler and spawn the inbound consumer
    /// reading detection frames from `frames`.
    pub fn start(
        view: ViewHandle,
        source: Box<dyn VideoSource>,
        sink: Arc<dyn FrameSink>,
        frames: Receiver<DetectionFrame>,
        display_size: (u32, u32),
    ) -> Self {
        let source: SharedSource = Arc::new(Mutex::new(source));
        let stats = Arc::new(Mutex::new(StatsBoard::new()));
        let display = Arc::new(RwLock::new(display_size));
        let surface = Arc::new(Mutex::new(RgbaSurface::new(display_size.0, display_size.1)));

        let consumer_shutdown = Arc::new(AtomicBool::new(false));
        let consumer = spawn_consumer(
            frames,
            Arc::clone(&stats),
            view.clone(),
            Arc::clone(&source),
            Arc::clone(&display),
            Arc::clone(&surface),
            Arc::clone(&consumer_shutdown),
        );

        let sampler = FrameSampler::start(Arc::clone(&source), Arc::clone(&sink), view.clone());

        Self {
            view,
            page: Page::Upload,
            stats,
            source,
            sink,
            display_size: display,
            surface,
            sampler: Some(sampler),
            consumer_shutdown,
            consumer: Some(consumer),
        }
    }

    pub fn view(&self) -> &ViewHandle {
        &self.view
    }

    pub fn page(&self) -> Page {
        self.page
    }

    // -------------------- State changes (all reset stats) --------------------

    pub fn set_mode(&mut self, mode: Mode) {
        self.view.set_mode(mode);
        self.reset_stats();
    }

    pub fn set_target(&mut self, target: &str) -> Result<()> {
        self.view.set_target(target)?;
        self.reset_stats();
        Ok(())
    }

    pub fn set_page(&mut self, page: Page) {
        if self.page != page {
            info!("page change: {:?} -> {:?}", self.page, page);
            self.page = page;
            self.reset_stats();
        }
    }

    /// Swap in a newly selected video. The sampler picks the new source up
    /// on its next tick through the shared cell.
    pub fn select_video(&mut self, source: Box<dyn VideoSource>) {
        *self.source.lock().expect("video source lock poisoned") = source;
        self.page = Page::Upload;
        self.reset_stats();
    }

    /// Change the sampling period and re-arm the timer: the previous timer
    /// is disarmed before the new one starts, so exactly one runs per view.
    pub fn set_sample_interval_ms(&mut self, interval_ms: u64) -> Result<()> {
        self.view.set_sample_interval_ms(interval_ms)?;
        if let Some(old) = self.sampler.take() {
            old.stop();
        }
        self.sampler = Some(FrameSampler::start(
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            self.view.clone(),
        ));
        Ok(())
    }

    /// Explicit user reset.
    pub fn reset_stats(&mut self) {
        self.stats.lock().expect("stats lock poisoned").reset();
    }

    // -------------------- Playback / layout --------------------

    pub fn play(&mut self) {
        self.source.lock().expect("video source lock poisoned").play();
    }

    pub fn pause(&mut self) {
        self.source
            .lock()
            .expect("video source lock poisoned")
            .pause();
    }

    /// Report a new on-screen size for the video element. The renderer
    /// resizes the overlay surface on the next frame.
    pub fn set_display_size(&mut self, width: u32, height: u32) {
        *self.display_size.write().expect("display size lock poisoned") = (width, height);
    }

    // -------------------- Read side --------------------

    /// Complete, consistent copy of the stats table for the dashboard.
    pub fn stats_snapshot(&self) -> BTreeMap<String, LabelStat> {
        self.stats
            .lock()
            .expect("stats lock poisoned")
            .snapshot()
    }

    pub fn sampler_frames_sent(&self) -> u64 {
        self.sampler
            .as_ref()
            .map(|s| s.frames_sent())
            .unwrap_or(0)
    }

    /// Read access to the overlay pixels (for embedding or inspection).
    pub fn with_overlay<R>(&self, f: impl FnOnce(&RgbaSurface) -> R) -> R {
        f(&self.surface.lock().expect("overlay surface lock poisoned"))
    }

    /// Tear the view down: disarm the sampler and stop the consumer.
    pub fn shutdown(mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
        self.consumer_shutdown.store(true, Ordering::SeqCst);
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
        info!("session torn down");
    }
}

/// Inbound fan-out: one thread drives both the aggregator and the renderer
/// from the same message, reading mode/target live on every frame.
#[allow(clippy::too_many_arguments)]
fn spawn_consumer(
    frames: Receiver<DetectionFrame>,
    stats: Arc<Mutex<StatsBoard>>,
    view: ViewHandle,
    source: SharedSource,
    display_size: Arc<RwLock<(u32, u32)>>,
    surface: Arc<Mutex<RgbaSurface>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let renderer = OverlayRenderer::default();
    std::thread::spawn(move || loop {
        let frame = match frames.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        // Config is read here, at invocation time, never captured at
        // registration time.
        let cfg = view.snapshot();

        stats
            .lock()
            .expect("stats lock poisoned")
            .apply(&frame, cfg.mode, &cfg.target);

        let native = source
            .lock()
            .expect("video source lock poisoned")
            .native_size()
            .unwrap_or((0, 0));
        let display = *display_size.read().expect("display size lock poisoned");
        renderer.render(
            &mut *surface.lock().expect("overlay surface lock poisoned"),
            &frame.detections,
            native,
            display,
            cfg.mode,
            &cfg.target,
        );
    })
}
