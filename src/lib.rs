//! Live object-detection dashboard pipeline.
//!
//! This crate implements the real-time core of a detection dashboard:
//!
//! 1. A **frame sampler** captures stills from a live or file-backed video
//!    source at a configurable interval and ships them to a remote detector.
//! 2. A **transport channel** carries outbound frame payloads and inbound
//!    per-frame detection results over one persistent connection.
//! 3. An **aggregator** reconciles each result against prior per-label
//!    statistics (`current` count, historical `max`).
//! 4. An **overlay renderer** projects detector-space bounding boxes into the
//!    video's on-screen display coordinates.
//!
//! Everything else the dashboard does (auth, history CRUD, upload, label-set
//! fetch) is plain request/response glue against the remote API and lives in
//! [`api`].
//!
//! # Module Structure
//!
//! - `wire`: channel and HTTP message shapes, tolerant of missing fields
//! - `source`: video sources producing raw frames
//! - `sampler`: the capture/encode/send timer
//! - `channel`: the persistent detector connection
//! - `stats`: per-label statistics aggregation
//! - `overlay`: coordinate transform and box/label drawing
//! - `session`: wiring, page/mode/target state, reset semantics
//! - `config`: daemon configuration (JSON file plus env overrides)

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

pub mod api;
pub mod channel;
pub mod config;
pub mod overlay;
pub mod sampler;
pub mod session;
pub mod source;
pub mod stats;
pub mod wire;

pub use channel::{DetectorChannel, FrameSink, ReconnectPolicy};
pub use overlay::{DrawSurface, OverlayRenderer, RgbaSurface};
pub use sampler::{FrameSampler, SamplerHandle};
pub use session::{Page, SessionController};
pub use source::{FrameDirSource, PlaybackState, SyntheticSource, VideoSource};
pub use stats::{LabelStat, StatsBoard};
pub use wire::{DetectionBox, DetectionFrame};

// -------------------- View configuration --------------------

/// Sampling interval bounds in milliseconds.
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 50;
pub const MAX_SAMPLE_INTERVAL_MS: u64 = 1000;

/// Aggregation/filter mode: show every label, or a single chosen target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    All,
    Single,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "table" => Ok(Mode::All),
            "single" => Ok(Mode::Single),
            other => Err(anyhow!("unknown mode '{}', expected all|single", other)),
        }
    }
}

/// Mutable view settings read by the sampler, aggregator and renderer on
/// every frame. Always consulted through a [`ViewHandle`] at evaluation
/// time, never captured by value when a handler is registered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewConfig {
    pub mode: Mode,
    pub target: String,
    pub sample_interval_ms: u64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            mode: Mode::All,
            target: "person".to_string(),
            sample_interval_ms: 200,
        }
    }
}

impl ViewConfig {
    pub fn validate(&self) -> Result<()> {
        validate_sample_interval(self.sample_interval_ms)?;
        if self.target.trim().is_empty() {
            return Err(anyhow!("target label must not be empty"));
        }
        Ok(())
    }
}

pub fn validate_sample_interval(interval_ms: u64) -> Result<()> {
    if !(MIN_SAMPLE_INTERVAL_MS..=MAX_SAMPLE_INTERVAL_MS).contains(&interval_ms) {
        return Err(anyhow!(
            "sample interval must be within [{}, {}] ms, got {}",
            MIN_SAMPLE_INTERVAL_MS,
            MAX_SAMPLE_INTERVAL_MS,
            interval_ms
        ));
    }
    Ok(())
}

/// Case-insensitive target match shared by the aggregator and the renderer.
/// The two MUST filter identically or the stats table and the drawn boxes
/// visibly disagree.
pub fn matches_target(label: &str, target: &str) -> bool {
    label.to_lowercase() == target.to_lowercase()
}

/// Shared live handle to the view configuration.
///
/// Handlers registered once at connection-open time (the channel consumer,
/// the sampler tick) read mode/target/interval through this handle at
/// invocation time, so a change made after registration is never ignored.
#[derive(Clone, Debug)]
pub struct ViewHandle {
    inner: Arc<RwLock<ViewConfig>>,
}

impl ViewHandle {
    pub fn new(config: ViewConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    pub fn snapshot(&self) -> ViewConfig {
        self.inner.read().expect("view config lock poisoned").clone()
    }

    pub fn mode(&self) -> Mode {
        self.inner.read().expect("view config lock poisoned").mode
    }

    pub fn target(&self) -> String {
        self.inner
            .read()
            .expect("view config lock poisoned")
            .target
            .clone()
    }

    pub fn sample_interval_ms(&self) -> u64 {
        self.inner
            .read()
            .expect("view config lock poisoned")
            .sample_interval_ms
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner.write().expect("view config lock poisoned").mode = mode;
    }

    pub fn set_target(&self, target: &str) -> Result<()> {
        if target.trim().is_empty() {
            return Err(anyhow!("target label must not be empty"));
        }
        self.inner.write().expect("view config lock poisoned").target = target.to_string();
        Ok(())
    }

    pub fn set_sample_interval_ms(&self, interval_ms: u64) -> Result<()> {
        validate_sample_interval(interval_ms)?;
        self.inner
            .write()
            .expect("view config lock poisoned")
            .sample_interval_ms = interval_ms;
        Ok(())
    }
}
