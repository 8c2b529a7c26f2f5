//! Detector service wire contract.
//!
//! This module defines the message shapes exchanged with the remote detector
//! and the dashboard HTTP API. These shapes are a compatibility contract:
//! parsing tolerates extra unknown fields, and an inbound result with a
//! missing `detections` or `all_counts` section is treated as empty, never
//! as an error.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outbound channel message: one compressed still frame plus the current
/// target label, as a base64 data URI.
#[derive(Debug, Serialize, Deserialize)]
pub struct FramePayload {
    /// `data:image/jpeg;base64,...` encoded still frame.
    pub image: String,
    /// Target label the dashboard currently tracks.
    pub target: String,
}

/// One detected object within a frame, in detector-space pixel coordinates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionBox {
    pub label: String,
    /// Detection confidence in [0, 1].
    pub conf: f32,
    /// `[x1, y1, x2, y2]` with x1 < x2 and y1 < y2.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

/// Full payload of one inbound detection message.
///
/// `all_counts` holds the server's authoritative per-label totals. They may
/// disagree with a local recount of `detections`; the aggregator reconciles
/// the two.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetectionFrame {
    #[serde(default)]
    pub detections: Vec<DetectionBox>,
    #[serde(default)]
    pub all_counts: BTreeMap<String, u32>,
}

/// Parse an inbound detection message.
///
/// Returns an error only for malformed JSON. Absent sections default to
/// empty so a partially-filled message still drives the pipeline.
pub fn parse_detection_frame(payload: &[u8]) -> Result<DetectionFrame> {
    serde_json::from_slice(payload).map_err(|e| anyhow!("detection frame parse error: {}", e))
}

// -------------------- Dashboard HTTP shapes --------------------

/// Response of the label-set fetch. An empty list is a valid state
/// (interpreted as "not yet loaded"), not an error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LabelSetResponse {
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One uploaded-video history record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
}
