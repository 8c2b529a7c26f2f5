//! Per-label detection statistics.
//!
//! The aggregator reconciles each inbound [`DetectionFrame`] against prior
//! state and produces a per-label `{current, max}` snapshot. The mapping is
//! replaced wholesale on every frame, so a consumer reading a snapshot never
//! observes a partially-updated table.
//!
//! Counting uses two sources that can diverge: the server's authoritative
//! `all_counts` (which may reflect tracking/dedup the raw box list lacks) and
//! a local recount of the raw `detections`. The higher of the two wins:
//! under-counting by either source is more likely than over-counting, since
//! every box corresponds to a real event reported by at least one source.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::wire::DetectionFrame;
use crate::{matches_target, Mode};

/// Running statistics for one label.
///
/// `max` never decreases while the label exists; only a reset can lower it,
/// by removing the entry entirely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LabelStat {
    pub current: u32,
    pub max: u32,
}

/// The statistics table, keyed by label name.
///
/// Owned exclusively by the aggregation side of the session; everything else
/// reads cloned snapshots. The key set always equals the union of labels
/// observed since the last reset: a label seen once is never silently
/// dropped, only its `current` falls back to 0 between frames.
#[derive(Debug, Default)]
pub struct StatsBoard {
    counts: BTreeMap<String, LabelStat>,
}

impl StatsBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile one inbound frame under the given mode/target filter.
    ///
    /// 1. Carry forward every known label as `{current: 0, max: prev_max}`,
    ///    so a frame that detects nothing for a label keeps its history.
    /// 2. Recount the raw `detections` per label.
    /// 3. Union the recount labels with the server-count labels.
    /// 4. In `Single` mode, labels other than the target receive no update
    ///    this frame (they keep the carried-forward entry).
    /// 5. `current = max(server_count, local_recount)`.
    /// 6. Commit `{current, max: max(current, carried_max)}`.
    ///
    /// The new mapping replaces the old one atomically.
    pub fn apply(&mut self, frame: &DetectionFrame, mode: Mode, target: &str) {
        let mut next: BTreeMap<String, LabelStat> = self
            .counts
            .iter()
            .map(|(label, stat)| {
                (
                    label.clone(),
                    LabelStat {
                        current: 0,
                        max: stat.max,
                    },
                )
            })
            .collect();

        // Frontend sanity count, independent of the server totals.
        let mut recount: BTreeMap<&str, u32> = BTreeMap::new();
        for det in &frame.detections {
            *recount.entry(det.label.as_str()).or_insert(0) += 1;
        }

        let labels: std::collections::BTreeSet<&str> = frame
            .all_counts
            .keys()
            .map(String::as_str)
            .chain(recount.keys().copied())
            .collect();

        for label in labels {
            if mode == Mode::Single && !matches_target(label, target) {
                continue;
            }

            let server = frame.all_counts.get(label).copied().unwrap_or(0);
            let local = recount.get(label).copied().unwrap_or(0);
            let current = server.max(local);

            let carried_max = next.get(label).map(|stat| stat.max).unwrap_or(0);
            next.insert(
                label.to_string(),
                LabelStat {
                    current,
                    max: current.max(carried_max),
                },
            );
        }

        self.counts = next;
    }

    /// Clear the table. The only operation that can lower a label's max.
    pub fn reset(&mut self) {
        self.counts.clear();
    }

    /// Complete, consistent copy of the current table.
    pub fn snapshot(&self) -> BTreeMap<String, LabelStat> {
        self.counts.clone()
    }

    pub fn get(&self, label: &str) -> Option<LabelStat> {
        self.counts.get(label).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }
}
