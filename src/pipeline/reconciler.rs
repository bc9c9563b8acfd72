//! Timeline reconciliation.
//!
//! Decoded samples arrive in recording order but not necessarily on a clean
//! timeline: devices duplicate instants across record boundaries, clock
//! adjustments step timestamps backwards, and a recording left running in a
//! pocket can contain multi-hour gaps. The reconciler folds duplicates and
//! regressions into their predecessor and, when configured, collapses
//! exceeded slices so the output timeline is strictly increasing.
//!
//! Every collapse is remembered as a [`TimeShift`] breakpoint so streams
//! decoded alongside the samples (GPS fixes, lap boundaries, gear and timer
//! events) can be moved onto the same reconciled timeline.

use tracing::debug;

use crate::config::ImportConfig;
use crate::types::{Marker, Sample};

/// Length of the slice a collapsed gap is replaced with.
const COLLAPSED_SLICE_MS: i64 = 1_000;

/// Piecewise time adjustment recorded while collapsing exceeded slices.
///
/// Breakpoints are `(raw_device_time, cumulative_shift_ms)` pairs in
/// ascending raw-time order. A raw timestamp is adjusted by the shift of the
/// last breakpoint at or below it.
#[derive(Debug, Clone, Default)]
pub struct TimeShift {
    breakpoints: Vec<(i64, i64)>,
}

impl TimeShift {
    /// Map a raw device timestamp onto the reconciled timeline.
    pub fn adjust(&self, raw_time: i64) -> i64 {
        let shift = self
            .breakpoints
            .iter()
            .rev()
            .find(|&&(threshold, _)| raw_time >= threshold)
            .map_or(0, |&(_, shift)| shift);
        raw_time - shift
    }

    /// True when no gap was collapsed and timestamps pass through unchanged.
    pub fn is_identity(&self) -> bool {
        self.breakpoints.is_empty()
    }

    fn push(&mut self, raw_time: i64, cumulative_shift: i64) {
        self.breakpoints.push((raw_time, cumulative_shift));
    }
}

/// Output of [`reconcile`]: the cleaned samples, any synthetic markers that
/// stand in for collapsed gaps, and the shift to apply to secondary streams.
#[derive(Debug)]
pub struct Reconciled {
    pub samples: Vec<Sample>,
    pub synthetic_markers: Vec<Marker>,
    pub shift: TimeShift,
}

/// Reconcile decoded samples onto a strictly increasing timeline.
///
/// Duplicates and regressed timestamps merge into the last retained sample
/// with the earliest non-absent value winning per field. When
/// `compress_exceeded_slices` is set, a gap of at least
/// `exceeded_slice_threshold` collapses to a single one-second slice, a
/// synthetic marker labeled with the removed duration is emitted at the
/// seam, and every later timestamp moves forward by the removed amount.
pub fn reconcile(samples: Vec<Sample>, config: &ImportConfig) -> Reconciled {
    let threshold_ms = config.exceeded_slice_threshold.as_millis() as i64;
    let mut retained: Vec<Sample> = Vec::with_capacity(samples.len());
    let mut synthetic_markers = Vec::new();
    let mut shift = TimeShift::default();
    let mut cumulative_shift = 0i64;

    for mut sample in samples {
        let raw_time = sample.absolute_time;
        let adjusted = raw_time - cumulative_shift;

        let Some(last) = retained.last_mut() else {
            sample.absolute_time = adjusted;
            retained.push(sample);
            continue;
        };

        if adjusted <= last.absolute_time {
            if adjusted < last.absolute_time {
                debug!(
                    raw_time,
                    retained_time = last.absolute_time,
                    "timestamp regression folded into previous sample"
                );
            }
            last.merge_missing_from(&sample);
            continue;
        }

        let gap = adjusted - last.absolute_time;
        if config.compress_exceeded_slices && gap >= threshold_ms {
            cumulative_shift += gap - COLLAPSED_SLICE_MS;
            shift.push(raw_time, cumulative_shift);

            let seam_time = last.absolute_time + COLLAPSED_SLICE_MS;
            synthetic_markers.push(Marker::new(gap_label(gap), seam_time));
            debug!(gap_ms = gap, seam_time, "exceeded slice collapsed");

            sample.absolute_time = seam_time;
        } else {
            sample.absolute_time = adjusted;
        }
        retained.push(sample);
    }

    Reconciled { samples: retained, synthetic_markers, shift }
}

/// Human-readable duration for a synthetic gap marker: `h:mm:ss` from one
/// hour up, `m:ss` below.
fn gap_label(gap_ms: i64) -> String {
    let total_seconds = gap_ms / 1_000;
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
