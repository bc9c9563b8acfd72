//! Elevation gain and loss models.
//!
//! Barometric altitude wobbles by a meter or two even on flat ground, so
//! summing raw altitude deltas wildly overstates climbing. The pipeline
//! delegates ascent/descent to an [`ElevationModel`]; the default
//! implementation segments the altitude profile at slope reversals and only
//! counts a reversal once the opposite direction has accumulated a minimum
//! altitude difference.

use tracing::trace;

use crate::types::Sample;

/// Ascent and descent totals for one altitude profile, in meters. Both are
/// non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ElevationGain {
    pub ascent: f32,
    pub descent: f32,
}

/// Computes climbing totals from a sample series.
///
/// Implementations see the full reconciled series; samples without an
/// altitude reading are skipped, not treated as zero.
pub trait ElevationModel: Send + Sync {
    /// Ascent/descent for the series, or `None` when fewer than two samples
    /// carry an altitude.
    fn compute(&self, samples: &[Sample]) -> Option<ElevationGain>;
}

/// Noise-floor model: slope reversals shallower than a minimum altitude
/// difference are treated as sensor wobble and fold into the surrounding
/// segment.
///
/// The profile is walked once, tracking the min/max of the current segment.
/// When the direction flips and the counter-movement has reached the
/// threshold, the finished segment's span is committed to the matching
/// total and a new segment opens at the reversal point.
#[derive(Debug, Clone, Copy)]
pub struct MinDifferenceModel {
    min_difference: f32,
}

impl MinDifferenceModel {
    /// `min_difference` is in meters; values at or below zero disable the
    /// noise floor and count every reversal.
    pub fn new(min_difference: f32) -> Self {
        Self { min_difference: min_difference.max(0.0) }
    }
}

impl Default for MinDifferenceModel {
    fn default() -> Self {
        Self::new(5.0)
    }
}

impl ElevationModel for MinDifferenceModel {
    fn compute(&self, samples: &[Sample]) -> Option<ElevationGain> {
        let altitudes: Vec<f32> = samples.iter().filter_map(|s| s.altitude).collect();
        if altitudes.len() < 2 {
            return None;
        }

        let mut prev_altitude = 0.0f32;
        let mut prev_diff = 0.0f32;
        // Altitude gathered since the last committed reversal, per direction
        let mut climb_since_reversal = 0.0f32;
        let mut drop_since_reversal = 0.0f32;
        // Bounds of the segment currently being built
        let mut segment_min = 0.0f32;
        let mut segment_max = 0.0f32;
        let mut segment_base = 0.0f32;

        let mut ascent_total = 0.0f32;
        let mut descent_total = 0.0f32;

        let last_index = altitudes.len() - 1;
        for (index, &altitude) in altitudes.iter().enumerate() {
            let mut diff = 0.0f32;

            if index == 0 {
                segment_min = altitude;
                segment_max = altitude;
                segment_base = altitude;
            } else if index == last_index {
                // Close the open segment; the final point only decides the
                // direction of the committed span
                let span = segment_max - segment_min;
                let span = if altitude > segment_base { span } else { -span };
                if span > 0.0 {
                    ascent_total += span;
                } else {
                    descent_total += -span;
                }
            } else {
                diff = altitude - prev_altitude;

                if diff > 0.0 {
                    if prev_diff >= 0.0 {
                        // Still climbing
                        climb_since_reversal += diff;
                        segment_max = segment_max.max(altitude);
                    } else {
                        // Descent turned into a climb
                        if drop_since_reversal >= self.min_difference {
                            descent_total += segment_max - segment_min;
                            segment_min = prev_altitude;
                            segment_max = prev_altitude + diff;
                            segment_base = prev_altitude;
                        }
                        climb_since_reversal = diff;
                        drop_since_reversal = 0.0;
                    }
                } else if diff < 0.0 {
                    if prev_diff <= 0.0 {
                        // Still descending
                        drop_since_reversal += -diff;
                        segment_min = segment_min.min(altitude);
                    } else {
                        // Climb turned into a descent
                        if climb_since_reversal >= self.min_difference {
                            ascent_total += segment_max - segment_min;
                            segment_min = prev_altitude + diff;
                            segment_max = prev_altitude;
                            segment_base = prev_altitude;
                        }
                        climb_since_reversal = 0.0;
                        drop_since_reversal = -diff;
                    }
                }
            }

            if diff != 0.0 {
                prev_diff = diff;
            }
            prev_altitude = altitude;
        }

        trace!(
            "Elevation over {} altitude points: +{ascent_total:.1} m / -{descent_total:.1} m",
            altitudes.len()
        );
        Some(ElevationGain { ascent: ascent_total, descent: descent_total })
    }
}
