//! Import configuration.
//!
//! All tunable policy for the import pipeline lives here. A default
//! configuration imports recordings faithfully: no slice compression, no
//! trailing-marker filtering. The knobs exist for devices and workflows that
//! need them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::types::GearCombination;

/// Policy knobs consulted by the reconciler, joiner, pause tracker and
/// finalizer.
///
/// Deserializes leniently: any omitted field takes its default, so a config
/// file only needs to name the knobs it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Replace recording gaps longer than `exceeded_slice_threshold` with a
    /// single one-second slice and a synthetic marker noting the removed
    /// duration. Off by default: gaps are preserved as recorded.
    pub compress_exceeded_slices: bool,

    /// Minimum gap between consecutive samples that counts as an exceeded
    /// slice when `compress_exceeded_slices` is on.
    pub exceeded_slice_threshold: Duration,

    /// Drop markers that resolve into the trailing
    /// `last_marker_time_slices` samples of the recording. Off by default.
    /// Devices that auto-fire a lap at the stop button produce these.
    pub ignore_last_marker: bool,

    /// Width of the trailing window, in time slices, used when
    /// `ignore_last_marker` is on.
    pub last_marker_time_slices: u32,

    /// Pauses shorter than this window are discarded as auto-pause flapping
    /// rather than recorded.
    pub pause_debounce: Duration,

    /// Replacement gear for malformed gear-change events that report zero
    /// rear teeth. The default encodes an implausible 16:48 combination so
    /// affected tours are recognizable in gear charts.
    pub diagnostic_gear: GearCombination,

    /// Minimum altitude difference, in meters, that the default elevation
    /// model counts toward ascent or descent.
    pub elevation_min_difference: f32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            compress_exceeded_slices: false,
            exceeded_slice_threshold: Duration::from_secs(300),
            ignore_last_marker: false,
            last_marker_time_slices: 30,
            pause_debounce: Duration::from_secs(1),
            diagnostic_gear: GearCombination::DIAGNOSTIC,
            elevation_min_difference: 5.0,
        }
    }
}

impl ImportConfig {
    /// Parse a configuration from JSON text. Omitted fields keep their
    /// defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ImportError::format_error("import config", e.to_string()))
    }
}
