//! Resolved lap markers.

use serde::{Deserialize, Serialize};

/// A lap marker after resolution onto the sample sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Display label. Sequence-numbered when the device sent none.
    pub label: String,
    /// Raw device timestamp in epoch milliseconds, kept for diagnostics
    /// after resolution.
    pub device_time: i64,
    /// Position in the final sample array. Set by the marker join; `None`
    /// only while the marker is still unresolved.
    pub resolved_sample_index: Option<usize>,
    /// Cumulative distance in meters at the resolved sample, when known.
    pub distance: Option<f32>,
}

impl Marker {
    /// Create an unresolved marker from a device lap record.
    pub fn new(label: impl Into<String>, device_time: i64) -> Self {
        Self { label: label.into(), device_time, resolved_sample_index: None, distance: None }
    }
}
