//! The canonical per-second sample.

use serde::{Deserialize, Serialize};

use super::gear::GearCombination;

/// Where a power reading originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSource {
    /// Reported by the recording head unit itself.
    Device,
    /// Reported by a paired external sensor.
    Sensor,
}

/// One time slice of the reconciled activity series.
///
/// Every sensor field is optional: `None` means the device did not report a
/// value for this slice, which is distinct from a reported zero. Decoders
/// map each format's invalid sentinel (0xFF bytes, empty tags, missing JSON
/// keys) to `None` before a sample reaches the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds, truncated to a whole second by decoders.
    /// Strictly increasing within an activity after reconciliation.
    pub absolute_time: i64,
    /// Degrees, positive north.
    pub latitude: Option<f64>,
    /// Degrees, positive east.
    pub longitude: Option<f64>,
    /// Meters above sea level.
    pub altitude: Option<f32>,
    /// Cumulative meters since activity start.
    pub distance: Option<f32>,
    /// Meters per second.
    pub speed: Option<f32>,
    /// Beats per minute.
    pub heart_rate: Option<f32>,
    /// Revolutions per minute, fractional when the device reports halves.
    pub cadence: Option<f32>,
    /// Watts.
    pub power: Option<f32>,
    pub power_source: Option<PowerSource>,
    /// Degrees Celsius.
    pub temperature: Option<f32>,
    /// Ground contact time in milliseconds.
    pub stance_time: Option<f32>,
    /// Vertical oscillation in millimeters.
    pub vertical_oscillation: Option<f32>,
    /// Label of the marker resolved onto this slice, if any.
    pub marker: Option<String>,
    /// Gear engaged during this slice, filled by the gear join.
    pub gear: Option<GearCombination>,
}

impl Sample {
    /// Create an empty sample at the given time with every field absent.
    pub fn at(absolute_time: i64) -> Self {
        Self {
            absolute_time,
            latitude: None,
            longitude: None,
            altitude: None,
            distance: None,
            speed: None,
            heart_rate: None,
            cadence: None,
            power: None,
            power_source: None,
            temperature: None,
            stance_time: None,
            vertical_oscillation: None,
            marker: None,
            gear: None,
        }
    }

    /// Fill absent fields from a later sample recorded for the same instant.
    ///
    /// Fields already present keep their value, so across a run of
    /// duplicate-time samples the earliest non-absent reading wins.
    pub fn merge_missing_from(&mut self, later: &Sample) {
        fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(other);
            }
        }

        fill(&mut self.latitude, &later.latitude);
        fill(&mut self.longitude, &later.longitude);
        fill(&mut self.altitude, &later.altitude);
        fill(&mut self.distance, &later.distance);
        fill(&mut self.speed, &later.speed);
        fill(&mut self.heart_rate, &later.heart_rate);
        fill(&mut self.cadence, &later.cadence);
        fill(&mut self.power, &later.power);
        fill(&mut self.power_source, &later.power_source);
        fill(&mut self.temperature, &later.temperature);
        fill(&mut self.stance_time, &later.stance_time);
        fill(&mut self.vertical_oscillation, &later.vertical_oscillation);
        fill(&mut self.marker, &later.marker);
        fill(&mut self.gear, &later.gear);
    }

    /// Whether the sample carries a GPS fix.
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}
