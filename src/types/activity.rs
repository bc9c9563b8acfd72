//! The canonical activity and its identity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gear::GearChangeEvent;
use super::marker::Marker;
use super::pause::PauseInterval;
use super::sample::Sample;

/// Identification of the recording device, merged from the device-info
/// records a file carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<u32>,
    pub firmware_version: Option<String>,
}

impl DeviceMetadata {
    /// Stable per-device key used in identity derivation.
    ///
    /// Prefers the serial number, then the product name, then the
    /// manufacturer. Recordings without any of these share the fallback key,
    /// so their identity rests on start time and content alone.
    pub fn device_id(&self) -> String {
        if let Some(serial) = self.serial_number {
            return serial.to_string();
        }
        if let Some(product) = &self.product {
            return product.clone();
        }
        if let Some(manufacturer) = &self.manufacturer {
            return manufacturer.clone();
        }
        "unknown-device".to_string()
    }

    /// Fill absent fields from a later device-info record. The first record
    /// naming a field wins.
    pub fn merge_missing_from(&mut self, later: &DeviceMetadata) {
        if self.manufacturer.is_none() {
            self.manufacturer.clone_from(&later.manufacturer);
        }
        if self.product.is_none() {
            self.product.clone_from(&later.product);
        }
        if self.serial_number.is_none() {
            self.serial_number = later.serial_number;
        }
        if self.firmware_version.is_none() {
            self.firmware_version.clone_from(&later.firmware_version);
        }
    }
}

/// Whole-activity totals written by the device at save time.
///
/// Used to cross-check and supplement computed aggregates. All fields are
/// optional; formats differ in what they report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Epoch milliseconds.
    pub start_time: Option<i64>,
    /// Wall-clock span of the session in milliseconds.
    pub elapsed_time_ms: Option<i64>,
    /// Time the recording timer actually ran, in milliseconds.
    pub timer_time_ms: Option<i64>,
    pub calories_kcal: Option<u32>,
    pub avg_power: Option<f32>,
    pub training_effect: Option<f32>,
}

impl SessionSummary {
    /// Fill absent fields from a later summary record. The first record
    /// naming a field wins.
    pub fn merge_missing_from(&mut self, later: &SessionSummary) {
        if self.start_time.is_none() {
            self.start_time = later.start_time;
        }
        if self.elapsed_time_ms.is_none() {
            self.elapsed_time_ms = later.elapsed_time_ms;
        }
        if self.timer_time_ms.is_none() {
            self.timer_time_ms = later.timer_time_ms;
        }
        if self.calories_kcal.is_none() {
            self.calories_kcal = later.calories_kcal;
        }
        if self.avg_power.is_none() {
            self.avg_power = later.avg_power;
        }
        if self.training_effect.is_none() {
            self.training_effect = later.training_effect;
        }
    }
}

/// Derived whole-activity statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    /// Meters, from the cumulative distance series or integrated speed.
    pub total_distance: Option<f32>,
    /// First to last sample, wall clock, in milliseconds.
    pub elapsed_time_ms: i64,
    /// Elapsed minus paused, in milliseconds.
    pub recorded_time_ms: i64,
    /// Sum of pause interval durations in milliseconds.
    pub paused_time_ms: i64,
    /// Time with forward movement, in milliseconds.
    pub moving_time_ms: i64,
    /// Meters climbed.
    pub ascent: Option<f32>,
    /// Meters descended.
    pub descent: Option<f32>,
    pub calories_kcal: Option<u32>,
    pub avg_heart_rate: Option<f32>,
    pub max_heart_rate: Option<f32>,
    pub avg_power: Option<f32>,
    pub max_power: Option<f32>,
    pub training_effect: Option<f32>,
}

/// Stable content-derived activity key.
///
/// Two imports of the same recording produce the same identity; any change
/// to the sample content produces a different one. The sole key for
/// de-duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TourIdentity(pub u64);

impl TourIdentity {
    /// Derive an identity from the start time, the device key and a
    /// fingerprint of the sample sequence.
    ///
    /// The fingerprint covers each sample's time plus its distance and
    /// altitude quantized to a tenth, so re-decoding the same bytes is
    /// stable while any real content difference changes the identity.
    pub fn derive(start_time: i64, device_id: &str, samples: &[Sample]) -> Self {
        let mut hash = Fnv1a::new();
        hash.write(&start_time.to_le_bytes());
        hash.write(device_id.as_bytes());
        for sample in samples {
            hash.write(&sample.absolute_time.to_le_bytes());
            hash.write_quantized(sample.distance);
            hash.write_quantized(sample.altitude);
        }
        TourIdentity(hash.finish())
    }
}

impl fmt::Display for TourIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 64-bit FNV-1a. Inlined so the fingerprint never shifts underneath stored
/// identities when hashing crates change their algorithm.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    /// Hash an optional reading at 0.1 resolution, keeping absent distinct
    /// from zero.
    fn write_quantized(&mut self, value: Option<f32>) {
        match value {
            Some(v) => {
                self.write(&[1]);
                self.write(&(((f64::from(v)) * 10.0).round() as i64).to_le_bytes());
            }
            None => self.write(&[0]),
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// The canonical imported activity.
///
/// Immutable once finalized: the identity is computed from the content, so
/// any later mutation would orphan the stored key. Continuation files are
/// merged before finalization, producing a fresh `Activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Epoch milliseconds.
    pub start_time: i64,
    pub device: DeviceMetadata,
    pub samples: Vec<Sample>,
    pub markers: Vec<Marker>,
    pub gear_events: Vec<GearChangeEvent>,
    pub pause_intervals: Vec<PauseInterval>,
    pub aggregates: Aggregates,
    pub identity: TourIdentity,
}

impl Activity {
    /// Start time as a UTC calendar timestamp, `None` only for times
    /// outside the chrono-representable range.
    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.start_time)
    }

    /// Time of the last sample, or the start time for an empty series.
    pub fn end_time(&self) -> i64 {
        self.samples.last().map_or(self.start_time, |s| s.absolute_time)
    }
}
