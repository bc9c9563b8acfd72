//! Device XML log support
//!
//! Two dialects share one streaming decoder. The legacy dialect ships
//! without a document root and uses plain units; the `DeviceLog` dialect is
//! well-formed but delivers positions in radians, rates in Hz, and
//! temperatures in Kelvin.

pub mod decoder;
mod rootless;

pub use decoder::XmlDecoder;

use chrono::{DateTime, NaiveDateTime};

/// Unit system of a device XML log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlDialect {
    /// Rootless legacy log, plain units
    Legacy,
    /// `DeviceLog` log with radians, Hz, and Kelvin units
    DeviceLog,
}

impl XmlDialect {
    /// Sniff the dialect from raw document text.
    pub fn detect(text: &str) -> Self {
        if text.contains("<DeviceLog") { Self::DeviceLog } else { Self::Legacy }
    }
}

pub(crate) const RADIANS_TO_DEGREES: f64 = 57.295_779_513_1;
pub(crate) const KELVIN_OFFSET: f32 = 273.15;
pub(crate) const HZ_TO_PER_MINUTE: f32 = 60.0;
pub(crate) const JOULES_PER_KCAL: f32 = 4184.0;

/// Parse a log timestamp to epoch milliseconds.
///
/// Device logs write several flavors over firmware generations: zoned
/// RFC 3339, compact `+0100` offsets, and zone-less local times for indoor
/// recordings. Zone-less times count as UTC.
pub(crate) fn parse_time_utc(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
        return Some(zoned.timestamp_millis());
    }
    if let Ok(zoned) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(zoned.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Parse numeric leaf text, absent on malformed or non-finite input.
pub(crate) fn parse_f32(text: &str) -> Option<f32> {
    text.trim().parse::<f32>().ok().filter(|value| value.is_finite())
}

pub(crate) fn parse_f64(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}
