//! Decoded record stream shared by every source format.
//!
//! Decoders reduce their wire format to this one vocabulary. Everything
//! downstream of the decoders (accumulation, reconciliation, joining,
//! pause tracking) works exclusively on [`DecodedRecord`]s and never sees
//! format-specific structure.

use serde::{Deserialize, Serialize};

use super::activity::{DeviceMetadata, SessionSummary};
use super::gear::GearChangeEvent;
use super::pause::PauseReason;
use super::sample::Sample;

/// One typed record pulled from a recording.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord {
    /// Partial sensor readings for one instant. A format may emit several
    /// of these for the same second; the accumulator coalesces them.
    Sample(Sample),
    /// Sparse GPS fix, joined onto the sample grid by interpolation.
    GpsFix(GpsFix),
    /// Lap or interval boundary pressed on or auto-fired by the device.
    Lap(LapFragment),
    /// Identification of the recording device.
    DeviceInfo(DeviceMetadata),
    /// Whole-activity summary the device wrote at save time.
    SessionSummary(SessionSummary),
    /// Drivetrain shift.
    Gear(GearChangeEvent),
    /// Recording timer started or stopped.
    Timer(TimerEvent),
    /// Beat-to-beat intervals from a paired heart-rate belt.
    BeatIntervals(BeatIntervals),
}

/// A GPS position at a device time, possibly off the sample grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Epoch milliseconds.
    pub time: i64,
    /// Degrees, positive north.
    pub latitude: f64,
    /// Degrees, positive east.
    pub longitude: f64,
}

/// A lap boundary before resolution onto the sample grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapFragment {
    /// Epoch milliseconds as reported by the device.
    pub device_time: i64,
    /// Device-assigned label. `None` when the format has no lap numbering;
    /// the marker join assigns sequence numbers to unlabeled laps.
    pub label: Option<String>,
}

/// A run of beat-to-beat intervals reported by a heart-rate belt.
///
/// Belt recordings carry these instead of a rate channel. Runs arrive in
/// file order and form one series starting at the first run's time; the
/// joiner derives a pulse from them for samples without an explicit rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatIntervals {
    /// Epoch milliseconds of the entry that carried this run.
    pub time: i64,
    /// Milliseconds between successive beats.
    pub intervals_ms: Vec<u32>,
}

/// What a timer event does to the recording state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerAction {
    Start,
    Stop,
    /// Stop variant some devices emit when ending the session outright.
    StopAll,
}

/// A raw timer transition before the pause state machine runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerEvent {
    /// Epoch milliseconds.
    pub time: i64,
    pub action: TimerAction,
    /// Whether the rider or the device triggered the transition. Only
    /// meaningful on stops; carried through to the pause interval.
    pub reason: PauseReason,
}
