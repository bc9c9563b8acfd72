//! Core types for activity data representation.
//!
//! This module provides the foundational data structures shared by every
//! decoder and pipeline stage:
//!
//! - [`Sample`] is one slice of the canonical per-second time series, with
//!   explicit absent states for every sensor field
//! - [`DecodedRecord`] is the typed record vocabulary decoders emit
//! - [`Marker`], [`GearChangeEvent`] and [`PauseInterval`] are the sparse
//!   streams resolved onto the sample grid
//! - [`Activity`] is the immutable aggregate root handed to persistence,
//!   keyed by a content-derived [`TourIdentity`]
//!
//! ## Absent vs zero
//!
//! Devices encode "no reading" with per-format sentinels (0xFF bytes, empty
//! tags, omitted keys). Decoders translate those to `None` at the boundary,
//! so a `Some(0.0)` anywhere downstream is always a real measured zero.
//!
//! ## Usage Example
//!
//! ```rust
//! use tracklog::types::Sample;
//!
//! // Two records for the same second, from different sensor channels
//! let mut first = Sample::at(1_000_000);
//! first.heart_rate = Some(128.0);
//!
//! let mut second = Sample::at(1_000_000);
//! second.heart_rate = Some(131.0); // later reading loses
//! second.power = Some(210.0);
//!
//! first.merge_missing_from(&second);
//! assert_eq!(first.heart_rate, Some(128.0));
//! assert_eq!(first.power, Some(210.0));
//! ```

mod activity;
mod fragment;
mod gear;
mod marker;
mod pause;
mod sample;

// Re-export all public types
pub use activity::{Activity, Aggregates, DeviceMetadata, SessionSummary, TourIdentity};
pub use fragment::{BeatIntervals, DecodedRecord, GpsFix, LapFragment, TimerAction, TimerEvent};
pub use gear::{GearChangeEvent, GearCombination};
pub use marker::Marker;
pub use pause::{PauseInterval, PauseReason};
pub use sample::{PowerSource, Sample};
