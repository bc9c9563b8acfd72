//! Joins secondary streams onto the reconciled sample grid.
//!
//! After reconciliation the samples form the activity's one true timeline.
//! Everything a recording reports off that grid, sparse GPS fixes, belt
//! beat intervals, lap boundaries, drivetrain shifts, is joined here:
//! positions by bracketing interpolation, heart rate by consuming intervals
//! along the timeline, markers by forward scan to a sample index, gear
//! changes by clamping to the activity window.

use tracing::{debug, warn};

use crate::config::ImportConfig;
use crate::types::{
    BeatIntervals, GearChangeEvent, GearCombination, GpsFix, LapFragment, Marker, Sample,
};

/// Fill absent sample positions from a sorted fix stream.
///
/// A sample between two fixes gets the linear interpolation of their
/// coordinates; before the first or past the last fix it gets that boundary
/// fix unchanged. Samples that already carry a position keep it.
pub fn join_gps(samples: &mut [Sample], fixes: &[GpsFix]) {
    if fixes.is_empty() {
        return;
    }

    let mut upper = 0usize;
    for sample in samples.iter_mut() {
        if sample.has_position() {
            continue;
        }

        let time = sample.absolute_time;
        while upper < fixes.len() && fixes[upper].time < time {
            upper += 1;
        }

        let (latitude, longitude) = if upper == 0 {
            (fixes[0].latitude, fixes[0].longitude)
        } else if upper == fixes.len() {
            let last = &fixes[fixes.len() - 1];
            (last.latitude, last.longitude)
        } else if fixes[upper].time == time {
            (fixes[upper].latitude, fixes[upper].longitude)
        } else {
            let before = &fixes[upper - 1];
            let after = &fixes[upper];
            let fraction = (time - before.time) as f64 / (after.time - before.time) as f64;
            (
                before.latitude + fraction * (after.latitude - before.latitude),
                before.longitude + fraction * (after.longitude - before.longitude),
            )
        };

        sample.latitude = Some(latitude);
        sample.longitude = Some(longitude);
    }
}

/// Derive missing heart rates from belt beat intervals.
///
/// The runs concatenate in arrival order into one series whose clock
/// starts at the first run's time. Walking the samples, intervals are
/// consumed until that clock reaches each sample; the sample's rate is the
/// mean over the beats consumed on the way. Samples before the first beat,
/// past the series end, or already carrying an explicit rate are left
/// alone.
pub fn fill_heart_rate(samples: &mut [Sample], beats: &[BeatIntervals]) {
    let Some(start) = beats.first().map(|run| run.time) else {
        return;
    };
    let intervals: Vec<u32> =
        beats.iter().flat_map(|run| run.intervals_ms.iter().copied()).collect();
    if intervals.is_empty() {
        return;
    }

    let mut clock = start;
    let mut next = 0usize;
    for sample in samples.iter_mut() {
        let mut sum: i64 = 0;
        let mut count: u32 = 0;
        while clock < sample.absolute_time && next < intervals.len() {
            let interval = i64::from(intervals[next]);
            clock += interval;
            sum += interval;
            count += 1;
            next += 1;
        }

        if count > 0 && sum > 0 && sample.heart_rate.is_none() {
            sample.heart_rate = Some(60_000.0 * count as f32 / sum as f32);
        }
        if next == intervals.len() {
            break;
        }
    }
}

/// Resolve lap boundaries and synthetic gap markers onto sample indices.
///
/// Unlabeled laps are numbered in arrival order starting at 1. Device and
/// synthetic markers merge into one stream sorted by device time, then each
/// resolves to the first sample at or after its timestamp; markers past the
/// end of the recording resolve to the last sample. When
/// `ignore_last_marker` is set, markers landing in the trailing
/// `last_marker_time_slices` samples are dropped.
///
/// Returns the resolved markers; each resolved sample also gets the marker
/// label written into its `marker` field.
pub fn join_markers(
    samples: &mut [Sample],
    laps: Vec<LapFragment>,
    synthetic: Vec<Marker>,
    config: &ImportConfig,
) -> Vec<Marker> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut sequence = 0u32;
    let mut markers: Vec<Marker> = laps
        .into_iter()
        .map(|lap| {
            let label = lap.label.unwrap_or_else(|| {
                sequence += 1;
                sequence.to_string()
            });
            Marker::new(label, lap.device_time)
        })
        .collect();
    markers.extend(synthetic);
    markers.sort_by_key(|marker| marker.device_time);

    let trailing_window = config.last_marker_time_slices as usize;
    let mut resolved = Vec::with_capacity(markers.len());
    let mut index = 0usize;
    for mut marker in markers {
        while index < samples.len() && samples[index].absolute_time < marker.device_time {
            index += 1;
        }
        let slot = index.min(samples.len() - 1);

        if config.ignore_last_marker && slot + trailing_window >= samples.len() {
            debug!(label = %marker.label, slot, "marker in trailing window dropped");
            continue;
        }

        samples[slot].marker = Some(marker.label.clone());
        marker.resolved_sample_index = Some(slot);
        marker.distance = samples[slot].distance;
        resolved.push(marker);
    }
    resolved
}

/// Validate gear-change events against the activity window.
///
/// Events are sorted, zero-rear-teeth events are rewritten to the
/// configured diagnostic gear, the newest pre-start shift moves to the
/// activity start (it is the gear the ride begins in), shifts after the end
/// are dropped, and the final gear is repeated at the end time so the last
/// engagement has a closing bound.
pub fn join_gears(
    start_time: i64,
    end_time: i64,
    mut events: Vec<GearChangeEvent>,
    diagnostic: GearCombination,
) -> Vec<GearChangeEvent> {
    events.sort_by_key(|event| event.time);

    let mut joined: Vec<GearChangeEvent> = Vec::with_capacity(events.len() + 1);
    for mut event in events {
        if event.gear.has_zero_rear_teeth() {
            warn!(
                time = event.time,
                raw = format_args!("{:#010x}", event.gear.value()),
                "gear change reports zero rear teeth, substituting diagnostic gear"
            );
            event.gear = diagnostic;
        }

        if event.time < start_time {
            // Sorted order puts all pre-start shifts first, so only the
            // newest of them survives as the starting gear.
            event.time = start_time;
            joined.clear();
            joined.push(event);
        } else if event.time > end_time {
            debug!(time = event.time, end_time, "gear change after activity end dropped");
        } else {
            joined.push(event);
        }
    }

    if let Some(last) = joined.last().copied() {
        if last.time < end_time {
            joined.push(GearChangeEvent { time: end_time, gear: last.gear });
        }
    }
    joined
}

/// Carry the engaged gear onto each sample.
///
/// A sample reports the gear of the newest change at or before its instant.
/// Samples before the first change stay absent.
pub fn fill_sample_gears(samples: &mut [Sample], events: &[GearChangeEvent]) {
    if events.is_empty() {
        return;
    }

    let mut index = 0usize;
    let mut engaged: Option<GearCombination> = None;
    for sample in samples.iter_mut() {
        while index < events.len() && events[index].time <= sample.absolute_time {
            engaged = Some(events[index].gear);
            index += 1;
        }
        if sample.gear.is_none() {
            sample.gear = engaged;
        }
    }
}
