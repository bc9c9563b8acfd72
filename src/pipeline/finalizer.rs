//! Final assembly of the immutable [`Activity`].
//!
//! The finalizer receives everything the earlier stages produced for one
//! file, resolves the activity start time, computes whole-activity
//! aggregates and derives the content identity. It also extends a
//! predecessor activity when a later file turns out to be the continuation
//! of one already imported in this batch.

use std::path::Path;

use tracing::info;

use crate::elevation::ElevationModel;
use crate::error::{ImportError, Result};
use crate::types::{
    Activity, DeviceMetadata, GearChangeEvent, Marker, PauseInterval, Sample, SessionSummary,
    TourIdentity,
};

/// Everything the pipeline stages produced for one file, ready for final
/// assembly.
#[derive(Debug, Default)]
pub struct TourParts {
    pub samples: Vec<Sample>,
    pub markers: Vec<Marker>,
    pub gear_events: Vec<GearChangeEvent>,
    pub pause_intervals: Vec<PauseInterval>,
    pub device: DeviceMetadata,
    pub session: SessionSummary,
}

/// Assemble the immutable activity from joined parts.
///
/// The start time is the first sample's time when samples exist, otherwise
/// the session summary's; a file with neither fails. Devices report a
/// spurious speed in the first record, so the first sample's speed is
/// cleared before aggregates are computed.
pub fn finalize(
    path: &Path,
    mut parts: TourParts,
    elevation: &dyn ElevationModel,
) -> Result<Activity> {
    let sample_start = parts.samples.first().map(|s| s.absolute_time);
    let start_time = match sample_start.or(parts.session.start_time) {
        Some(start) => start,
        None => return Err(ImportError::missing_metadata("start time", path.to_path_buf())),
    };

    if let (Some(first), Some(reported)) = (sample_start, parts.session.start_time) {
        if first != reported {
            info!(
                sample_start = first,
                session_start = reported,
                difference_s = (first - reported).abs() / 1_000,
                "sample and session start times disagree, using the sample start"
            );
        }
    }

    if let Some(first) = parts.samples.first_mut() {
        first.speed = None;
    }

    let aggregates =
        compute_aggregates(&parts.samples, &parts.pause_intervals, &parts.session, elevation);
    let identity = TourIdentity::derive(start_time, &parts.device.device_id(), &parts.samples);

    Ok(Activity {
        start_time,
        device: parts.device,
        samples: parts.samples,
        markers: parts.markers,
        gear_events: parts.gear_events,
        pause_intervals: parts.pause_intervals,
        aggregates,
        identity,
    })
}

/// Merge a continuation file into its predecessor and re-finalize.
///
/// Samples, markers, gear events and pauses append in order; continuation
/// marker indices shift by the predecessor's sample count so they keep
/// pointing at their slice, and ordinal lap labels renumber to continue
/// the predecessor's sequence. Aggregates are recomputed over the merged
/// series, and the identity re-derives from the predecessor's start time
/// and the merged content, so the extended tour de-duplicates as a whole.
pub fn extend(
    predecessor: Activity,
    continuation: Activity,
    elevation: &dyn ElevationModel,
) -> Activity {
    let Activity {
        start_time,
        device: mut merged_device,
        samples: mut merged_samples,
        markers: mut merged_markers,
        gear_events: mut merged_gears,
        pause_intervals: mut merged_pauses,
        aggregates: predecessor_aggregates,
        identity: _,
    } = predecessor;

    let offset = merged_samples.len();
    // Ordinal lap labels restart at 1 in every decoded part; continuation
    // ordinals continue after the predecessor's highest so the merged tour
    // numbers its laps in one sequence.
    let label_base: u64 = merged_markers
        .iter()
        .filter_map(|marker| marker.label.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    merged_samples.extend(continuation.samples);
    for mut marker in continuation.markers {
        marker.resolved_sample_index = marker.resolved_sample_index.map(|index| index + offset);
        if let Ok(ordinal) = marker.label.parse::<u64>() {
            marker.label = (label_base + ordinal).to_string();
            if let Some(sample) =
                marker.resolved_sample_index.and_then(|index| merged_samples.get_mut(index))
            {
                sample.marker = Some(marker.label.clone());
            }
        }
        merged_markers.push(marker);
    }
    merged_gears.extend(continuation.gear_events);
    merged_pauses.extend(continuation.pause_intervals);
    merged_device.merge_missing_from(&continuation.device);

    // Session facts the per-file summaries contributed survive through the
    // per-file aggregates.
    let combined = SessionSummary {
        start_time: Some(start_time),
        elapsed_time_ms: None,
        timer_time_ms: None,
        calories_kcal: match (
            predecessor_aggregates.calories_kcal,
            continuation.aggregates.calories_kcal,
        ) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        },
        avg_power: continuation.aggregates.avg_power.or(predecessor_aggregates.avg_power),
        training_effect: continuation
            .aggregates
            .training_effect
            .or(predecessor_aggregates.training_effect),
    };

    let aggregates = compute_aggregates(&merged_samples, &merged_pauses, &combined, elevation);
    let identity = TourIdentity::derive(start_time, &merged_device.device_id(), &merged_samples);

    Activity {
        start_time,
        device: merged_device,
        samples: merged_samples,
        markers: merged_markers,
        gear_events: merged_gears,
        pause_intervals: merged_pauses,
        aggregates,
        identity,
    }
}

fn compute_aggregates(
    samples: &[Sample],
    pauses: &[PauseInterval],
    session: &SessionSummary,
    elevation: &dyn ElevationModel,
) -> crate::types::Aggregates {
    let elapsed = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => last.absolute_time - first.absolute_time,
        _ => 0,
    };
    let paused: i64 = pauses.iter().map(PauseInterval::duration_ms).sum();

    // Recorded time must not exceed what the device itself reports as the
    // session span.
    let device_elapsed = session.elapsed_time_ms.unwrap_or(elapsed);
    let recorded = (elapsed - paused).clamp(0, device_elapsed.max(0));

    let mut moving: i64 = 0;
    for pair in samples.windows(2) {
        let is_moving = match pair[1].speed {
            Some(speed) => speed > 0.0,
            None => match (pair[0].distance, pair[1].distance) {
                (Some(before), Some(after)) => after > before,
                _ => false,
            },
        };
        if is_moving {
            moving += pair[1].absolute_time - pair[0].absolute_time;
        }
    }
    let moving = moving.min(recorded);

    let gain = elevation.compute(samples);
    let (avg_heart_rate, max_heart_rate) = series_stats(samples, |s| s.heart_rate);
    let (sample_avg_power, max_power) = series_stats(samples, |s| s.power);

    crate::types::Aggregates {
        total_distance: total_distance(samples),
        elapsed_time_ms: elapsed,
        recorded_time_ms: recorded,
        paused_time_ms: paused,
        moving_time_ms: moving,
        ascent: gain.map(|g| g.ascent),
        descent: gain.map(|g| g.descent),
        calories_kcal: session.calories_kcal,
        avg_heart_rate,
        max_heart_rate,
        avg_power: sample_avg_power.or(session.avg_power),
        max_power,
        training_effect: session.training_effect,
    }
}

/// Span of the cumulative distance series, or speed integrated over time
/// when the device sent no distance channel.
fn total_distance(samples: &[Sample]) -> Option<f32> {
    let first = samples.iter().find_map(|s| s.distance);
    let last = samples.iter().rev().find_map(|s| s.distance);
    if let (Some(first), Some(last)) = (first, last) {
        return Some((last - first).max(0.0));
    }

    let mut meters = 0.0f64;
    let mut integrated = false;
    for pair in samples.windows(2) {
        if let Some(speed) = pair[1].speed {
            let dt_seconds = (pair[1].absolute_time - pair[0].absolute_time) as f64 / 1_000.0;
            meters += f64::from(speed) * dt_seconds;
            integrated = true;
        }
    }
    integrated.then(|| meters as f32)
}

fn series_stats<F>(samples: &[Sample], field: F) -> (Option<f32>, Option<f32>)
where
    F: Fn(&Sample) -> Option<f32>,
{
    let mut sum = 0.0f64;
    let mut count = 0u32;
    let mut max: Option<f32> = None;
    for sample in samples {
        if let Some(value) = field(sample) {
            sum += f64::from(value);
            count += 1;
            max = Some(max.map_or(value, |m| m.max(value)));
        }
    }
    let avg = (count > 0).then(|| (sum / f64::from(count)) as f32);
    (avg, max)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::elevation::MinDifferenceModel;
    use crate::types::PauseReason;

    use super::*;

    fn model() -> MinDifferenceModel {
        MinDifferenceModel::default()
    }

    fn source() -> PathBuf {
        PathBuf::from("ride.fit")
    }

    fn series(times: &[i64]) -> Vec<Sample> {
        times.iter().copied().map(Sample::at).collect()
    }

    #[test]
    fn start_time_prefers_first_sample() -> anyhow::Result<()> {
        let parts = TourParts {
            samples: series(&[5_000, 6_000]),
            session: SessionSummary { start_time: Some(4_000), ..Default::default() },
            ..Default::default()
        };

        let activity = finalize(&source(), parts, &model())?;
        assert_eq!(activity.start_time, 5_000);
        Ok(())
    }

    #[test]
    fn session_start_fills_in_for_empty_series() -> anyhow::Result<()> {
        let parts = TourParts {
            session: SessionSummary { start_time: Some(9_000), ..Default::default() },
            ..Default::default()
        };

        let activity = finalize(&source(), parts, &model())?;
        assert_eq!(activity.start_time, 9_000);
        assert_eq!(activity.end_time(), 9_000);
        Ok(())
    }

    #[test]
    fn no_start_time_at_all_is_file_fatal() {
        let result = finalize(&source(), TourParts::default(), &model());
        assert!(matches!(result, Err(ImportError::MissingMetadata { .. })));
    }

    #[test]
    fn first_sample_speed_is_cleared() -> anyhow::Result<()> {
        let mut samples = series(&[0, 1_000]);
        samples[0].speed = Some(4.2);
        samples[1].speed = Some(5.0);

        let activity =
            finalize(&source(), TourParts { samples, ..Default::default() }, &model())?;
        assert_eq!(activity.samples[0].speed, None);
        assert_eq!(activity.samples[1].speed, Some(5.0));
        Ok(())
    }

    #[test]
    fn times_split_into_elapsed_recorded_paused_moving() -> anyhow::Result<()> {
        let mut samples = series(&[0, 10_000, 20_000, 30_000]);
        samples[1].speed = Some(5.0);
        samples[2].speed = Some(0.0);
        samples[3].speed = Some(6.0);

        let parts = TourParts {
            samples,
            pause_intervals: vec![PauseInterval {
                start: 10_000,
                end: 15_000,
                reason: PauseReason::Manual,
            }],
            ..Default::default()
        };

        let activity = finalize(&source(), parts, &model())?;
        let aggregates = activity.aggregates;
        assert_eq!(aggregates.elapsed_time_ms, 30_000);
        assert_eq!(aggregates.paused_time_ms, 5_000);
        assert_eq!(aggregates.recorded_time_ms, 25_000);
        // slices ending at t=10s and t=30s show movement; first-sample
        // clearing does not matter because movement reads the later sample
        assert_eq!(aggregates.moving_time_ms, 20_000);
        Ok(())
    }

    #[test]
    fn recorded_time_is_clamped_to_device_elapsed() -> anyhow::Result<()> {
        let parts = TourParts {
            samples: series(&[0, 60_000]),
            session: SessionSummary { elapsed_time_ms: Some(45_000), ..Default::default() },
            ..Default::default()
        };

        let activity = finalize(&source(), parts, &model())?;
        assert_eq!(activity.aggregates.recorded_time_ms, 45_000);
        Ok(())
    }

    #[test]
    fn distance_comes_from_cumulative_series_when_present() -> anyhow::Result<()> {
        let mut samples = series(&[0, 1_000, 2_000]);
        samples[0].distance = Some(100.0);
        samples[2].distance = Some(850.0);

        let activity =
            finalize(&source(), TourParts { samples, ..Default::default() }, &model())?;
        assert_eq!(activity.aggregates.total_distance, Some(750.0));
        Ok(())
    }

    #[test]
    fn distance_integrates_speed_when_series_absent() -> anyhow::Result<()> {
        let mut samples = series(&[0, 1_000, 2_000]);
        samples[1].speed = Some(10.0);
        samples[2].speed = Some(12.0);

        let activity =
            finalize(&source(), TourParts { samples, ..Default::default() }, &model())?;
        // 10 m/s and 12 m/s over one second each
        assert_eq!(activity.aggregates.total_distance, Some(22.0));
        Ok(())
    }

    #[test]
    fn heart_rate_stats_skip_absent_readings() -> anyhow::Result<()> {
        let mut samples = series(&[0, 1_000, 2_000, 3_000]);
        samples[0].heart_rate = Some(100.0);
        samples[2].heart_rate = Some(140.0);

        let activity =
            finalize(&source(), TourParts { samples, ..Default::default() }, &model())?;
        assert_eq!(activity.aggregates.avg_heart_rate, Some(120.0));
        assert_eq!(activity.aggregates.max_heart_rate, Some(140.0));
        Ok(())
    }

    #[test]
    fn session_supplies_power_calories_and_training_effect() -> anyhow::Result<()> {
        let parts = TourParts {
            samples: series(&[0, 1_000]),
            session: SessionSummary {
                calories_kcal: Some(640),
                avg_power: Some(187.0),
                training_effect: Some(3.2),
                ..Default::default()
            },
            ..Default::default()
        };

        let activity = finalize(&source(), parts, &model())?;
        assert_eq!(activity.aggregates.calories_kcal, Some(640));
        assert_eq!(activity.aggregates.avg_power, Some(187.0));
        assert_eq!(activity.aggregates.training_effect, Some(3.2));
        Ok(())
    }

    #[test]
    fn identity_is_deterministic_and_content_sensitive() -> anyhow::Result<()> {
        let mut samples = series(&[0, 1_000]);
        samples[1].distance = Some(10.0);

        let build = |samples: Vec<Sample>| {
            finalize(&source(), TourParts { samples, ..Default::default() }, &model())
        };

        let first = build(samples.clone())?;
        let again = build(samples.clone())?;
        assert_eq!(first.identity, again.identity);

        samples[1].distance = Some(10.2);
        let changed = build(samples)?;
        assert_ne!(first.identity, changed.identity);
        Ok(())
    }

    #[test]
    fn extend_appends_and_offsets_marker_indices() -> anyhow::Result<()> {
        let mut first_samples = series(&[0, 1_000]);
        first_samples[1].distance = Some(10.0);
        let first_parts = TourParts {
            samples: first_samples,
            markers: vec![Marker {
                label: "1".into(),
                device_time: 1_000,
                resolved_sample_index: Some(1),
                distance: Some(10.0),
            }],
            ..Default::default()
        };
        let predecessor = finalize(&source(), first_parts, &model())?;
        let predecessor_identity = predecessor.identity;

        let second_parts = TourParts {
            samples: series(&[2_000, 3_000]),
            markers: vec![Marker {
                label: "2".into(),
                device_time: 3_000,
                resolved_sample_index: Some(1),
                distance: None,
            }],
            ..Default::default()
        };
        let continuation = finalize(&source(), second_parts, &model())?;

        let merged = extend(predecessor, continuation, &model());

        assert_eq!(merged.start_time, 0);
        assert_eq!(merged.samples.len(), 4);
        assert_eq!(merged.markers[0].resolved_sample_index, Some(1));
        assert_eq!(merged.markers[1].resolved_sample_index, Some(3));
        assert_eq!(merged.aggregates.elapsed_time_ms, 3_000);
        assert_ne!(merged.identity, predecessor_identity);
        Ok(())
    }

    #[test]
    fn extend_continues_ordinal_lap_numbering() -> anyhow::Result<()> {
        let part = |times: &[i64], labels: &[&str]| {
            let mut samples = series(times);
            let markers = labels
                .iter()
                .enumerate()
                .map(|(index, label)| {
                    samples[index].marker = Some((*label).to_string());
                    Marker {
                        label: (*label).to_string(),
                        device_time: times[index],
                        resolved_sample_index: Some(index),
                        distance: None,
                    }
                })
                .collect();
            finalize(&source(), TourParts { samples, markers, ..Default::default() }, &model())
        };

        let predecessor = part(&[0, 1_000], &["1", "2"])?;
        let continuation = part(&[2_000, 3_000], &["1", "Sprint"])?;

        let merged = extend(predecessor, continuation, &model());

        let labels: Vec<&str> = merged.markers.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["1", "2", "3", "Sprint"]);
        // the renumbered label is carried onto its sample
        assert_eq!(merged.samples[2].marker.as_deref(), Some("3"));
        assert_eq!(merged.samples[3].marker.as_deref(), Some("Sprint"));
        Ok(())
    }

    #[test]
    fn extend_sums_calories_across_parts() -> anyhow::Result<()> {
        let with_calories = |times: &[i64], calories: u32| {
            finalize(
                &source(),
                TourParts {
                    samples: series(times),
                    session: SessionSummary {
                        calories_kcal: Some(calories),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                &model(),
            )
        };

        let predecessor = with_calories(&[0, 1_000], 300)?;
        let continuation = with_calories(&[2_000, 3_000], 150)?;

        let merged = extend(predecessor, continuation, &model());
        assert_eq!(merged.aggregates.calories_kcal, Some(450));
        Ok(())
    }

    #[test]
    fn extend_keeps_latest_training_effect() -> anyhow::Result<()> {
        let with_effect = |times: &[i64], effect: Option<f32>| {
            finalize(
                &source(),
                TourParts {
                    samples: series(times),
                    session: SessionSummary { training_effect: effect, ..Default::default() },
                    ..Default::default()
                },
                &model(),
            )
        };

        let predecessor = with_effect(&[0, 1_000], Some(1.5))?;
        let continuation = with_effect(&[2_000, 3_000], Some(2.9))?;

        let merged = extend(predecessor, continuation, &model());
        assert_eq!(merged.aggregates.training_effect, Some(2.9));
        Ok(())
    }
}
