//! The per-file import pipeline.
//!
//! One recording file flows through fixed stages: decode into typed
//! records, accumulate sample fragments, reconcile the timeline, join the
//! secondary streams, track pauses, finalize into an [`Activity`] and
//! register it with the shared inventory. Each invocation owns all of its
//! working state; the inventory is the only thing shared between files.
//!
//! Multi-part recordings (the gzip JSON-lines format splits long tours into
//! `-<n>` suffixed files) are serialized per filename stem and merged by
//! extending the earlier part.

pub mod accumulator;
pub mod finalizer;
pub mod joiner;
pub mod pauses;
pub mod reconciler;

use std::path::Path;

use tracing::{debug, info};

use crate::config::ImportConfig;
use crate::decode::{SourceFormat, open_decoder};
use crate::elevation::ElevationModel;
use crate::error::{ImportError, Result};
use crate::store::{TourInventory, part_key};
use crate::types::{
    Activity, BeatIntervals, DecodedRecord, DeviceMetadata, GearChangeEvent, GpsFix, LapFragment,
    Sample, SessionSummary, TimerEvent, TourIdentity,
};

use accumulator::Accumulator;
use finalizer::TourParts;
use pauses::PauseTracker;
use reconciler::Reconciled;

/// What importing one file did to the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// A new activity was registered.
    Imported(TourIdentity),
    /// The activity decoded to an identity that is already known.
    SkippedDuplicate(TourIdentity),
    /// The file continued an earlier part; the merged activity replaced it.
    Extended(TourIdentity),
}

impl ImportOutcome {
    /// Identity of the activity the file resolved to.
    pub fn identity(&self) -> TourIdentity {
        match self {
            ImportOutcome::Imported(identity)
            | ImportOutcome::SkippedDuplicate(identity)
            | ImportOutcome::Extended(identity) => *identity,
        }
    }
}

/// Typed records of one file, sorted into their streams.
#[derive(Default)]
struct Collected {
    samples: Vec<Sample>,
    fixes: Vec<GpsFix>,
    laps: Vec<LapFragment>,
    gear_events: Vec<GearChangeEvent>,
    timer_events: Vec<TimerEvent>,
    beats: Vec<BeatIntervals>,
    device: DeviceMetadata,
    session: SessionSummary,
}

/// Run the full import pipeline for one recording file.
///
/// Returns the outcome on success; any error aborts this file only. The
/// caller may invoke this concurrently for different files, the inventory
/// takes care of de-duplication and continuation ownership.
pub fn import_file(
    path: &Path,
    config: &ImportConfig,
    inventory: &TourInventory,
    elevation: &dyn ElevationModel,
) -> Result<ImportOutcome> {
    let (stem, part) = part_key(path);
    // Only the JSON-lines format splits an activity across numbered files.
    // Other formats may carry date-like names ("2018-07-02.fit") that merely
    // look like part suffixes.
    let continuation_enabled =
        matches!(SourceFormat::detect(path), Some(SourceFormat::JsonLog));
    let part = if continuation_enabled { part } else { None };

    // All files of one stem import under one lock so parts extend in order.
    let stem_gate = continuation_enabled.then(|| inventory.stem_guard(&stem));
    let _stem_lock = stem_gate
        .as_ref()
        .map(|gate| gate.lock().unwrap_or_else(std::sync::PoisonError::into_inner));

    let is_continuation = part.is_some_and(|n| n >= 2);
    if is_continuation && inventory.stem_head(&stem).is_none() {
        return Err(ImportError::continuation(
            stem,
            "continuation part arrived without its opening part in this batch",
        ));
    }

    let collected = collect_records(path)?;
    let activity = assemble(path, collected, config, elevation)?;

    if is_continuation {
        let Some((_, predecessor)) = inventory.take_for_extension(&stem) else {
            return Err(ImportError::continuation(
                stem,
                "predecessor tour is not available for extension",
            ));
        };
        let merged = finalizer::extend(predecessor, activity, elevation);
        let identity = merged.identity;
        let samples = merged.samples.len();
        if inventory.insert_if_absent(identity, merged) {
            inventory.record_stem_head(&stem, identity);
            info!(
                identity = %identity,
                samples,
                path = %path.display(),
                "extended multi-part activity"
            );
            Ok(ImportOutcome::Extended(identity))
        } else {
            info!(identity = %identity, "merged activity already imported, skipping");
            Ok(ImportOutcome::SkippedDuplicate(identity))
        }
    } else {
        let identity = activity.identity;
        let samples = activity.samples.len();
        if inventory.insert_if_absent(identity, activity) {
            if continuation_enabled {
                inventory.record_stem_head(&stem, identity);
            }
            info!(
                identity = %identity,
                samples,
                path = %path.display(),
                "imported activity"
            );
            Ok(ImportOutcome::Imported(identity))
        } else {
            info!(identity = %identity, "activity already imported, skipping");
            Ok(ImportOutcome::SkippedDuplicate(identity))
        }
    }
}

/// Drain the file's decoder, coalescing sample fragments and sorting every
/// record into its stream.
fn collect_records(path: &Path) -> Result<Collected> {
    let mut decoder = open_decoder(path)?;
    let mut accumulator = Accumulator::new();
    let mut collected = Collected::default();

    while let Some(record) = decoder.next_record()? {
        match record {
            DecodedRecord::Sample(fragment) => {
                if let Some(sample) = accumulator.push(fragment) {
                    collected.samples.push(sample);
                }
            }
            DecodedRecord::GpsFix(fix) => collected.fixes.push(fix),
            DecodedRecord::Lap(lap) => collected.laps.push(lap),
            DecodedRecord::Gear(event) => collected.gear_events.push(event),
            DecodedRecord::Timer(event) => collected.timer_events.push(event),
            DecodedRecord::BeatIntervals(run) => collected.beats.push(run),
            DecodedRecord::DeviceInfo(info) => collected.device.merge_missing_from(&info),
            DecodedRecord::SessionSummary(summary) => {
                collected.session.merge_missing_from(&summary);
            }
        }
    }
    if let Some(sample) = accumulator.finish() {
        collected.samples.push(sample);
    }

    debug!(
        samples = collected.samples.len(),
        fixes = collected.fixes.len(),
        laps = collected.laps.len(),
        path = %path.display(),
        "decoded recording"
    );
    Ok(collected)
}

/// Reconcile, join and finalize one file's record streams.
fn assemble(
    path: &Path,
    collected: Collected,
    config: &ImportConfig,
    elevation: &dyn ElevationModel,
) -> Result<Activity> {
    let Collected {
        samples,
        mut fixes,
        mut laps,
        mut gear_events,
        mut timer_events,
        mut beats,
        device,
        session,
    } = collected;

    let Reconciled { mut samples, synthetic_markers, shift } = reconciler::reconcile(samples, config);

    // Secondary streams still carry raw device times; move them onto the
    // reconciled timeline. Collapsed gaps can reorder nearby records.
    if !shift.is_identity() {
        for fix in &mut fixes {
            fix.time = shift.adjust(fix.time);
        }
        for lap in &mut laps {
            lap.device_time = shift.adjust(lap.device_time);
        }
        for event in &mut gear_events {
            event.time = shift.adjust(event.time);
        }
        for event in &mut timer_events {
            event.time = shift.adjust(event.time);
        }
        for run in &mut beats {
            run.time = shift.adjust(run.time);
        }
        fixes.sort_by_key(|fix| fix.time);
        timer_events.sort_by_key(|event| event.time);
    }

    joiner::join_gps(&mut samples, &fixes);
    joiner::fill_heart_rate(&mut samples, &beats);
    let markers = joiner::join_markers(&mut samples, laps, synthetic_markers, config);

    let (gear_events, pause_intervals) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            let start = first.absolute_time;
            let end = last.absolute_time;

            let joined = joiner::join_gears(start, end, gear_events, config.diagnostic_gear);
            joiner::fill_sample_gears(&mut samples, &joined);

            let mut tracker = PauseTracker::new(config.pause_debounce);
            for event in &timer_events {
                tracker.observe(event);
            }
            (joined, tracker.finish(end))
        }
        _ => (Vec::new(), Vec::new()),
    };

    finalizer::finalize(
        path,
        TourParts { samples, markers, gear_events, pause_intervals, device, session },
        elevation,
    )
}
