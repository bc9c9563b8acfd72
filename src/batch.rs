//! Concurrent batch import driver.
//!
//! Files are grouped by recording: the parts of a multi-part gzip JSON
//! recording form one group and import sequentially so continuations find
//! their predecessor, every other file is its own group. Groups run
//! concurrently on the blocking pool, bounded by a semaphore, and a
//! cancellation token stops the batch between files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ImportConfig;
use crate::decode::SourceFormat;
use crate::elevation::ElevationModel;
use crate::error::{ImportError, Result};
use crate::pipeline::{self, ImportOutcome};
use crate::store::{TourInventory, part_key};

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Upper bound on files decoding at the same time.
    pub max_concurrent_files: usize,
    /// Cancel to stop the batch; files already decoding finish first.
    pub cancel: CancellationToken,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { max_concurrent_files: 4, cancel: CancellationToken::new() }
    }
}

/// Result of one file within a batch.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<ImportOutcome>,
}

/// Tally of a finished batch, with the per-file outcomes.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub imported: usize,
    pub skipped: usize,
    pub extended: usize,
    pub failed: usize,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchSummary {
    fn record(&mut self, outcome: FileOutcome) {
        match &outcome.result {
            Ok(ImportOutcome::Imported(_)) => self.imported += 1,
            Ok(ImportOutcome::SkippedDuplicate(_)) => self.skipped += 1,
            Ok(ImportOutcome::Extended(_)) => self.extended += 1,
            Err(error) => {
                self.failed += 1;
                warn!(
                    path = %outcome.path.display(),
                    error = %error,
                    data_error = error.is_data_error(),
                    "file import failed"
                );
            }
        }
        self.outcomes.push(outcome);
    }
}

/// Import a set of recording files against a shared inventory.
///
/// One failing file never aborts the batch; its error lands in the
/// summary and the remaining files proceed.
pub async fn import_batch(
    paths: Vec<PathBuf>,
    config: ImportConfig,
    inventory: Arc<TourInventory>,
    elevation: Arc<dyn ElevationModel>,
    options: BatchOptions,
) -> BatchSummary {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_files.max(1)));
    let mut workers = Vec::new();

    for group in group_by_recording(paths) {
        let semaphore = Arc::clone(&semaphore);
        let cancel = options.cancel.clone();
        let config = config.clone();
        let inventory = Arc::clone(&inventory);
        let elevation = Arc::clone(&elevation);

        workers.push(tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(group.len());
            for path in group {
                if cancel.is_cancelled() {
                    debug!(path = %path.display(), "batch cancelled, file left unprocessed");
                    break;
                }
                let Ok(_permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let result = import_one(&path, &config, &inventory, &elevation).await;
                outcomes.push(FileOutcome { path, result });
            }
            outcomes
        }));
    }

    let mut summary = BatchSummary::default();
    for worker in join_all(workers).await {
        match worker {
            Ok(outcomes) => {
                for outcome in outcomes {
                    summary.record(outcome);
                }
            }
            Err(join_error) => error!("batch worker panicked: {join_error}"),
        }
    }

    info!(
        imported = summary.imported,
        skipped = summary.skipped,
        extended = summary.extended,
        failed = summary.failed,
        "batch finished"
    );
    summary
}

/// Run one file's import on the blocking pool.
pub(crate) async fn import_one(
    path: &Path,
    config: &ImportConfig,
    inventory: &Arc<TourInventory>,
    elevation: &Arc<dyn ElevationModel>,
) -> Result<ImportOutcome> {
    let task_path = path.to_path_buf();
    let config = config.clone();
    let inventory = Arc::clone(inventory);
    let elevation = Arc::clone(elevation);

    tokio::task::spawn_blocking(move || {
        pipeline::import_file(&task_path, &config, &inventory, elevation.as_ref())
    })
    .await
    .map_err(|join_error| {
        ImportError::file_error(
            path.to_path_buf(),
            std::io::Error::other(format!("import task panicked: {join_error}")),
        )
    })?
}

/// Group the batch so all parts of one recording share a worker, in part
/// order. Only the gzip JSON format splits recordings, everything else
/// keys by full path.
fn group_by_recording(paths: Vec<PathBuf>) -> Vec<Vec<PathBuf>> {
    let mut order = Vec::new();
    let mut groups: HashMap<String, Vec<(Option<u32>, PathBuf)>> = HashMap::new();

    for path in paths {
        let key = match SourceFormat::detect(&path) {
            Some(SourceFormat::JsonLog) => part_key(&path).0,
            _ => path.to_string_lossy().into_owned(),
        };
        let part = part_key(&path).1;
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push((part, path));
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|mut files| {
            files.sort_by_key(|(part, _)| part.unwrap_or(0));
            files.into_iter().map(|(_, path)| path).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::elevation::MinDifferenceModel;
    use crate::test_utils::{ScratchDir, gzip_text, synthetic_ride_fit};

    use super::*;

    fn setup() -> (Arc<TourInventory>, Arc<dyn ElevationModel>) {
        (Arc::new(TourInventory::new()), Arc::new(MinDifferenceModel::default()))
    }

    fn json_log(entries: &[String]) -> Vec<u8> {
        gzip_text(&format!("{{\"Samples\":[{}]}}\n", entries.join(",")))
    }

    fn json_entry(time: &str, body: &str) -> String {
        format!("{{\"TimeISO8601\":\"{time}\",\"Attributes\":{{\"Sample\":{{{body}}}}}}}")
    }

    #[tokio::test]
    async fn distinct_recordings_all_import() -> Result<()> {
        let dir = ScratchDir::new("batch-two");
        let first = dir.file("morning.fit");
        let second = dir.file("evening.fit");
        std::fs::write(&first, synthetic_ride_fit(30))?;
        std::fs::write(&second, synthetic_ride_fit(45))?;

        let (inventory, elevation) = setup();
        let summary = import_batch(
            vec![first, second],
            ImportConfig::default(),
            Arc::clone(&inventory),
            elevation,
            BatchOptions::default(),
        )
        .await;

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(inventory.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn identical_content_under_two_names_imports_once() -> Result<()> {
        let dir = ScratchDir::new("batch-dup");
        let bytes = synthetic_ride_fit(30);
        let first = dir.file("ride.fit");
        let second = dir.file("ride-copy.fit");
        std::fs::write(&first, &bytes)?;
        std::fs::write(&second, &bytes)?;

        let (inventory, elevation) = setup();
        let summary = import_batch(
            vec![first, second],
            ImportConfig::default(),
            Arc::clone(&inventory),
            elevation,
            BatchOptions::default(),
        )
        .await;

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(inventory.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn continuation_parts_merge_even_when_listed_out_of_order() -> Result<()> {
        let dir = ScratchDir::new("batch-parts");
        let part_one = dir.file("commute-1.json.gz");
        let part_two = dir.file("commute-2.json.gz");
        std::fs::write(
            &part_one,
            json_log(&[
                json_entry("2018-07-01T08:00:00Z", "\"Lap\":{\"Type\":\"Start\"}"),
                json_entry("2018-07-01T08:00:01Z", "\"HR\":2.0,\"Distance\":10"),
                json_entry("2018-07-01T08:00:02Z", "\"HR\":2.0,\"Distance\":20"),
            ]),
        )?;
        std::fs::write(
            &part_two,
            json_log(&[
                json_entry("2018-07-01T08:00:03Z", "\"HR\":2.1,\"Distance\":30"),
                json_entry("2018-07-01T08:00:04Z", "\"HR\":2.1,\"Distance\":40"),
            ]),
        )?;

        let (inventory, elevation) = setup();
        // Deliberately listed continuation-first
        let summary = import_batch(
            vec![part_two, part_one],
            ImportConfig::default(),
            Arc::clone(&inventory),
            elevation,
            BatchOptions::default(),
        )
        .await;

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.extended, 1);
        assert_eq!(summary.failed, 0);

        let tours = inventory.newly_imported();
        assert_eq!(tours.len(), 1);
        assert_eq!(tours[0].samples.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn a_corrupt_file_does_not_abort_the_batch() -> Result<()> {
        let dir = ScratchDir::new("batch-corrupt");
        let good = dir.file("good.fit");
        let bad = dir.file("bad.fit");
        std::fs::write(&good, synthetic_ride_fit(30))?;
        let mut broken = synthetic_ride_fit(30);
        let last = broken.len() - 1;
        broken[last] ^= 0x55;
        std::fs::write(&bad, broken)?;

        let (inventory, elevation) = setup();
        let summary = import_batch(
            vec![bad, good],
            ImportConfig::default(),
            Arc::clone(&inventory),
            elevation,
            BatchOptions::default(),
        )
        .await;

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(inventory.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn pre_cancelled_batch_processes_nothing() -> Result<()> {
        let dir = ScratchDir::new("batch-cancel");
        let path = dir.file("ride.fit");
        std::fs::write(&path, synthetic_ride_fit(30))?;

        let options = BatchOptions::default();
        options.cancel.cancel();

        let (inventory, elevation) = setup();
        let summary = import_batch(
            vec![path],
            ImportConfig::default(),
            Arc::clone(&inventory),
            elevation,
            options,
        )
        .await;

        assert!(summary.outcomes.is_empty());
        assert!(inventory.is_empty());
        Ok(())
    }

    #[test]
    fn grouping_keeps_parts_together_and_ordered() {
        let paths = vec![
            PathBuf::from("rides/tour-2.json.gz"),
            PathBuf::from("rides/other.fit"),
            PathBuf::from("rides/tour-1.json.gz"),
        ];
        let groups = group_by_recording(paths);

        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[0],
            vec![PathBuf::from("rides/tour-1.json.gz"), PathBuf::from("rides/tour-2.json.gz")]
        );
        assert_eq!(groups[1], vec![PathBuf::from("rides/other.fit")]);
    }
}
