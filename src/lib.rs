//! Decode and reconcile GPS/fitness device recordings into activities.
//!
//! Tracklog reads the recording formats written by sports watches and bike
//! computers and turns each file into a canonical per-second activity
//! time series with resolved markers, gear changes, pauses and aggregate
//! statistics.
//!
//! # Features
//!
//! - **Three wire formats**: a framed binary format with CRC-16 integrity
//!   checks, two XML dialects, and gzip-compressed JSON-lines logs
//! - **One pipeline**: every format decodes to the same record stream and
//!   flows through the same reconciliation stages
//! - **Idempotent imports**: activities carry a content-derived identity,
//!   so re-importing a recording is detected and skipped
//! - **Concurrent batches**: files import in parallel on a bounded pool;
//!   parts of a split recording stay ordered and merge into one activity
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tracklog::{ImportConfig, Tracklog};
//!
//! #[tokio::main]
//! async fn main() {
//!     let importer = Tracklog::new(ImportConfig::default());
//!     let summary = importer
//!         .import_batch(vec!["rides/morning.fit".into()], Default::default())
//!         .await;
//!     println!("{} imported, {} failed", summary.imported, summary.failed);
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Decode and reconciliation stages
pub mod config;
pub mod decode;
pub mod elevation;
pub mod pipeline;

// Import orchestration
pub mod batch;
pub mod store;

// Core exports
pub use error::*;
pub use types::*;

pub use batch::{BatchOptions, BatchSummary, FileOutcome};
pub use config::ImportConfig;
pub use decode::{RecordDecoder, SourceFormat, open_decoder};
pub use elevation::{ElevationGain, ElevationModel, MinDifferenceModel};
pub use pipeline::ImportOutcome;
pub use store::{TourInventory, TourRepository};

/// Unified entry point for recording imports.
///
/// Owns the import configuration, the shared [`TourInventory`] and the
/// elevation model, and runs decoding on the blocking thread pool so it can
/// be driven from async services.
///
/// # Examples
///
/// ```rust,no_run
/// use tracklog::{ImportConfig, Tracklog};
///
/// #[tokio::main]
/// async fn main() -> tracklog::Result<()> {
///     let importer = Tracklog::new(ImportConfig::default());
///     let outcome = importer.import_file("rides/morning.fit").await?;
///     println!("{:?}", outcome);
///     Ok(())
/// }
/// ```
pub struct Tracklog {
    config: ImportConfig,
    inventory: Arc<TourInventory>,
    elevation: Arc<dyn ElevationModel>,
}

impl Tracklog {
    /// Create an importer with a fresh inventory.
    ///
    /// The elevation model defaults to [`MinDifferenceModel`] tuned by
    /// [`ImportConfig::elevation_min_difference`].
    pub fn new(config: ImportConfig) -> Self {
        let elevation = Arc::new(MinDifferenceModel::new(config.elevation_min_difference));
        Self { config, inventory: Arc::new(TourInventory::new()), elevation }
    }

    /// Replace the elevation model used when computing ascent and descent.
    pub fn with_elevation_model(mut self, model: Arc<dyn ElevationModel>) -> Self {
        self.elevation = model;
        self
    }

    /// Seed an identity imported by an earlier run so it is skipped here.
    pub fn mark_already_imported(&self, identity: TourIdentity) {
        self.inventory.mark_already_imported(identity);
    }

    /// Import one recording file.
    pub async fn import_file<P: AsRef<Path>>(&self, path: P) -> Result<ImportOutcome> {
        batch::import_one(path.as_ref(), &self.config, &self.inventory, &self.elevation).await
    }

    /// Import a set of recording files concurrently.
    ///
    /// Never fails as a whole; per-file errors are reported in the
    /// returned [`BatchSummary`].
    pub async fn import_batch(&self, paths: Vec<PathBuf>, options: BatchOptions) -> BatchSummary {
        batch::import_batch(
            paths,
            self.config.clone(),
            Arc::clone(&self.inventory),
            Arc::clone(&self.elevation),
            options,
        )
        .await
    }

    /// Activities registered since this importer was created.
    pub fn new_tours(&self) -> Vec<Activity> {
        self.inventory.newly_imported()
    }

    /// The shared inventory, for callers that persist tours themselves.
    pub fn inventory(&self) -> &Arc<TourInventory> {
        &self.inventory
    }
}
