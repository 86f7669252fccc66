#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion stage of the taxi audit pipeline.
//!
//! Raw TLC batches are discovered in the raw directory, normalized into the
//! canonical trip shape, and split into `clean/` and `audit/` partitions
//! under the processed directory. When the period under audit has no raw
//! batch, [`impute`] synthesizes one from earlier years.

pub mod batch;
pub mod impute;
pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use taxi_audit_config::EngineConfig;
use taxi_audit_database::DbError;
use taxi_audit_database::paths::{DataPaths, list_parquet_files};
use taxi_audit_trip_models::{Period, TRIPDATA_MARKER};

use crate::batch::{BatchFile, BatchReport, process_batch};
use crate::progress::ProgressCallback;

/// Errors that can occur during ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Engine or filesystem error.
    #[error(transparent)]
    Db(#[from] DbError),

    /// `DuckDB` error while reading or staging a batch.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// The batch's dialect could not be inferred from its name.
    #[error("Schema mismatch: no dialect marker in file name '{file}'")]
    SchemaMismatch {
        /// Offending file name.
        file: String,
    },

    /// No raw batch exists for any period an imputation draws from.
    #[error("No source batches to impute {period} from")]
    NoImputationSources {
        /// Period that could not be synthesized.
        period: Period,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of one raw file passing through ingestion.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Raw file name.
    pub file_name: String,
    /// Report on success, or why the batch was skipped.
    pub result: Result<BatchReport, IngestError>,
}

/// Lists raw batches for `year` (`*_tripdata_{year}-*.parquet`), sorted by
/// file name.
#[must_use]
pub fn discover_batches(raw_dir: &Path, year: i32) -> Vec<PathBuf> {
    let needle = format!("{TRIPDATA_MARKER}{year:04}-");
    list_parquet_files(raw_dir)
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().contains(&needle))
        })
        .collect()
}

/// Lists raw batches for a single period, any dialect.
#[must_use]
pub fn batches_for_period(raw_dir: &Path, period: Period) -> Vec<PathBuf> {
    let needle = format!("{TRIPDATA_MARKER}{period}.");
    list_parquet_files(raw_dir)
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().contains(&needle))
        })
        .collect()
}

/// `true` when any of `files` belongs to `period`.
#[must_use]
pub fn period_present(files: &[PathBuf], period: Period) -> bool {
    files.iter().any(|path| {
        path.file_name()
            .and_then(|name| Period::from_file_name(&name.to_string_lossy()))
            == Some(period)
    })
}

/// Ingests every file in `files`, up to `engine.max_parallel` at a time.
///
/// Each batch runs on a blocking worker with its own engine connection. A
/// failing batch is reported in its [`BatchOutcome`] and never stops the
/// others. `progress` advances once per finished batch. Outcomes are
/// returned sorted by file name.
pub async fn ingest_batches(
    files: Vec<PathBuf>,
    engine: &EngineConfig,
    paths: &DataPaths,
    progress: Arc<dyn ProgressCallback>,
) -> Vec<BatchOutcome> {
    use futures::stream::{self, StreamExt as _};

    let clean_dir = paths.clean_dir();
    let audit_dir = paths.audit_dir();

    log::info!(
        "Ingesting {} batches (concurrency={})...",
        files.len(),
        engine.max_parallel
    );
    progress.set_total(files.len() as u64);

    let mut outcomes: Vec<BatchOutcome> = stream::iter(files.into_iter().map(|path| {
        let engine = engine.clone();
        let clean_dir = clean_dir.clone();
        let audit_dir = audit_dir.clone();
        let progress = Arc::clone(&progress);

        async move {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            progress.set_message(file_name.clone());
            let result = tokio::task::spawn_blocking(move || {
                let batch = BatchFile::from_path(&path)?;
                process_batch(&batch, &engine, &clean_dir, &audit_dir)
            })
            .await
            .map_err(IngestError::from)
            .and_then(|r| r);

            if let Err(e) = &result {
                log::error!("Skipping {file_name}: {e}");
            }
            progress.inc(1);

            BatchOutcome { file_name, result }
        }
    }))
    .buffer_unordered(engine.max_parallel)
    .collect()
    .await;

    outcomes.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    outcomes
}
