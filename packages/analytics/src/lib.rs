#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregation stage of the taxi audit pipeline.
//!
//! Every derived table is a read-only query over the clean partition,
//! optionally joined with raw baseline-year batches or the simulated
//! precipitation series. Each table is built on its own engine connection
//! so tables can be computed in parallel and fail independently.

pub mod crowding;
pub mod impact;
pub mod leakage;
pub mod stats;
pub mod summary;
pub mod velocity;
pub mod weather;

use std::path::PathBuf;
use std::sync::Arc;

use duckdb::Connection;
use taxi_audit_analytics_models::{TableName, TableRows};
use taxi_audit_config::{AnalysisConfig, AuditConfig, EngineConfig, WeatherConfig};
use taxi_audit_database::paths::{DataPaths, list_parquet_files};
use taxi_audit_database::{DbError, open_in_memory, sql_path_list};
use taxi_audit_trip_models::{Period, VehicleClass};
use thiserror::Error;

/// Errors that can occur during analytics operations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Engine or filesystem error.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Query failed.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// An input the table depends on does not exist.
    #[error("Missing input: {message}")]
    MissingInput {
        /// What was missing.
        message: String,
    },

    /// Data conversion error.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Everything the aggregations read.
#[derive(Debug, Clone)]
pub struct AnalysisInputs {
    /// Files in the clean partition, including any imputed batch.
    pub clean_files: Vec<PathBuf>,
    /// Raw batch directory, for baseline-year comparisons.
    pub raw_dir: PathBuf,
    /// Windows and constants.
    pub analysis: AnalysisConfig,
    /// Precipitation simulation settings.
    pub weather: WeatherConfig,
    /// Engine settings for each table's connection.
    pub engine: EngineConfig,
}

impl AnalysisInputs {
    /// Collects the clean partition as it exists on disk.
    #[must_use]
    pub fn new(paths: &DataPaths, config: &AuditConfig) -> Self {
        Self {
            clean_files: list_parquet_files(&paths.clean_dir()),
            raw_dir: paths.raw.clone(),
            analysis: config.analysis.clone(),
            weather: config.weather.clone(),
            engine: config.engine.clone(),
        }
    }

    /// `read_parquet(...)` over the clean partition.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::MissingInput`] when the partition is empty.
    pub fn clean_source(&self) -> Result<String, AnalyticsError> {
        if self.clean_files.is_empty() {
            return Err(AnalyticsError::MissingInput {
                message: "clean partition is empty".to_string(),
            });
        }
        Ok(format!(
            "read_parquet({}, union_by_name = true)",
            sql_path_list(&self.clean_files)
        ))
    }

    /// Raw batches of the given dialects for the baseline year's
    /// comparison months.
    #[must_use]
    pub fn baseline_files(&self, classes: &[VehicleClass]) -> Vec<PathBuf> {
        list_parquet_files(&self.raw_dir)
            .into_iter()
            .filter(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let in_window = Period::from_file_name(&name).is_some_and(|p| {
                    p.year == self.analysis.baseline_year
                        && self.analysis.comparison_months.contains(&p.month)
                });
                let dialect_ok = VehicleClass::from_file_name(&name)
                    .is_some_and(|class| classes.contains(&class));
                in_window && dialect_ok
            })
            .collect()
    }

    /// Baseline raw batches as a subquery, restricted to rows whose pickup
    /// falls in the baseline year's comparison months. Batches routinely
    /// carry a few stray rows from neighbouring months and years.
    ///
    /// The pickup column is coalesced across the dialects actually present.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError::MissingInput`] when no baseline batch
    /// exists.
    pub fn baseline_source(&self, classes: &[VehicleClass]) -> Result<String, AnalyticsError> {
        let files = self.baseline_files(classes);
        if files.is_empty() {
            return Err(AnalyticsError::MissingInput {
                message: format!(
                    "no raw {} batches for months {:?}",
                    self.analysis.baseline_year, self.analysis.comparison_months
                ),
            });
        }

        let mut present: Vec<VehicleClass> = files
            .iter()
            .filter_map(|path| {
                path.file_name()
                    .and_then(|n| VehicleClass::from_file_name(&n.to_string_lossy()))
            })
            .collect();
        present.sort();
        present.dedup();
        let pickups: Vec<String> = present
            .iter()
            .map(|class| format!("CAST({} AS TIMESTAMP)", class.columns().pickup))
            .collect();
        let pickup = match pickups.as_slice() {
            [only] => only.clone(),
            _ => format!("COALESCE({})", pickups.join(", ")),
        };

        Ok(format!(
            "(SELECT * FROM read_parquet({}, union_by_name = true) WHERE {})",
            sql_path_list(&files),
            self.window_filter(&pickup, self.analysis.baseline_year)
        ))
    }

    /// `year(column) = year AND month(column) IN (...)` for the comparison
    /// months of `year`.
    #[must_use]
    pub fn window_filter(&self, column: &str, year: i32) -> String {
        let months: Vec<String> = self
            .analysis
            .comparison_months
            .iter()
            .map(ToString::to_string)
            .collect();
        format!(
            "(year({column}) = {year} AND month({column}) IN ({}))",
            months.join(", ")
        )
    }

    /// [`Self::window_filter`] for the target year.
    #[must_use]
    pub fn comparison_filter(&self, column: &str) -> String {
        self.window_filter(column, self.analysis.target_year)
    }
}

/// Result of building one derived table.
#[derive(Debug)]
pub struct TableOutcome {
    /// Table that was attempted.
    pub name: TableName,
    /// Rows on success.
    pub result: Result<TableRows, AnalyticsError>,
}

/// Builds a single derived table on a fresh connection.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if an input is missing or a query fails.
pub fn build_table(name: TableName, inputs: &AnalysisInputs) -> Result<TableRows, AnalyticsError> {
    let conn = open_in_memory(&inputs.engine)?;
    build_with(&conn, name, inputs)
}

fn build_with(
    conn: &Connection,
    name: TableName,
    inputs: &AnalysisInputs,
) -> Result<TableRows, AnalyticsError> {
    Ok(match name {
        TableName::SummaryRevenue => TableRows::Revenue(vec![summary::revenue(conn, inputs)?]),
        TableName::SummaryFairness => TableRows::Fairness(vec![summary::fairness(conn, inputs)?]),
        TableName::SummaryFraud => TableRows::Fraud(summary::fraud(conn, inputs)?),
        TableName::AuditSuspiciousOrigins => {
            TableRows::SuspiciousOrigins(summary::suspicious_origins(conn, inputs)?)
        }
        TableName::AuditLeakageStats => TableRows::Leakage(vec![leakage::stats(conn, inputs)?]),
        TableName::AuditTopLeakageLocs => {
            TableRows::LeakyOrigins(leakage::top_origins(conn, inputs)?)
        }
        TableName::ImpactQ1Comparison => {
            TableRows::PeriodVolumes(impact::period_volumes(conn, inputs)?)
        }
        TableName::BorderEffect => TableRows::Border(impact::border_effect(conn, inputs)?),
        TableName::VelocityHeatmap => TableRows::Velocity(velocity::comparison(conn, inputs)?),
        TableName::VelocityHeatmapBaseline => {
            TableRows::VelocityBaseline(velocity::baseline(conn, inputs)?)
        }
        TableName::CrowdingOut => TableRows::Crowding(crowding::monthly(conn, inputs)?),
        TableName::WeatherElasticity => TableRows::Weather(weather::elasticity(conn, inputs)?),
        TableName::WeatherSimulated => TableRows::Precipitation(weather::simulate_precipitation(
            inputs.analysis.target_year,
            &inputs.weather,
        )?),
    })
}

/// Builds every derived table, up to `engine.max_parallel` at a time.
///
/// Outcomes are returned in [`TableName::all`] order.
pub async fn build_all(inputs: Arc<AnalysisInputs>) -> Vec<TableOutcome> {
    use futures::stream::{self, StreamExt as _};

    let concurrency = inputs.engine.max_parallel;
    log::info!(
        "Building {} derived tables (concurrency={concurrency})...",
        TableName::all().len()
    );

    let mut outcomes: Vec<TableOutcome> =
        stream::iter(TableName::all().iter().copied().map(|name| {
            let inputs = Arc::clone(&inputs);
            async move {
                let result = tokio::task::spawn_blocking(move || build_table(name, &inputs))
                    .await
                    .map_err(AnalyticsError::from)
                    .and_then(|r| r);

                match &result {
                    Ok(rows) => log::info!("{name}: {} rows", rows.len()),
                    Err(e) => log::warn!("{name}: {e}"),
                }

                TableOutcome { name, result }
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;

    outcomes.sort_by_key(|o| TableName::all().iter().position(|n| *n == o.name));
    outcomes
}

/// Converts an engine count to `u64`.
pub(crate) fn to_count(value: i64) -> Result<u64, AnalyticsError> {
    u64::try_from(value).map_err(|_| AnalyticsError::Conversion {
        message: format!("negative count {value}"),
    })
}

/// Converts a small engine integer (weekday, hour, zone) to `u32`.
pub(crate) fn to_u32(value: i64) -> Result<u32, AnalyticsError> {
    u32::try_from(value).map_err(|_| AnalyticsError::Conversion {
        message: format!("value {value} out of range"),
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{inputs, repeat, write_clean, write_raw};

    #[test]
    fn empty_clean_partition_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = inputs(dir.path(), vec![]);
        assert!(matches!(
            build_table(TableName::SummaryRevenue, &inputs),
            Err(AnalyticsError::MissingInput { .. })
        ));
        assert!(build_table(TableName::WeatherSimulated, &inputs).is_ok());
    }

    #[test]
    fn baseline_files_respect_window_and_dialect() {
        let dir = tempfile::tempdir().unwrap();
        let row = "TIMESTAMP '2024-01-02 10:00:00' AS pickup_time, \
                   TIMESTAMP '2024-01-02 10:10:00' AS dropoff_time, \
                   100 AS PULocationID, 161 AS DOLocationID, 1.0 AS trip_distance";
        for name in [
            "yellow_tripdata_2024-01.parquet",
            "green_tripdata_2024-02.parquet",
            "yellow_tripdata_2024-06.parquet",
            "yellow_tripdata_2023-01.parquet",
        ] {
            write_raw(dir.path(), name, &repeat(1, row));
        }
        let inputs = inputs(dir.path(), vec![]);

        assert_eq!(inputs.baseline_files(VehicleClass::all()).len(), 2);
        assert_eq!(inputs.baseline_files(&[VehicleClass::Yellow]).len(), 1);
        assert_eq!(
            inputs.comparison_filter("pickup_time"),
            "(year(pickup_time) = 2025 AND month(pickup_time) IN (1, 2, 3))"
        );
        assert_eq!(
            inputs.baseline_source(&[VehicleClass::Green]).unwrap(),
            format!(
                "(SELECT * FROM read_parquet({}, union_by_name = true) \
                 WHERE (year(CAST(lpep_pickup_datetime AS TIMESTAMP)) = 2024 \
                 AND month(CAST(lpep_pickup_datetime AS TIMESTAMP)) IN (1, 2, 3)))",
                sql_path_list(&inputs.baseline_files(&[VehicleClass::Green]))
            )
        );
    }

    #[tokio::test]
    async fn builds_every_table_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let clean = write_clean(
            dir.path(),
            "yellow_tripdata_2025-01.parquet",
            &repeat(
                3,
                "TIMESTAMP '2025-01-06 08:00:00' AS pickup_time, \
                 TIMESTAMP '2025-01-06 08:12:00' AS dropoff_time, \
                 100 AS pickup_zone, 161 AS dropoff_zone, 1.5 AS trip_distance, \
                 10.0 AS fare, 15.0 AS total_amount, 2.5 AS congestion_surcharge",
            ),
        );
        let inputs = Arc::new(inputs(dir.path(), vec![clean]));

        let outcomes = build_all(inputs).await;
        let names: Vec<TableName> = outcomes.iter().map(|o| o.name).collect();
        assert_eq!(names, TableName::all());

        for outcome in &outcomes {
            match outcome.name {
                // No raw baseline batches exist in this fixture.
                TableName::ImpactQ1Comparison
                | TableName::BorderEffect
                | TableName::VelocityHeatmapBaseline => assert!(
                    matches!(outcome.result, Err(AnalyticsError::MissingInput { .. })),
                    "{}",
                    outcome.name
                ),
                _ => assert!(outcome.result.is_ok(), "{}: {:?}", outcome.name, outcome.result),
            }
        }
    }
}
