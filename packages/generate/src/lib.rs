#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Publishes derived tables as flat CSV files.
//!
//! Every table is written to `{name}.csv.tmp` and renamed into place, so a
//! reader sees either the previous complete file or the new one. Null
//! values become empty cells. A table with no rows still gets its header
//! line.
//!
//! The [`manifest`] module records what happened to every table (and every
//! batch) in `run_manifest.json`.

pub mod manifest;

use std::path::{Path, PathBuf};

use serde::Serialize;
use taxi_audit_analytics_models::{TableName, TableRows};
use thiserror::Error;

/// Errors that can occur while persisting outputs.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Header of each published table, in field order.
#[must_use]
pub const fn columns(name: TableName) -> &'static [&'static str] {
    match name {
        TableName::SummaryRevenue => &["total_revenue", "total_surcharge", "total_rides"],
        TableName::SummaryFairness => &["avg_tip_percent", "short_trip_count"],
        TableName::SummaryFraud => &["violation_type", "violation_count"],
        TableName::AuditSuspiciousOrigins => &["origin_zone", "suspicious_trip_count"],
        TableName::AuditLeakageStats => &[
            "total_eligible",
            "compliant_count",
            "compliance_rate_pct",
            "estimated_revenue_loss",
        ],
        TableName::AuditTopLeakageLocs => &[
            "origin_zone",
            "trip_count",
            "missed_surcharge_count",
            "leakage_rate_pct",
        ],
        TableName::ImpactQ1Comparison => &["period_label", "trip_count"],
        TableName::BorderEffect => &["zone_id", "pct_change", "location_type"],
        TableName::VelocityHeatmap | TableName::VelocityHeatmapBaseline => {
            &["day_of_week", "hour_of_day", "avg_speed"]
        }
        TableName::CrowdingOut => &["month", "avg_surcharge", "avg_tip_pct"],
        TableName::WeatherElasticity => &["date", "trip_count", "prcp_mm"],
        TableName::WeatherSimulated => &["date", "prcp_mm"],
    }
}

/// Writes `rows` as `dir/{name}.csv`.
///
/// Returns the path of the published file.
///
/// # Errors
///
/// Returns [`OutputError`] if the file cannot be written or renamed. The
/// previous file, if any, is left untouched in that case.
pub fn write_table<T: Serialize>(
    dir: &Path,
    name: TableName,
    rows: &[T],
) -> Result<PathBuf, OutputError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name.file_name());
    let tmp_path = dir.join(format!("{}.tmp", name.file_name()));

    if let Err(e) = write_csv(&tmp_path, columns(name), rows) {
        std::fs::remove_file(&tmp_path).ok();
        return Err(e);
    }

    std::fs::rename(&tmp_path, &path)?;
    log::debug!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(path)
}

fn write_csv<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<(), OutputError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a built table under its published name.
///
/// # Errors
///
/// Returns [`OutputError`] if the file cannot be written.
pub fn write_rows(dir: &Path, rows: &TableRows) -> Result<PathBuf, OutputError> {
    let name = rows.name();
    match rows {
        TableRows::Revenue(r) => write_table(dir, name, r),
        TableRows::Fairness(r) => write_table(dir, name, r),
        TableRows::Fraud(r) => write_table(dir, name, r),
        TableRows::SuspiciousOrigins(r) => write_table(dir, name, r),
        TableRows::Leakage(r) => write_table(dir, name, r),
        TableRows::LeakyOrigins(r) => write_table(dir, name, r),
        TableRows::PeriodVolumes(r) => write_table(dir, name, r),
        TableRows::Border(r) => write_table(dir, name, r),
        TableRows::Velocity(r) | TableRows::VelocityBaseline(r) => write_table(dir, name, r),
        TableRows::Crowding(r) => write_table(dir, name, r),
        TableRows::Weather(r) => write_table(dir, name, r),
        TableRows::Precipitation(r) => write_table(dir, name, r),
    }
}
