//! `run_manifest.json`: what each stage produced in one run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use taxi_audit_analytics::{AnalyticsError, TableOutcome};
use taxi_audit_analytics_models::{RunStatistics, TableName};
use taxi_audit_ingest::BatchOutcome;
use taxi_audit_ingest::batch::BatchReport;
use taxi_audit_ingest::impute::ImputationReport;

use crate::{OutputError, write_rows};

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// File name of the manifest inside the results directory.
pub const MANIFEST_FILE_NAME: &str = "run_manifest.json";

/// What happened to one raw batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    /// Normalized and classified.
    Processed(BatchReport),
    /// Skipped.
    Failed {
        /// Raw file name.
        file_name: String,
        /// Why it was skipped.
        message: String,
    },
}

impl From<&BatchOutcome> for BatchEntry {
    fn from(outcome: &BatchOutcome) -> Self {
        match &outcome.result {
            Ok(report) => Self::Processed(report.clone()),
            Err(e) => Self::Failed {
                file_name: outcome.file_name.clone(),
                message: e.to_string(),
            },
        }
    }
}

/// What the imputation stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImputationEntry {
    /// The target period had real batches.
    #[default]
    NotNeeded,
    /// A synthetic batch was written.
    Imputed(ImputationReport),
    /// Imputation was attempted and failed; the run continued without it.
    Failed {
        /// Why it failed.
        message: String,
    },
}

/// Publication status of a derived table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    /// The CSV file is current.
    Written {
        /// Published file.
        path: PathBuf,
        /// Rows in the file.
        row_count: u64,
        /// When the file was renamed into place.
        written_at: DateTime<Utc>,
    },
    /// Building or writing the table failed.
    Failed {
        /// Error message.
        message: String,
    },
    /// An input the table needs does not exist.
    Unavailable {
        /// What was missing.
        reason: String,
    },
}

/// One derived table in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    /// Published name.
    pub name: TableName,
    /// What happened to it.
    #[serde(flatten)]
    pub status: TableStatus,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    /// Schema version.
    pub version: u32,
    /// When the manifest was assembled.
    pub generated_at: DateTime<Utc>,
    /// Raw batches, sorted by file name.
    pub batches: Vec<BatchEntry>,
    /// Imputation stage.
    pub imputation: ImputationEntry,
    /// Derived tables, in publication order.
    pub tables: Vec<TableEntry>,
    /// Figures computed from the tables.
    pub statistics: RunStatistics,
}

impl RunManifest {
    /// Starts a manifest from the ingestion results.
    #[must_use]
    pub fn new(batches: &[BatchOutcome]) -> Self {
        Self {
            version: MANIFEST_VERSION,
            generated_at: Utc::now(),
            batches: batches.iter().map(BatchEntry::from).collect(),
            imputation: ImputationEntry::default(),
            tables: Vec::new(),
            statistics: RunStatistics::default(),
        }
    }

    /// Number of tables with the given status kind.
    #[must_use]
    pub fn count_tables(&self, predicate: impl Fn(&TableStatus) -> bool) -> usize {
        self.tables.iter().filter(|t| predicate(&t.status)).count()
    }

    /// Writes the manifest to `dir/run_manifest.json`.
    ///
    /// Uses the same write-then-rename pattern as the tables.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] if the file cannot be written.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, OutputError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(MANIFEST_FILE_NAME);
        let tmp_path = dir.join(format!("{MANIFEST_FILE_NAME}.tmp"));
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &path)?;
        log::info!("Saved manifest to {}", path.display());
        Ok(path)
    }
}

/// Writes every successfully built table and returns one manifest entry
/// per outcome, in the order given.
///
/// A table whose input was missing is `unavailable`; any other build error
/// or a write error makes it `failed`. One table failing never stops the
/// rest.
pub fn publish_tables(dir: &Path, outcomes: &[TableOutcome]) -> Vec<TableEntry> {
    outcomes
        .iter()
        .map(|outcome| {
            let status = match &outcome.result {
                Ok(rows) => match write_rows(dir, rows) {
                    Ok(path) => TableStatus::Written {
                        path,
                        row_count: rows.len() as u64,
                        written_at: Utc::now(),
                    },
                    Err(e) => {
                        log::error!("{}: write failed: {e}", outcome.name);
                        TableStatus::Failed {
                            message: e.to_string(),
                        }
                    }
                },
                Err(AnalyticsError::MissingInput { message }) => TableStatus::Unavailable {
                    reason: message.clone(),
                },
                Err(e) => TableStatus::Failed {
                    message: e.to_string(),
                },
            };
            TableEntry {
                name: outcome.name,
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxi_audit_analytics_models::{FraudCount, TableRows};
    use taxi_audit_ingest::IngestError;
    use taxi_audit_trip_models::VehicleClass;

    fn outcomes() -> Vec<TableOutcome> {
        vec![
            TableOutcome {
                name: TableName::SummaryFraud,
                result: Ok(TableRows::Fraud(vec![FraudCount {
                    violation_type: "Teleporter".to_string(),
                    violation_count: 3,
                }])),
            },
            TableOutcome {
                name: TableName::BorderEffect,
                result: Err(AnalyticsError::MissingInput {
                    message: "no raw 2024 batches".to_string(),
                }),
            },
            TableOutcome {
                name: TableName::CrowdingOut,
                result: Err(AnalyticsError::Conversion {
                    message: "negative count -1".to_string(),
                }),
            },
        ]
    }

    #[test]
    fn table_statuses_follow_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let entries = publish_tables(dir.path(), &outcomes());

        assert_eq!(entries.len(), 3);
        assert!(matches!(
            &entries[0].status,
            TableStatus::Written { row_count: 1, path, .. } if path.ends_with("summary_fraud.csv")
        ));
        assert!(matches!(entries[1].status, TableStatus::Unavailable { .. }));
        assert!(matches!(entries[2].status, TableStatus::Failed { .. }));

        assert!(dir.path().join("summary_fraud.csv").exists());
        assert!(!dir.path().join("border_effect.csv").exists());
        assert!(!dir.path().join("crowding_out.csv").exists());
    }

    #[test]
    fn manifest_serializes_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let batches = vec![
            BatchOutcome {
                file_name: "fhv_tripdata_2025-01.parquet".to_string(),
                result: Err(IngestError::SchemaMismatch {
                    file: "fhv_tripdata_2025-01.parquet".to_string(),
                }),
            },
            BatchOutcome {
                file_name: "yellow_tripdata_2025-01.parquet".to_string(),
                result: Ok(BatchReport {
                    file_name: "yellow_tripdata_2025-01.parquet".to_string(),
                    vehicle_class: VehicleClass::Yellow,
                    total_rows: 3,
                    rejected_rows: 0,
                    clean_rows: 1,
                    audit_rows: 2,
                }),
            },
        ];

        let mut manifest = RunManifest::new(&batches);
        manifest.tables = publish_tables(dir.path(), &outcomes());
        manifest.statistics.q1_pct_change = Some(-20.0);
        let path = manifest.save(dir.path()).unwrap();

        assert_eq!(path.file_name().unwrap(), MANIFEST_FILE_NAME);
        assert!(!dir.path().join("run_manifest.json.tmp").exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["batches"][0]["status"], "failed");
        assert_eq!(json["batches"][1]["status"], "processed");
        assert_eq!(json["batches"][1]["clean_rows"], 1);
        assert_eq!(json["batches"][1]["vehicle_class"], "yellow");
        assert_eq!(json["imputation"]["status"], "not_needed");
        assert_eq!(json["tables"][0]["name"], "summary_fraud");
        assert_eq!(json["tables"][0]["status"], "written");
        assert_eq!(json["tables"][0]["row_count"], 1);
        assert_eq!(json["tables"][1]["status"], "unavailable");
        assert_eq!(json["tables"][1]["reason"], "no raw 2024 batches");
        assert_eq!(json["tables"][2]["status"], "failed");
        assert_eq!(json["statistics"]["q1_pct_change"], -20.0);
        assert!(json["statistics"]["weather_correlation"].is_null());

        assert_eq!(
            manifest.count_tables(|s| matches!(s, TableStatus::Written { .. })),
            1
        );
    }
}
