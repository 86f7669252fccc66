//! Stage orchestration.
//!
//! Chains ingest -> impute -> aggregate -> write, each stage fully
//! consuming the previous one's output. Only configuration errors and an
//! ingestion pass with no usable batch stop the run; everything else is
//! recorded in the run manifest and the run carries on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use taxi_audit_analytics::stats::run_statistics;
use taxi_audit_analytics::{AnalysisInputs, TableOutcome, build_all};
use taxi_audit_analytics_models::{RunStatistics, TableName, TableRows};
use taxi_audit_cli_utils::{IndicatifProgress, MultiProgress};
use taxi_audit_config::AuditConfig;
use taxi_audit_database::paths::{DataPaths, ensure_dir, reset_dir};
use taxi_audit_generate::manifest::{ImputationEntry, RunManifest, TableStatus, publish_tables};
use taxi_audit_ingest::impute::{ImputationPlan, impute};
use taxi_audit_ingest::{IngestError, discover_batches, ingest_batches, period_present};
use taxi_audit_trip_models::Period;

const TOTAL_STAGES: u64 = 4;

/// Runs every stage and returns the saved manifest.
///
/// # Errors
///
/// Returns an error if the directories are unusable, no raw batch could be
/// ingested, or the manifest cannot be saved.
#[allow(clippy::future_not_send, clippy::too_many_lines)]
pub async fn run(
    config: &AuditConfig,
    multi: &MultiProgress,
) -> Result<RunManifest, Box<dyn std::error::Error>> {
    let pipeline_start = Instant::now();
    let paths = DataPaths::resolve(&config.paths);
    let target_year = config.analysis.target_year;

    if paths.raw.starts_with(&paths.processed) {
        return Err(format!(
            "processed dir {} must not contain the raw dir {}",
            paths.processed.display(),
            paths.raw.display()
        )
        .into());
    }

    log::info!("Raw batches: {}", paths.raw.display());
    log::info!("Processed partitions: {}", paths.processed.display());
    log::info!("Results: {}", paths.results.display());

    let stages = IndicatifProgress::steps_bar(multi, "Stages", TOTAL_STAGES);

    // --- 1. Ingest ---
    stages.set_message(format!("[1/{TOTAL_STAGES}] Ingesting {target_year} batches"));
    reset_dir(&paths.clean_dir())?;
    reset_dir(&paths.audit_dir())?;

    let files = discover_batches(&paths.raw, target_year);
    if files.is_empty() {
        return Err(format!(
            "no {target_year} batches found in {}",
            paths.raw.display()
        )
        .into());
    }

    let batch_bar = IndicatifProgress::batch_bar(multi, "Ingesting");
    let batches = ingest_batches(files, &config.engine, &paths, Arc::clone(&batch_bar)).await;
    let ingested: Vec<PathBuf> = batches
        .iter()
        .filter(|outcome| outcome.result.is_ok())
        .map(|outcome| paths.raw.join(&outcome.file_name))
        .collect();
    batch_bar.finish(format!(
        "Ingested {}/{} batches",
        ingested.len(),
        batches.len()
    ));

    if ingested.is_empty() {
        return Err("ingestion produced no usable batches".into());
    }
    for report in batches.iter().filter_map(|o| o.result.as_ref().ok()) {
        log::info!(
            "{}: {} rows, {} clean, {} audit, {} rejected",
            report.file_name,
            report.total_rows,
            report.clean_rows,
            report.audit_rows,
            report.rejected_rows
        );
    }

    let mut manifest = RunManifest::new(&batches);
    stages.inc(1);

    // --- 2. Impute ---
    stages.set_message(format!("[2/{TOTAL_STAGES}] Checking for missing periods"));
    let target = Period::new(target_year, config.imputation.month)
        .ok_or_else(|| format!("invalid imputation month {}", config.imputation.month))?;

    if period_present(&ingested, target) {
        log::info!("{target} is present; no imputation needed");
    } else {
        log::info!("{target} is missing; imputing from earlier periods");
        let plan = ImputationPlan::new(&paths.raw, target, &config.imputation);
        let engine = config.engine.clone();
        let clean_dir = paths.clean_dir();

        let result = tokio::task::spawn_blocking(move || impute(&plan, &engine, &clean_dir))
            .await
            .map_err(IngestError::from)
            .and_then(|r| r);

        manifest.imputation = match result {
            Ok(report) => {
                for source in &report.contributions {
                    log::info!("{}: {} rows from {}", report.target, source.rows, source.period);
                }
                ImputationEntry::Imputed(report)
            }
            Err(e) => {
                log::warn!("Imputation of {target} failed, continuing without it: {e}");
                ImputationEntry::Failed {
                    message: e.to_string(),
                }
            }
        };
    }
    stages.inc(1);

    // --- 3. Aggregate ---
    stages.set_message(format!("[3/{TOTAL_STAGES}] Building derived tables"));
    let inputs = Arc::new(AnalysisInputs::new(&paths, config));
    let outcomes = build_all(inputs).await;
    stages.inc(1);

    // --- 4. Write ---
    stages.set_message(format!("[4/{TOTAL_STAGES}] Writing results"));
    ensure_dir(&paths.results)?;
    manifest.tables = publish_tables(&paths.results, &outcomes);
    manifest.statistics = statistics(&outcomes);
    log_statistics(&manifest.statistics);
    manifest.save(&paths.results)?;
    stages.inc(1);

    let written = manifest.count_tables(|s| matches!(s, TableStatus::Written { .. }));
    let unavailable = manifest.count_tables(|s| matches!(s, TableStatus::Unavailable { .. }));
    let failed = manifest.count_tables(|s| matches!(s, TableStatus::Failed { .. }));
    stages.finish(format!(
        "{written} tables written, {unavailable} unavailable, {failed} failed"
    ));

    log::info!(
        "Audit complete in {:.1}s",
        pipeline_start.elapsed().as_secs_f64()
    );

    Ok(manifest)
}

fn rows_of(outcomes: &[TableOutcome], name: TableName) -> Option<&TableRows> {
    outcomes
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.result.as_ref().ok())
}

/// Computes run statistics from whichever tables were built.
fn statistics(outcomes: &[TableOutcome]) -> RunStatistics {
    let volumes = match rows_of(outcomes, TableName::ImpactQ1Comparison) {
        Some(TableRows::PeriodVolumes(rows)) => Some(rows.as_slice()),
        _ => None,
    };
    let weather = match rows_of(outcomes, TableName::WeatherElasticity) {
        Some(TableRows::Weather(rows)) => Some(rows.as_slice()),
        _ => None,
    };
    run_statistics(volumes, weather)
}

fn log_statistics(stats: &RunStatistics) {
    match stats.q1_pct_change {
        Some(pct) => log::info!("Zone-bound trip volume change: {pct:+.2}%"),
        None => log::info!("Zone-bound trip volume change: unavailable"),
    }
    match (stats.weather_correlation, stats.elasticity) {
        (Some(r), Some(label)) => log::info!("Rain elasticity: r = {r:.4} ({label})"),
        _ => log::info!("Rain elasticity: unavailable"),
    }
    if let Some(month) = &stats.wettest_month {
        log::info!("Wettest month on trip days: {month}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;
    use taxi_audit_config::{DEFAULT_CONFIG_TOML, parse_config};
    use taxi_audit_database::{open_in_memory, sql_path};
    use taxi_audit_generate::manifest::{BatchEntry, MANIFEST_FILE_NAME};

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn config(root: &std::path::Path) -> AuditConfig {
        let mut config = parse_config(DEFAULT_CONFIG_TOML).unwrap();
        config.paths.raw_dir = Some(root.join("raw"));
        config.paths.processed_dir = Some(root.join("processed"));
        config.paths.results_dir = Some(root.join("results"));
        config.engine.threads = 1;
        config.engine.memory_limit = "256MB".to_string();
        config
    }

    /// Writes a yellow batch of `n` copies of one trip picked up at
    /// `pickup`.
    fn write_yellow(dir: &std::path::Path, period: &str, pickup: &str, n: u32) {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(format!("yellow_tripdata_{period}.parquet"));
        let conn = open_in_memory(&config(dir).engine).unwrap();
        conn.execute_batch(&format!(
            "COPY (
                SELECT
                    TIMESTAMP '{pickup}' AS tpep_pickup_datetime,
                    TIMESTAMP '{pickup}' + INTERVAL 12 MINUTE AS tpep_dropoff_datetime,
                    100 AS PULocationID,
                    161 AS DOLocationID,
                    2.0 AS trip_distance,
                    10.0 AS fare_amount,
                    15.0 AS total_amount,
                    2.5 AS congestion_surcharge
                FROM range({n})
            ) TO {} (FORMAT PARQUET)",
            sql_path(&path)
        ))
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        write_yellow(&raw, "2025-01", "2025-01-06 08:00:00", 4);
        write_yellow(&raw, "2024-01", "2024-01-08 08:00:00", 5);
        write_yellow(&raw, "2024-12", "2024-12-02 08:00:00", 10);
        std::fs::write(raw.join("yellow_tripdata_2025-02.parquet"), b"garbage").unwrap();

        let config = config(dir.path());
        let manifest = run(&config, &hidden()).await.unwrap();

        assert!(matches!(&manifest.batches[0], BatchEntry::Processed(r) if r.clean_rows == 4));
        assert!(matches!(&manifest.batches[1], BatchEntry::Failed { .. }));
        // December 2025 was synthesized from December 2024.
        assert!(matches!(manifest.imputation, ImputationEntry::Imputed(_)));
        assert!(dir
            .path()
            .join("processed/clean/imputed_2025-12.parquet")
            .exists());

        assert_eq!(manifest.tables.len(), TableName::all().len());
        let results = dir.path().join("results");
        assert!(results.join(MANIFEST_FILE_NAME).exists());
        for entry in &manifest.tables {
            if matches!(entry.status, TableStatus::Written { .. }) {
                assert!(results.join(entry.name.file_name()).exists(), "{}", entry.name);
            }
        }

        // 5 trips ending in the zone in the baseline window, 4 in the
        // comparison window.
        assert!((manifest.statistics.q1_pct_change.unwrap() - -20.0).abs() < 1e-9);
        assert!(manifest.statistics.wettest_month.is_some());
    }

    #[tokio::test]
    async fn no_batches_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("raw")).unwrap();

        assert!(run(&config(dir.path()), &hidden()).await.is_err());
        assert!(!dir.path().join("results").join(MANIFEST_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn only_bad_batches_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("yellow_tripdata_2025-01.parquet"), b"garbage").unwrap();

        assert!(run(&config(dir.path()), &hidden()).await.is_err());
    }
}
