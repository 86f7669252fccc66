//! Synthesis of a missing period from earlier years.
//!
//! Each configured source period (N years before the target) contributes a
//! seeded Bernoulli sample of its rows, shifted forward by exactly N
//! calendar years. A row is kept when
//! `hash(file name, row number, seed) mod 1_000_000` falls below the
//! source's ratio, which makes the draw independent of scan order and
//! thread count.
//!
//! Sources may mix dialects: timestamps are coalesced across whichever
//! dialect columns are present and `vehicle_class` is derived from the
//! source file name. Sampled rows whose pickup or dropoff timestamp is
//! null are dropped and counted, the same way batch ingestion rejects them.
//! The result is written to the clean partition as
//! `imputed_{YYYY-MM}.parquet` without passing through the classifier.

use std::path::{Path, PathBuf};

use duckdb::params;
use serde::Serialize;
use taxi_audit_config::{EngineConfig, ImputationConfig};
use taxi_audit_database::{copy_to_parquet, open_in_memory, sql_path_list};
use taxi_audit_trip_models::{Period, VehicleClass};

use crate::IngestError;
use crate::batch::VALUE_COLUMNS_SQL;
use crate::batches_for_period;

/// Resolution of the per-row sampling draw.
pub const SAMPLING_RESOLUTION: u64 = 1_000_000;

/// One earlier period feeding the synthesized one.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePeriod {
    /// The earlier period.
    pub period: Period,
    /// Years between it and the target.
    pub years_back: i32,
    /// Fraction of its rows to keep.
    pub ratio: f64,
    /// Raw batches found for it.
    pub files: Vec<PathBuf>,
}

impl SourcePeriod {
    /// Integer threshold the row hash is compared against.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn threshold(&self) -> u64 {
        (self.ratio * SAMPLING_RESOLUTION as f64).round() as u64
    }
}

/// The periods an imputation would draw from.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputationPlan {
    /// Period to synthesize.
    pub target: Period,
    /// Contributing periods, in configuration order.
    pub sources: Vec<SourcePeriod>,
    /// Sampling seed.
    pub seed: u64,
}

impl ImputationPlan {
    /// Resolves each configured source against the raw directory.
    #[must_use]
    pub fn new(raw_dir: &Path, target: Period, config: &ImputationConfig) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|source| {
                let period = target.offset_years(-source.years_back);
                SourcePeriod {
                    period,
                    years_back: source.years_back,
                    ratio: source.ratio,
                    files: batches_for_period(raw_dir, period),
                }
            })
            .collect();

        Self {
            target,
            sources,
            seed: config.seed,
        }
    }

    /// Name of the synthesized batch in the clean partition.
    #[must_use]
    pub fn output_file_name(&self) -> String {
        format!("imputed_{}.parquet", self.target)
    }
}

/// Rows each source period contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceContribution {
    /// Source period, `YYYY-MM`.
    pub period: String,
    /// Rows kept from it.
    pub rows: u64,
    /// Sampled rows dropped for a null timestamp.
    pub rejected_rows: u64,
}

/// Outcome of a successful imputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImputationReport {
    /// Synthesized period, `YYYY-MM`.
    pub target: String,
    /// Per-source row counts, in plan order.
    pub contributions: Vec<SourceContribution>,
    /// Rows written.
    pub total_rows: u64,
    /// Sampled rows dropped for a null timestamp, across all sources.
    pub rejected_rows: u64,
    /// Written file.
    pub output: PathBuf,
}

/// Synthesizes the plan's target period into `clean_dir`.
///
/// A source period without files is skipped with a warning.
///
/// # Errors
///
/// Returns [`IngestError::NoImputationSources`] when no source period has
/// any files, or another [`IngestError`] if reading or writing fails.
pub fn impute(
    plan: &ImputationPlan,
    engine: &EngineConfig,
    clean_dir: &Path,
) -> Result<ImputationReport, IngestError> {
    let selects: Vec<String> = plan
        .sources
        .iter()
        .filter_map(|source| {
            let select = source_select(source, plan.seed);
            if select.is_none() {
                log::warn!(
                    "No raw batches for {}; it will not contribute to {}",
                    source.period,
                    plan.target
                );
            }
            select
        })
        .collect();

    if selects.is_empty() {
        return Err(IngestError::NoImputationSources {
            period: plan.target,
        });
    }

    let conn = open_in_memory(engine)?;
    conn.execute_batch(&format!(
        "CREATE TEMP TABLE imputed AS {}",
        selects.join(" UNION ALL BY NAME ")
    ))?;

    let mut contributions = Vec::with_capacity(plan.sources.len());
    for source in &plan.sources {
        let (rows, rejected): (i64, i64) = conn.query_row(
            "SELECT \
                COUNT(*) FILTER (WHERE NOT _null_timestamp), \
                COUNT(*) FILTER (WHERE _null_timestamp) \
             FROM imputed WHERE _years_back = ?",
            params![source.years_back],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let rows = u64::try_from(rows).unwrap_or(0);
        let rejected_rows = u64::try_from(rejected).unwrap_or(0);
        log::info!(
            "{}: {rows} rows from {} (ratio {})",
            plan.target,
            source.period,
            source.ratio
        );
        if rejected_rows > 0 {
            log::warn!(
                "{}: dropped {rejected_rows} rows from {} with null timestamps",
                plan.target,
                source.period
            );
        }
        contributions.push(SourceContribution {
            period: source.period.to_string(),
            rows,
            rejected_rows,
        });
    }

    let output = clean_dir.join(plan.output_file_name());
    let total_rows = copy_to_parquet(
        &conn,
        "SELECT * EXCLUDE (_years_back, _source_file, _source_row, _null_timestamp) \
         FROM imputed \
         WHERE NOT _null_timestamp \
         ORDER BY _years_back DESC, _source_file, _source_row",
        &output,
    )?;

    Ok(ImputationReport {
        target: plan.target.to_string(),
        rejected_rows: contributions.iter().map(|c| c.rejected_rows).sum(),
        contributions,
        total_rows,
        output,
    })
}

/// The sampled, shifted rows of one source period, or `None` when it has
/// no recognizable files.
fn source_select(source: &SourcePeriod, seed: u64) -> Option<String> {
    let files: Vec<PathBuf> = source
        .files
        .iter()
        .filter(|path| {
            path.file_name()
                .and_then(|n| VehicleClass::from_file_name(&n.to_string_lossy()))
                .is_some()
        })
        .cloned()
        .collect();
    if files.is_empty() {
        return None;
    }

    let mut classes: Vec<VehicleClass> = files
        .iter()
        .filter_map(|path| {
            path.file_name()
                .and_then(|n| VehicleClass::from_file_name(&n.to_string_lossy()))
        })
        .collect();
    classes.sort();
    classes.dedup();

    let pickup = coalesce(&classes, |c| c.columns().pickup);
    let dropoff = coalesce(&classes, |c| c.columns().dropoff);
    let years = source.years_back;

    Some(format!(
        "SELECT \
            CAST({pickup} AS TIMESTAMP) + INTERVAL {years} YEAR AS pickup_time, \
            CAST({dropoff} AS TIMESTAMP) + INTERVAL {years} YEAR AS dropoff_time, \
            {VALUE_COLUMNS_SQL}, \
            {class} AS vehicle_class, \
            {years} AS _years_back, \
            ({pickup} IS NULL OR {dropoff} IS NULL) AS _null_timestamp, \
            parse_filename(filename) AS _source_file, \
            file_row_number AS _source_row \
         FROM read_parquet({files}, union_by_name = true, filename = true, file_row_number = true) \
         WHERE hash(parse_filename(filename), file_row_number, {seed}::UBIGINT) % {SAMPLING_RESOLUTION} < {threshold}",
        class = vehicle_class_expr(),
        files = sql_path_list(&files),
        threshold = source.threshold(),
    ))
}

fn coalesce(classes: &[VehicleClass], column: impl Fn(VehicleClass) -> &'static str) -> String {
    let columns: Vec<&str> = classes.iter().map(|c| column(*c)).collect();
    match columns.as_slice() {
        [only] => (*only).to_string(),
        _ => format!("COALESCE({})", columns.join(", ")),
    }
}

/// Derives `vehicle_class` from the source file name's dialect marker.
fn vehicle_class_expr() -> String {
    let arms: String = VehicleClass::all()
        .iter()
        .map(|class| format!("WHEN lower(parse_filename(filename)) LIKE '%{class}%' THEN '{class}' "))
        .collect();
    format!("CASE {arms}END")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{engine, write_raw_batch};
    use taxi_audit_config::ImputationSource;
    use taxi_audit_database::{query_count, sql_path};

    fn config(ratio_2y: f64, ratio_1y: f64) -> ImputationConfig {
        ImputationConfig {
            month: 12,
            seed: 42,
            sources: vec![
                ImputationSource {
                    years_back: 2,
                    ratio: ratio_2y,
                },
                ImputationSource {
                    years_back: 1,
                    ratio: ratio_1y,
                },
            ],
        }
    }

    fn rows(year: i32, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let minute = i % 60;
                let hour = (i / 60) % 24;
                format!(
                    "(TIMESTAMP '{year}-12-15 {hour:02}:{minute:02}:00', \
                      TIMESTAMP '{year}-12-15 {hour:02}:{minute:02}:30', \
                      161, 236, 1.5, 9.0, 12.0, 2.5)"
                )
            })
            .collect()
    }

    fn write(dir: &Path, name: &str, class: VehicleClass, year: i32, count: usize) {
        let owned = rows(year, count);
        let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
        write_raw_batch(dir, name, class, &refs);
    }

    fn target() -> Period {
        Period::new(2025, 12).unwrap()
    }

    #[test]
    fn plan_resolves_source_periods() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "yellow_tripdata_2024-12.parquet", VehicleClass::Yellow, 2024, 1);

        let plan = ImputationPlan::new(dir.path(), target(), &config(0.3, 0.7));
        assert_eq!(plan.sources[0].period, Period::new(2023, 12).unwrap());
        assert!(plan.sources[0].files.is_empty());
        assert_eq!(plan.sources[1].period, Period::new(2024, 12).unwrap());
        assert_eq!(plan.sources[1].files.len(), 1);
        assert_eq!(plan.sources[1].threshold(), 700_000);
        assert_eq!(plan.output_file_name(), "imputed_2025-12.parquet");
    }

    #[test]
    fn full_ratio_shifts_every_row_by_whole_years() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        write(&raw, "yellow_tripdata_2023-12.parquet", VehicleClass::Yellow, 2023, 10);
        write(&raw, "green_tripdata_2024-12.parquet", VehicleClass::Green, 2024, 5);

        let plan = ImputationPlan::new(&raw, target(), &config(1.0, 1.0));
        let clean = dir.path().join("clean");
        let report = impute(&plan, &engine(), &clean).unwrap();

        assert_eq!(report.total_rows, 15);
        assert_eq!(report.contributions[0].rows, 10);
        assert_eq!(report.contributions[1].rows, 5);

        let conn = open_in_memory(&engine()).unwrap();
        let file = sql_path(&report.output);
        let outside_target = query_count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM read_parquet({file}) \
                 WHERE year(pickup_time) <> 2025 OR month(pickup_time) <> 12 \
                    OR pickup_time IS NULL OR dropoff_time IS NULL"
            ),
        )
        .unwrap();
        assert_eq!(outside_target, 0);

        let green = query_count(
            &conn,
            &format!("SELECT COUNT(*) FROM read_parquet({file}) WHERE vehicle_class = 'green'"),
        )
        .unwrap();
        assert_eq!(green, 5);

        let first: String = conn
            .query_row(
                &format!("SELECT CAST(MIN(pickup_time) AS VARCHAR) FROM read_parquet({file})"),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(first, "2025-12-15 00:00:00");
    }

    #[test]
    fn sampling_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        write(&raw, "yellow_tripdata_2023-12.parquet", VehicleClass::Yellow, 2023, 400);
        write(&raw, "yellow_tripdata_2024-12.parquet", VehicleClass::Yellow, 2024, 400);

        let plan = ImputationPlan::new(&raw, target(), &config(0.3, 0.7));
        let first = impute(&plan, &engine(), &dir.path().join("a")).unwrap();
        let second = impute(&plan, &engine(), &dir.path().join("b")).unwrap();

        assert_eq!(first.total_rows, second.total_rows);
        assert_eq!(first.contributions, second.contributions);
        assert!(first.contributions[0].rows > 0 && first.contributions[0].rows < 400);
        assert!(first.contributions[0].rows < first.contributions[1].rows);

        let conn = open_in_memory(&engine()).unwrap();
        let a = sql_path(&first.output);
        let b = sql_path(&second.output);
        let diff = query_count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM (
                    (SELECT * FROM read_parquet({a}) EXCEPT ALL SELECT * FROM read_parquet({b}))
                    UNION ALL
                    (SELECT * FROM read_parquet({b}) EXCEPT ALL SELECT * FROM read_parquet({a}))
                )"
            ),
        )
        .unwrap();
        assert_eq!(diff, 0);
    }

    #[test]
    fn one_missing_source_still_imputes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "green_tripdata_2024-12.parquet", VehicleClass::Green, 2024, 3);

        let plan = ImputationPlan::new(dir.path(), target(), &config(0.3, 1.0));
        let report = impute(&plan, &engine(), &dir.path().join("clean")).unwrap();
        assert_eq!(report.contributions[0].rows, 0);
        assert_eq!(report.total_rows, 3);
    }

    #[test]
    fn no_sources_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let plan = ImputationPlan::new(dir.path(), target(), &config(0.3, 0.7));
        let err = impute(&plan, &engine(), &dir.path().join("clean")).unwrap_err();
        assert!(matches!(err, IngestError::NoImputationSources { .. }));
    }

    #[test]
    fn null_timestamps_are_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        write_raw_batch(
            dir.path(),
            "yellow_tripdata_2024-12.parquet",
            VehicleClass::Yellow,
            &[
                "(TIMESTAMP '2024-12-15 08:00:00', TIMESTAMP '2024-12-15 08:20:00', \
                  161, 236, 1.5, 9.0, 12.0, 2.5)",
                "(NULL, TIMESTAMP '2024-12-15 09:20:00', 161, 236, 1.5, 9.0, 12.0, 2.5)",
                "(TIMESTAMP '2024-12-15 10:00:00', NULL, 161, 236, 1.5, 9.0, 12.0, 2.5)",
            ],
        );

        let plan = ImputationPlan::new(dir.path(), target(), &config(1.0, 1.0));
        let report = impute(&plan, &engine(), &dir.path().join("clean")).unwrap();

        assert_eq!(report.total_rows, 1);
        assert_eq!(report.rejected_rows, 2);
        assert_eq!(report.contributions[1].rows, 1);
        assert_eq!(report.contributions[1].rejected_rows, 2);

        let conn = open_in_memory(&engine()).unwrap();
        let nulls = query_count(
            &conn,
            &format!(
                "SELECT COUNT(*) FROM read_parquet({}) \
                 WHERE pickup_time IS NULL OR dropoff_time IS NULL",
                sql_path(&report.output)
            ),
        )
        .unwrap();
        assert_eq!(nulls, 0);
    }
}
