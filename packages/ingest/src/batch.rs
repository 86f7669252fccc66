//! Per-batch normalization and classification.
//!
//! A raw batch is read in pages of [`READ_CHUNK_ROWS`] rows, each row is
//! mapped onto a [`TripRecord`] and routed by [`classify`] into one of two
//! staging tables, and the staging tables are written out as
//! `clean/{file}` and `audit/{file}`.

use std::path::{Path, PathBuf};

use duckdb::{Connection, Row, params};
use serde::Serialize;
use taxi_audit_classify::{Partition, classify};
use taxi_audit_config::EngineConfig;
use taxi_audit_database::{open_in_memory, query_count, sql_path, stage_parquet};
use taxi_audit_trip_models::{
    Period, TripRecord, VehicleClass, datetime_from_micros, datetime_to_micros,
};

use crate::IngestError;

/// Rows fetched from a raw batch per query.
pub const READ_CHUNK_ROWS: u64 = 500_000;

const CLEAN_STAGE: &str = "stage_clean";
const AUDIT_STAGE: &str = "stage_audit";

/// Normalizes the dialect-independent columns.
///
/// Missing zones and amounts become `0`; the surcharge keeps its nulls.
pub const VALUE_COLUMNS_SQL: &str = "\
    COALESCE(CAST(PULocationID AS INTEGER), 0) AS pickup_zone, \
    COALESCE(CAST(DOLocationID AS INTEGER), 0) AS dropoff_zone, \
    COALESCE(CAST(trip_distance AS DOUBLE), 0) AS trip_distance, \
    COALESCE(CAST(fare_amount AS DOUBLE), 0) AS fare, \
    COALESCE(CAST(total_amount AS DOUBLE), 0) AS total_amount, \
    CAST(congestion_surcharge AS DOUBLE) AS congestion_surcharge";

/// A raw batch file whose dialect has been recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    /// Location of the raw parquet file.
    pub path: PathBuf,
    /// File name, reused for the output partitions.
    pub file_name: String,
    /// Dialect inferred from the file name.
    pub vehicle_class: VehicleClass,
    /// Period parsed from the file name, if it follows the TLC layout.
    pub period: Option<Period>,
}

impl BatchFile {
    /// Recognizes the dialect of a raw batch from its file name.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::SchemaMismatch`] when the name carries
    /// neither dialect marker.
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let vehicle_class =
            VehicleClass::from_file_name(&file_name).ok_or_else(|| IngestError::SchemaMismatch {
                file: file_name.clone(),
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            period: Period::from_file_name(&file_name),
            file_name,
            vehicle_class,
        })
    }

    /// The page query, projecting timestamps as epoch microseconds.
    fn page_sql(&self, start: u64, end: u64) -> String {
        let columns = self.vehicle_class.columns();
        format!(
            "SELECT \
                epoch_us(CAST({pickup} AS TIMESTAMP)) AS pickup_us, \
                epoch_us(CAST({dropoff} AS TIMESTAMP)) AS dropoff_us, \
                {VALUE_COLUMNS_SQL} \
             FROM read_parquet({path}, file_row_number = true) \
             WHERE file_row_number >= {start} AND file_row_number < {end} \
             ORDER BY file_row_number",
            pickup = columns.pickup,
            dropoff = columns.dropoff,
            path = sql_path(&self.path),
        )
    }
}

/// Outcome of ingesting one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Raw file name.
    pub file_name: String,
    /// Dialect the batch was read as.
    pub vehicle_class: VehicleClass,
    /// Rows in the raw file.
    pub total_rows: u64,
    /// Rows dropped because a timestamp was null.
    pub rejected_rows: u64,
    /// Rows routed to the clean partition.
    pub clean_rows: u64,
    /// Rows routed to the audit partition.
    pub audit_rows: u64,
}

/// Reads, normalizes, classifies, and writes a single batch.
///
/// Output files carry the raw file name and are replaced atomically, so
/// running the same batch twice produces the same partitions.
///
/// # Errors
///
/// Returns [`IngestError`] if the batch cannot be read (missing columns,
/// corrupt file) or the partitions cannot be written.
pub fn process_batch(
    batch: &BatchFile,
    engine: &EngineConfig,
    clean_dir: &Path,
    audit_dir: &Path,
) -> Result<BatchReport, IngestError> {
    let conn = open_in_memory(engine)?;
    create_stage_tables(&conn)?;

    let total_rows = query_count(
        &conn,
        &format!("SELECT COUNT(*) FROM read_parquet({})", sql_path(&batch.path)),
    )?;
    log::debug!("{}: {total_rows} rows", batch.file_name);

    let mut report = BatchReport {
        file_name: batch.file_name.clone(),
        vehicle_class: batch.vehicle_class,
        total_rows,
        rejected_rows: 0,
        clean_rows: 0,
        audit_rows: 0,
    };

    {
        // Reads go through a second connection to the same database so the
        // appenders never share a connection with an open result.
        let reader = conn.try_clone()?;
        let mut clean = conn.appender(CLEAN_STAGE)?;
        let mut audit = conn.appender(AUDIT_STAGE)?;

        let mut start = 0;
        while start < total_rows {
            let end = start + READ_CHUNK_ROWS;
            let mut stmt = reader.prepare(&batch.page_sql(start, end))?;
            let mut rows = stmt.query([])?;

            let mut page_rows: u64 = 0;
            while let Some(row) = rows.next()? {
                page_rows += 1;
                let Some(record) = read_record(row, batch.vehicle_class)? else {
                    report.rejected_rows += 1;
                    continue;
                };

                let appender = match classify(&record) {
                    Partition::Clean => {
                        report.clean_rows += 1;
                        &mut clean
                    }
                    Partition::Audit => {
                        report.audit_rows += 1;
                        &mut audit
                    }
                };
                appender.append_row(params![
                    datetime_to_micros(record.pickup_time),
                    datetime_to_micros(record.dropoff_time),
                    record.pickup_zone,
                    record.dropoff_zone,
                    record.trip_distance,
                    record.fare,
                    record.total_amount,
                    record.congestion_surcharge,
                    record.vehicle_class.as_ref(),
                ])?;
            }

            log::debug!("{}: read {page_rows} rows from offset {start}", batch.file_name);
            start = end;
        }

        clean.flush()?;
        audit.flush()?;
    }

    if report.rejected_rows > 0 {
        log::warn!(
            "{}: rejected {} rows with null timestamps",
            batch.file_name,
            report.rejected_rows
        );
    }

    // Both partitions are staged before either is published, so a failed
    // batch never leaves one half behind.
    let clean = stage_parquet(
        &conn,
        &canonical_select(CLEAN_STAGE),
        &clean_dir.join(&batch.file_name),
    )?;
    let audit = stage_parquet(
        &conn,
        &canonical_select(AUDIT_STAGE),
        &audit_dir.join(&batch.file_name),
    )?;

    let clean_path = clean.dest().to_path_buf();
    clean.commit()?;
    if let Err(e) = audit.commit() {
        std::fs::remove_file(&clean_path).ok();
        return Err(e.into());
    }

    log::info!(
        "{}: {} clean, {} audit",
        batch.file_name,
        report.clean_rows,
        report.audit_rows
    );

    Ok(report)
}

fn create_stage_tables(conn: &Connection) -> Result<(), duckdb::Error> {
    for table in [CLEAN_STAGE, AUDIT_STAGE] {
        conn.execute_batch(&format!(
            "CREATE TABLE {table} (
                pickup_us BIGINT NOT NULL,
                dropoff_us BIGINT NOT NULL,
                pickup_zone INTEGER NOT NULL,
                dropoff_zone INTEGER NOT NULL,
                trip_distance DOUBLE NOT NULL,
                fare DOUBLE NOT NULL,
                total_amount DOUBLE NOT NULL,
                congestion_surcharge DOUBLE,
                vehicle_class VARCHAR NOT NULL
            );"
        ))?;
    }
    Ok(())
}

fn canonical_select(table: &str) -> String {
    format!(
        "SELECT \
            make_timestamp(pickup_us) AS pickup_time, \
            make_timestamp(dropoff_us) AS dropoff_time, \
            pickup_zone, dropoff_zone, trip_distance, fare, total_amount, \
            congestion_surcharge, vehicle_class \
         FROM {table}"
    )
}

/// Maps a page row onto a record. `None` when either timestamp is null.
fn read_record(row: &Row<'_>, class: VehicleClass) -> Result<Option<TripRecord>, duckdb::Error> {
    let pickup: Option<i64> = row.get(0)?;
    let dropoff: Option<i64> = row.get(1)?;

    let (Some(pickup_time), Some(dropoff_time)) = (
        pickup.and_then(datetime_from_micros),
        dropoff.and_then(datetime_from_micros),
    ) else {
        return Ok(None);
    };

    Ok(Some(TripRecord {
        pickup_time,
        dropoff_time,
        pickup_zone: row.get(2)?,
        dropoff_zone: row.get(3)?,
        trip_distance: row.get(4)?,
        fare: row.get(5)?,
        total_amount: row.get(6)?,
        congestion_surcharge: row.get(7)?,
        vehicle_class: class,
    }))
}
