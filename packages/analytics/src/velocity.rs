//! Average speed inside the congestion zone by weekday and hour.

use duckdb::Connection;
use taxi_audit_analytics_models::VelocityCell;
use taxi_audit_trip_models::VehicleClass;
use taxi_audit_zones::{CONGESTION_ZONE_IDS, sql_id_list};

use crate::{AnalysisInputs, AnalyticsError, to_u32};

/// Trips at or below this distance are too short for a stable speed.
pub const MIN_DISTANCE_MILES: f64 = 0.5;

/// Trips at or below this duration are too short for a stable speed.
pub const MIN_DURATION_MICROS: i64 = 60_000_000;

/// Heatmap over `source`, which must expose `pickup_time`, `dropoff_time`,
/// `pickup_zone`, `dropoff_zone`, and `trip_distance`.
fn heatmap(
    conn: &Connection,
    source: &str,
    extra_filter: &str,
) -> Result<Vec<VelocityCell>, AnalyticsError> {
    let cz = sql_id_list(CONGESTION_ZONE_IDS);
    let duration = "(epoch_us(dropoff_time) - epoch_us(pickup_time))";
    let sql = format!(
        "SELECT
            isodow(pickup_time) AS day_of_week,
            hour(pickup_time) AS hour_of_day,
            AVG(trip_distance / CAST({duration} AS DOUBLE) * 3600000000.0) AS avg_speed
         FROM {source}
         WHERE pickup_zone IN {cz}
           AND dropoff_zone IN {cz}
           AND trip_distance > {MIN_DISTANCE_MILES:?}
           AND {duration} > {MIN_DURATION_MICROS}
           {extra_filter}
         GROUP BY 1, 2
         ORDER BY 1, 2"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;

    let mut cells = Vec::new();
    for row in rows {
        let (day, hour, avg_speed) = row?;
        cells.push(VelocityCell {
            day_of_week: to_u32(day)?,
            hour_of_day: to_u32(hour)?,
            avg_speed,
        });
    }
    Ok(cells)
}

/// Heatmap for the comparison window of the clean partition.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn comparison(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<VelocityCell>, AnalyticsError> {
    heatmap(
        conn,
        &inputs.clean_source()?,
        &format!("AND {}", inputs.comparison_filter("pickup_time")),
    )
}

/// Heatmap for the baseline window, read from raw yellow batches.
///
/// # Errors
///
/// Returns [`AnalyticsError::MissingInput`] when no yellow baseline batch
/// exists, or another error if the query fails.
pub fn baseline(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<VelocityCell>, AnalyticsError> {
    let class = VehicleClass::Yellow;
    let columns = class.columns();
    let source = format!(
        "(SELECT
            CAST({pickup} AS TIMESTAMP) AS pickup_time,
            CAST({dropoff} AS TIMESTAMP) AS dropoff_time,
            PULocationID AS pickup_zone,
            DOLocationID AS dropoff_zone,
            trip_distance
          FROM {raw})",
        pickup = columns.pickup,
        dropoff = columns.dropoff,
        raw = inputs.baseline_source(&[class])?,
    );
    heatmap(conn, &source, "")
}
