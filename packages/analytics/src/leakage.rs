//! Surcharge compliance for trips entering the congestion zone after the
//! cutover.

use duckdb::Connection;
use taxi_audit_analytics_models::{LeakageStats, LeakyOrigin};
use taxi_audit_zones::{CONGESTION_ZONE_IDS, sql_id_list};

use crate::{AnalysisInputs, AnalyticsError, to_count};

/// Pickup on or after the cutover, outside the zone, ending inside it.
fn eligible_filter(inputs: &AnalysisInputs) -> String {
    let cz = sql_id_list(CONGESTION_ZONE_IDS);
    format!(
        "pickup_time >= DATE '{cutover}' \
         AND pickup_zone NOT IN {cz} \
         AND dropoff_zone IN {cz}",
        cutover = inputs.analysis.cutover_date.format("%Y-%m-%d"),
    )
}

/// Percentage of `part` in `whole`, or `None` when `whole` is zero.
#[allow(clippy::cast_precision_loss)]
fn rate_pct(part: u64, whole: u64) -> Option<f64> {
    (whole > 0).then(|| part as f64 * 100.0 / whole as f64)
}

/// Builds the compliance summary from eligible and compliant counts.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn leakage_stats(total_eligible: u64, compliant_count: u64, surcharge: f64) -> LeakageStats {
    let missed = total_eligible.saturating_sub(compliant_count);
    LeakageStats {
        total_eligible,
        compliant_count,
        compliance_rate_pct: rate_pct(compliant_count, total_eligible),
        estimated_revenue_loss: missed as f64 * surcharge,
    }
}

/// Compliance over all eligible trips. A trip is compliant when it carries
/// a positive surcharge.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn stats(conn: &Connection, inputs: &AnalysisInputs) -> Result<LeakageStats, AnalyticsError> {
    let sql = format!(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE congestion_surcharge > 0)
         FROM {source}
         WHERE {filter}",
        source = inputs.clean_source()?,
        filter = eligible_filter(inputs),
    );

    let (eligible, compliant) = conn.query_row(&sql, [], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;

    let stats = leakage_stats(
        to_count(eligible)?,
        to_count(compliant)?,
        inputs.analysis.estimated_surcharge,
    );
    if stats.total_eligible == 0 {
        log::warn!("No trips eligible for the surcharge; compliance rate undefined");
    }
    Ok(stats)
}

/// Pickup zones with more than `leakage_min_trips` eligible trips, ranked
/// by how many of them had a null or zero surcharge.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn top_origins(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<LeakyOrigin>, AnalyticsError> {
    let sql = format!(
        "SELECT
            pickup_zone,
            COUNT(*) AS trips,
            COUNT(*) FILTER (WHERE congestion_surcharge IS NULL OR congestion_surcharge = 0) AS missed
         FROM {source}
         WHERE {filter}
         GROUP BY pickup_zone
         HAVING COUNT(*) > {min}
         ORDER BY missed DESC, pickup_zone
         LIMIT {limit}",
        source = inputs.clean_source()?,
        filter = eligible_filter(inputs),
        min = inputs.analysis.leakage_min_trips,
        limit = inputs.analysis.top_leaky_origins,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut origins = Vec::new();
    for row in rows {
        let (origin_zone, trips, missed) = row?;
        let trip_count = to_count(trips)?;
        let missed_surcharge_count = to_count(missed)?;
        origins.push(LeakyOrigin {
            origin_zone,
            trip_count,
            missed_surcharge_count,
            leakage_rate_pct: rate_pct(missed_surcharge_count, trip_count).unwrap_or(0.0),
        });
    }
    Ok(origins)
}
