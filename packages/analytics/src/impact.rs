//! Baseline-year versus target-year comparisons: zone-bound volume and
//! the border effect.
//!
//! Baseline figures come straight from the raw batches of the baseline
//! year, which never pass through ingestion; comparison figures come from
//! the clean partition. Both sides count only trips picked up in their
//! year's comparison months.

use duckdb::Connection;
use taxi_audit_analytics_models::{BorderEffect, PeriodVolume};
use taxi_audit_trip_models::VehicleClass;
use taxi_audit_zones::{BORDER_ZONE_IDS, CONGESTION_ZONE_IDS, LocationType, sql_id_list};

use crate::{AnalysisInputs, AnalyticsError, to_count};

/// Label for a year's comparison window, e.g. `2025 Q1`.
///
/// Windows that are not a single calendar quarter are labelled by their
/// months, e.g. `2025 M1-M2`.
#[must_use]
pub fn window_label(year: i32, months: &[u32]) -> String {
    let mut sorted = months.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let is_quarter = matches!(sorted[..], [a, b, c] if a % 3 == 1 && b == a + 1 && c == a + 2);
    if is_quarter {
        return format!("{year} Q{}", sorted[0] / 3 + 1);
    }

    match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) if first == last => format!("{year} M{first}"),
        (Some(first), Some(last)) => format!("{year} M{first}-M{last}"),
        _ => year.to_string(),
    }
}

/// Trips ending in the congestion zone during the baseline and comparison
/// windows, baseline first.
///
/// # Errors
///
/// Returns [`AnalyticsError::MissingInput`] when baseline batches or the
/// clean partition are missing, or another error if a query fails.
pub fn period_volumes(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<PeriodVolume>, AnalyticsError> {
    let cz = sql_id_list(CONGESTION_ZONE_IDS);
    let months = &inputs.analysis.comparison_months;

    let baseline_sql = format!(
        "SELECT COUNT(*) FROM {} WHERE DOLocationID IN {cz}",
        inputs.baseline_source(VehicleClass::all())?
    );
    let comparison_sql = format!(
        "SELECT COUNT(*) FROM {} WHERE dropoff_zone IN {cz} AND {}",
        inputs.clean_source()?,
        inputs.comparison_filter("pickup_time"),
    );

    let baseline: i64 = conn.query_row(&baseline_sql, [], |row| row.get(0))?;
    let comparison: i64 = conn.query_row(&comparison_sql, [], |row| row.get(0))?;

    Ok(vec![
        PeriodVolume {
            period_label: window_label(inputs.analysis.baseline_year, months),
            trip_count: to_count(baseline)?,
        },
        PeriodVolume {
            period_label: window_label(inputs.analysis.target_year, months),
            trip_count: to_count(comparison)?,
        },
    ])
}

/// Per border zone change in dropoffs, baseline to comparison window.
///
/// Zones without dropoffs in either window are left out. Sorted by change,
/// largest increase first.
///
/// # Errors
///
/// Returns [`AnalyticsError::MissingInput`] when baseline batches or the
/// clean partition are missing, or another error if a query fails.
pub fn border_effect(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<BorderEffect>, AnalyticsError> {
    let border = sql_id_list(BORDER_ZONE_IDS);

    let sql = format!(
        "WITH baseline AS (
            SELECT CAST(DOLocationID AS INTEGER) AS zone_id, COUNT(*) AS n
            FROM {baseline}
            WHERE DOLocationID IN {border}
            GROUP BY 1
         ),
         comparison AS (
            SELECT dropoff_zone AS zone_id, COUNT(*) AS n
            FROM {clean}
            WHERE dropoff_zone IN {border} AND {window}
            GROUP BY 1
         )
         SELECT b.zone_id, CAST(c.n - b.n AS DOUBLE) * 100.0 / b.n AS pct_change
         FROM baseline b
         JOIN comparison c ON b.zone_id = c.zone_id
         ORDER BY pct_change DESC, b.zone_id",
        baseline = inputs.baseline_source(VehicleClass::all())?,
        clean = inputs.clean_source()?,
        window = inputs.comparison_filter("pickup_time"),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, f64>(1)?)))?;

    let mut effects = Vec::new();
    for row in rows {
        let (zone_id, pct_change) = row?;
        effects.push(BorderEffect {
            zone_id,
            pct_change,
            location_type: LocationType::of(zone_id),
        });
    }
    Ok(effects)
}
