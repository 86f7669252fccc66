//! Headline summaries over the clean partition: revenue, fairness, and
//! fraud.

use duckdb::Connection;
use taxi_audit_analytics_models::{FairnessSummary, FraudCount, RevenueSummary, SuspiciousOrigin};
use taxi_audit_classify::sql::{fraud_category_expr, fraud_predicate_expr};
use taxi_audit_zones::{CONGESTION_ZONE_IDS, sql_id_list};

use crate::{AnalysisInputs, AnalyticsError, to_count};

/// Tip share of fare, in percent. Only meaningful where `fare > 0`.
pub(crate) const TIP_PERCENT_SQL: &str =
    "(total_amount - fare - COALESCE(congestion_surcharge, 0)) / fare * 100";

/// Trips under this many miles count as short.
pub const SHORT_TRIP_MILES: f64 = 2.0;

/// Total revenue, surcharge, and trip count.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn revenue(conn: &Connection, inputs: &AnalysisInputs) -> Result<RevenueSummary, AnalyticsError> {
    let sql = format!(
        "SELECT
            COALESCE(SUM(total_amount), 0)::DOUBLE,
            COALESCE(SUM(COALESCE(congestion_surcharge, 0)), 0)::DOUBLE,
            COUNT(*)
         FROM {}",
        inputs.clean_source()?
    );

    let (total_revenue, total_surcharge, rides) = conn.query_row(&sql, [], |row| {
        Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
    })?;

    Ok(RevenueSummary {
        total_revenue,
        total_surcharge,
        total_rides: to_count(rides)?,
    })
}

/// Average tip percentage and short in-zone trips, over trips with a
/// positive fare.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn fairness(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<FairnessSummary, AnalyticsError> {
    let sql = format!(
        "SELECT
            AVG({TIP_PERCENT_SQL}),
            COUNT(*) FILTER (WHERE trip_distance < {SHORT_TRIP_MILES:?} AND dropoff_zone IN {cz})
         FROM {source}
         WHERE fare > 0",
        cz = sql_id_list(CONGESTION_ZONE_IDS),
        source = inputs.clean_source()?,
    );

    let (avg_tip_percent, short) = conn.query_row(&sql, [], |row| {
        Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, i64>(1)?))
    })?;

    Ok(FairnessSummary {
        avg_tip_percent,
        short_trip_count: to_count(short)?,
    })
}

/// Clean trips per fraud category, most frequent first.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn fraud(conn: &Connection, inputs: &AnalysisInputs) -> Result<Vec<FraudCount>, AnalyticsError> {
    let sql = format!(
        "SELECT violation_type, COUNT(*) AS violation_count
         FROM (SELECT {category} AS violation_type FROM {source})
         WHERE violation_type IS NOT NULL
         GROUP BY violation_type
         ORDER BY violation_count DESC, violation_type",
        category = fraud_category_expr(),
        source = inputs.clean_source()?,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

    let mut counts = Vec::new();
    for row in rows {
        let (violation_type, count) = row?;
        counts.push(FraudCount {
            violation_type,
            violation_count: to_count(count)?,
        });
    }
    Ok(counts)
}

/// Pickup zones with the most fraud-flagged clean trips.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn suspicious_origins(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<SuspiciousOrigin>, AnalyticsError> {
    let sql = format!(
        "SELECT pickup_zone, COUNT(*) AS n
         FROM {source}
         WHERE {predicate}
         GROUP BY pickup_zone
         ORDER BY n DESC, pickup_zone
         LIMIT {limit}",
        source = inputs.clean_source()?,
        predicate = fraud_predicate_expr(),
        limit = inputs.analysis.top_suspicious_origins,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?)))?;

    let mut origins = Vec::new();
    for row in rows {
        let (origin_zone, count) = row?;
        origins.push(SuspiciousOrigin {
            origin_zone,
            suspicious_trip_count: to_count(count)?,
        });
    }
    Ok(origins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{engine, inputs, write_clean};
    use chrono::{Duration, NaiveDate};
    use taxi_audit_classify::FraudCategory;
    use taxi_audit_database::open_in_memory;
    use taxi_audit_trip_models::{TripRecord, VehicleClass};

    /// Distance, seconds, pickup zone, and surcharge for a handful of
    /// edge-case trips.
    const TRIPS: &[(f64, i64, i32, Option<f64>)] = &[
        (5.0, 360, 100, Some(2.5)),
        (3.0, 60, 100, Some(2.5)),
        (1.0, 0, 161, None),
        (0.0, 300, 161, Some(2.75)),
        (0.0, 300, 162, None),
        (0.0, 0, 162, Some(1.0)),
        (150.0, 3600, 100, None),
        (2.0, 30, 100, Some(0.0)),
    ];

    fn select() -> String {
        TRIPS
            .iter()
            .map(|(distance, seconds, zone, surcharge)| {
                let surcharge = surcharge.map_or_else(|| "NULL".to_string(), |s| format!("{s:?}"));
                format!(
                    "SELECT TIMESTAMP '2025-02-03 09:00:00' AS pickup_time, \
                            TIMESTAMP '2025-02-03 09:00:00' + INTERVAL {seconds} SECOND AS dropoff_time, \
                            {zone} AS pickup_zone, 161 AS dropoff_zone, {distance:?} AS trip_distance, \
                            10.0 AS fare, 14.0 AS total_amount, {surcharge}::DOUBLE AS congestion_surcharge"
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ")
    }

    fn records() -> Vec<TripRecord> {
        let pickup = NaiveDate::from_ymd_opt(2025, 2, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        TRIPS
            .iter()
            .map(|(distance, seconds, zone, surcharge)| TripRecord {
                pickup_time: pickup,
                dropoff_time: pickup + Duration::seconds(*seconds),
                pickup_zone: *zone,
                dropoff_zone: 161,
                trip_distance: *distance,
                fare: 10.0,
                total_amount: 14.0,
                congestion_surcharge: *surcharge,
                vehicle_class: VehicleClass::Yellow,
            })
            .collect()
    }

    #[test]
    fn sql_fraud_categories_agree_with_rust() {
        let dir = tempfile::tempdir().unwrap();
        let clean = write_clean(dir.path(), "a.parquet", &select());
        let inputs = inputs(dir.path(), vec![clean]);
        let conn = open_in_memory(&engine()).unwrap();

        let mut expected: Vec<(String, u64)> = Vec::new();
        for record in records() {
            if let Some(category) = FraudCategory::categorize(&record) {
                let label = category.to_string();
                match expected.iter_mut().find(|(l, _)| *l == label) {
                    Some((_, n)) => *n += 1,
                    None => expected.push((label, 1)),
                }
            }
        }
        expected.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let actual: Vec<(String, u64)> = fraud(&conn, &inputs)
            .unwrap()
            .into_iter()
            .map(|c| (c.violation_type, c.violation_count))
            .collect();
        assert_eq!(actual, expected);

        // The zero-duration mile reads as 1 mph under the floor.
        assert_eq!(
            actual,
            vec![
                ("Teleporter (>100mph)".to_string(), 3),
                ("Stationary Charge".to_string(), 2),
            ]
        );
    }

    #[test]
    fn suspicious_origins_ranks_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let clean = write_clean(dir.path(), "a.parquet", &select());
        let inputs = inputs(dir.path(), vec![clean]);
        let conn = open_in_memory(&engine()).unwrap();

        let origins = suspicious_origins(&conn, &inputs).unwrap();
        let pairs: Vec<(i32, u64)> = origins
            .iter()
            .map(|o| (o.origin_zone, o.suspicious_trip_count))
            .collect();
        assert_eq!(pairs, vec![(100, 3), (161, 1), (162, 1)]);
    }

    #[test]
    fn revenue_and_fairness() {
        let dir = tempfile::tempdir().unwrap();
        let clean = write_clean(dir.path(), "a.parquet", &select());
        let inputs = inputs(dir.path(), vec![clean]);
        let conn = open_in_memory(&engine()).unwrap();

        let revenue = revenue(&conn, &inputs).unwrap();
        assert_eq!(revenue.total_rides, 8);
        assert!((revenue.total_revenue - 112.0).abs() < 1e-9);
        assert!((revenue.total_surcharge - 8.75).abs() < 1e-9);

        let fairness = fairness(&conn, &inputs).unwrap();
        // Distances under 2 miles: 1.0, 0.0, 0.0, 0.0.
        assert_eq!(fairness.short_trip_count, 4);
        // Mean of (4 - surcharge) / 10 * 100.
        let expected = (32.0 - 8.75) / 8.0 * 10.0;
        assert!((fairness.avg_tip_percent.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn fairness_without_positive_fares_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let clean = write_clean(
            dir.path(),
            "a.parquet",
            "SELECT TIMESTAMP '2025-02-03 09:00:00' AS pickup_time, \
                    TIMESTAMP '2025-02-03 09:10:00' AS dropoff_time, \
                    100 AS pickup_zone, 161 AS dropoff_zone, 1.0 AS trip_distance, \
                    0.0 AS fare, 0.0 AS total_amount, NULL AS congestion_surcharge",
        );
        let inputs = inputs(dir.path(), vec![clean]);
        let conn = open_in_memory(&engine()).unwrap();

        let fairness = fairness(&conn, &inputs).unwrap();
        assert_eq!(fairness.avg_tip_percent, None);
        assert_eq!(fairness.short_trip_count, 0);
    }
}
