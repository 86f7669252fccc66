//! SQL renderings of the classification rules.
//!
//! Expressions reference the canonical column names (`pickup_time`,
//! `dropoff_time`, `trip_distance`, `congestion_surcharge`) and follow the
//! same arithmetic as the Rust predicates: duration is computed from
//! microsecond epochs, and a zero duration is replaced by the one-hour
//! floor.

use taxi_audit_trip_models::ZERO_DURATION_FLOOR_HOURS;

use crate::{FRAUD_MAX_SPEED_MPH, FraudCategory};

/// Trip duration in hours.
#[must_use]
pub fn duration_hours_expr() -> String {
    "((epoch_us(dropoff_time) - epoch_us(pickup_time)) / 3600000000.0)".to_string()
}

/// Speed in mph with the zero-duration floor applied.
#[must_use]
pub fn speed_mph_expr() -> String {
    let duration = duration_hours_expr();
    format!(
        "(trip_distance / CASE WHEN {duration} = 0 THEN {ZERO_DURATION_FLOOR_HOURS:?} ELSE {duration} END)"
    )
}

/// Evaluates to the [`FraudCategory`] label, or `NULL` when the trip is not
/// a violation.
#[must_use]
pub fn fraud_category_expr() -> String {
    let speed = speed_mph_expr();
    format!(
        "CASE \
            WHEN {speed} > {FRAUD_MAX_SPEED_MPH:?} THEN '{teleporter}' \
            WHEN trip_distance = 0 AND congestion_surcharge > 0 THEN '{stationary}' \
         END",
        teleporter = FraudCategory::Teleporter,
        stationary = FraudCategory::StationaryCharge,
    )
}

/// `TRUE` for rows the fraud categorizer would bucket.
#[must_use]
pub fn fraud_predicate_expr() -> String {
    format!("({}) IS NOT NULL", fraud_category_expr())
}
