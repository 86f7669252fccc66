#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Anomaly classification for canonical trip records.
//!
//! Two independent rule sets live here:
//!
//! | Rule set | Applies to | Outcome |
//! |----------|------------|---------|
//! | [`AnomalyFlags`] | every canonical record | [`Partition::Clean`] or [`Partition::Audit`] |
//! | [`FraudCategory`] | the clean partition | a named violation, or nothing |
//!
//! The fraud speed threshold (100 mph) is looser than the
//! physics threshold (65 mph) used for partitioning, so a clean trip can
//! still show up in the fraud report.
//!
//! Each rule is available as a Rust predicate over [`TripRecord`] and, in
//! [`sql`], as an expression for the columnar engine built from the same
//! constants.

pub mod sql;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use taxi_audit_trip_models::TripRecord;

/// Speed above which a trip longer than [`PHYSICS_MIN_DISTANCE_MILES`] is
/// physically implausible.
pub const PHYSICS_MAX_SPEED_MPH: f64 = 65.0;

/// Minimum distance for the physics rule to apply.
pub const PHYSICS_MIN_DISTANCE_MILES: f64 = 1.0;

/// Trips shorter than one minute...
pub const TELEPORTER_MAX_DURATION_HOURS: f64 = 1.0 / 60.0;

/// ...charging more than this are flagged as teleporters.
pub const TELEPORTER_MIN_FARE: f64 = 20.0;

/// Effective speed above which a clean trip is reported as fraud.
pub const FRAUD_MAX_SPEED_MPH: f64 = 100.0;

/// Which partition a record is routed to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Partition {
    /// No anomaly flag holds.
    Clean,
    /// At least one anomaly flag holds. Kept for review, never deleted.
    Audit,
}

/// The three anomaly predicates evaluated for a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct AnomalyFlags {
    /// Faster than 65 mph over more than a mile.
    pub physics_violation: bool,
    /// Under a minute long but charging over $20.
    pub teleporter: bool,
    /// Zero distance with a positive fare.
    pub stationary_charge: bool,
}

impl AnomalyFlags {
    /// Evaluates every predicate against `trip`. Depends on nothing but the
    /// record itself.
    #[must_use]
    pub fn evaluate(trip: &TripRecord) -> Self {
        Self {
            physics_violation: trip.speed_mph() > PHYSICS_MAX_SPEED_MPH
                && trip.trip_distance > PHYSICS_MIN_DISTANCE_MILES,
            teleporter: trip.duration_hours() < TELEPORTER_MAX_DURATION_HOURS
                && trip.fare > TELEPORTER_MIN_FARE,
            stationary_charge: trip.trip_distance == 0.0 && trip.fare > 0.0,
        }
    }

    /// `true` when any flag is raised.
    #[must_use]
    pub const fn any(self) -> bool {
        self.physics_violation || self.teleporter || self.stationary_charge
    }

    /// The partition these flags route a record to.
    #[must_use]
    pub const fn partition(self) -> Partition {
        if self.any() {
            Partition::Audit
        } else {
            Partition::Clean
        }
    }
}

/// Routes a record to exactly one partition.
#[must_use]
pub fn classify(trip: &TripRecord) -> Partition {
    AnomalyFlags::evaluate(trip).partition()
}

/// Violation buckets reported over the clean partition.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum FraudCategory {
    /// Effective speed above 100 mph.
    #[serde(rename = "Teleporter (>100mph)")]
    #[strum(serialize = "Teleporter (>100mph)")]
    Teleporter,
    /// Zero distance but a congestion surcharge was collected.
    #[serde(rename = "Stationary Charge")]
    #[strum(serialize = "Stationary Charge")]
    StationaryCharge,
}

impl FraudCategory {
    /// Buckets a clean record, checking the speed rule first. Returns
    /// `None` when the trip matches neither rule.
    #[must_use]
    pub fn categorize(trip: &TripRecord) -> Option<Self> {
        if trip.speed_mph() > FRAUD_MAX_SPEED_MPH {
            Some(Self::Teleporter)
        } else if trip.trip_distance == 0.0 && trip.surcharge() > 0.0 {
            Some(Self::StationaryCharge)
        } else {
            None
        }
    }
}
