#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical trip record types shared across the audit pipeline.
//!
//! Raw TLC batches arrive in two dialects (yellow and green) that differ
//! only in the names of their pickup/dropoff timestamp columns. Every
//! batch is normalized into a single [`TripRecord`] shape so downstream
//! stages never special-case the source.

use chrono::{DateTime, Datelike as _, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use taxi_audit_zones::ZoneId;

/// Duration substituted when a trip's duration is exactly zero, so speed
/// stays finite.
pub const ZERO_DURATION_FLOOR_HOURS: f64 = 1.0;

/// Marker separating the dialect prefix from the period in batch file
/// names (`yellow_tripdata_2025-01.parquet`).
pub const TRIPDATA_MARKER: &str = "_tripdata_";

/// Source column names for a dialect's pickup/dropoff timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampColumns {
    /// Pickup timestamp column.
    pub pickup: &'static str,
    /// Dropoff timestamp column.
    pub dropoff: &'static str,
}

/// The trip-record dialect a batch was published in.
///
/// Stored on the canonical record as `vehicle_class`.
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
pub enum VehicleClass {
    /// Yellow medallion taxis (`tpep_*` timestamps).
    Yellow,
    /// Green boro taxis (`lpep_*` timestamps).
    Green,
}

impl VehicleClass {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Yellow, Self::Green]
    }

    /// Returns the timestamp column mapping for this dialect.
    #[must_use]
    pub const fn columns(self) -> TimestampColumns {
        match self {
            Self::Yellow => TimestampColumns {
                pickup: "tpep_pickup_datetime",
                dropoff: "tpep_dropoff_datetime",
            },
            Self::Green => TimestampColumns {
                pickup: "lpep_pickup_datetime",
                dropoff: "lpep_dropoff_datetime",
            },
        }
    }

    /// Infers the dialect from a file name's marker substring.
    ///
    /// Returns `None` when neither marker is present.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|class| lower.contains(class.as_ref()))
    }
}

/// A calendar month, the unit raw batches are published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1-12.
    pub month: u32,
}

impl Period {
    /// Creates a period, returning `None` for a month outside 1-12.
    #[must_use]
    pub const fn new(year: i32, month: u32) -> Option<Self> {
        if month >= 1 && month <= 12 {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The same month `years` calendar years later (negative for earlier).
    #[must_use]
    pub const fn offset_years(self, years: i32) -> Self {
        Self {
            year: self.year + years,
            month: self.month,
        }
    }

    /// First day of the period.
    #[must_use]
    pub fn start(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Parses the period out of a batch file name such as
    /// `green_tripdata_2024-12.parquet`.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, rest) = name.split_once(TRIPDATA_MARKER)?;
        let stem = rest.split('.').next()?;
        let (year, month) = stem.split_once('-')?;
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    /// The canonical batch file name for a dialect in this period.
    #[must_use]
    pub fn batch_file_name(self, class: VehicleClass) -> String {
        format!("{class}{TRIPDATA_MARKER}{self}.parquet")
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A normalized trip, identical in shape for both dialects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    /// Meter engaged.
    pub pickup_time: NaiveDateTime,
    /// Meter disengaged.
    pub dropoff_time: NaiveDateTime,
    /// Pickup taxi zone.
    pub pickup_zone: ZoneId,
    /// Dropoff taxi zone.
    pub dropoff_zone: ZoneId,
    /// Trip distance in miles.
    pub trip_distance: f64,
    /// Metered fare. May be zero or negative on refunds and voids.
    pub fare: f64,
    /// Total charged to the passenger.
    pub total_amount: f64,
    /// Congestion surcharge, absent in some batches.
    pub congestion_surcharge: Option<f64>,
    /// Source dialect.
    pub vehicle_class: VehicleClass,
}

impl TripRecord {
    /// Trip duration in hours. Negative when the timestamps are inverted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_hours(&self) -> f64 {
        let micros = (self.dropoff_time - self.pickup_time)
            .num_microseconds()
            .unwrap_or(i64::MAX);
        micros as f64 / 3_600_000_000.0
    }

    /// Average speed in miles per hour.
    ///
    /// A duration of exactly zero is replaced by
    /// [`ZERO_DURATION_FLOOR_HOURS`].
    #[must_use]
    pub fn speed_mph(&self) -> f64 {
        let hours = self.duration_hours();
        let hours = if hours == 0.0 {
            ZERO_DURATION_FLOOR_HOURS
        } else {
            hours
        };
        self.trip_distance / hours
    }

    /// Surcharge with null treated as zero.
    #[must_use]
    pub fn surcharge(&self) -> f64 {
        self.congestion_surcharge.unwrap_or(0.0)
    }

    /// The calendar period of the pickup.
    #[must_use]
    pub fn pickup_period(&self) -> Period {
        Period {
            year: self.pickup_time.year(),
            month: self.pickup_time.month(),
        }
    }
}

/// Converts microseconds since the Unix epoch into a naive UTC timestamp.
#[must_use]
pub fn datetime_from_micros(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

/// Converts a naive UTC timestamp into microseconds since the Unix epoch.
#[must_use]
pub fn datetime_to_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}
