#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Derived-table row types for the taxi audit.
//!
//! Each aggregation produces rows of one type below; field names are the
//! published column names. [`TableRows`] pairs a result set with the
//! [`TableName`] it is published under.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use taxi_audit_zones::{LocationType, ZoneId};

/// Names of the published derived tables.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TableName {
    /// Totals over the clean partition.
    SummaryRevenue,
    /// Tip percentage and short-trip count.
    SummaryFairness,
    /// Fraud categories with counts.
    SummaryFraud,
    /// Pickup zones with the most fraud-flagged trips.
    AuditSuspiciousOrigins,
    /// Surcharge compliance for trips entering the zone.
    AuditLeakageStats,
    /// Pickup zones missing the surcharge most often.
    #[strum(serialize = "audit_top3_leakage_locs")]
    #[serde(rename = "audit_top3_leakage_locs")]
    AuditTopLeakageLocs,
    /// Zone-bound trips, baseline window versus comparison window.
    #[strum(serialize = "impact_q1_comparison")]
    #[serde(rename = "impact_q1_comparison")]
    ImpactQ1Comparison,
    /// Per border zone change in dropoffs.
    BorderEffect,
    /// In-zone speeds for the comparison window.
    VelocityHeatmap,
    /// In-zone speeds for the baseline window.
    VelocityHeatmapBaseline,
    /// Monthly surcharge versus tip trend.
    CrowdingOut,
    /// Daily trip counts joined with precipitation.
    WeatherElasticity,
    /// The simulated precipitation series itself.
    WeatherSimulated,
}

impl TableName {
    /// Returns all variants of this enum, in publication order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::SummaryRevenue,
            Self::SummaryFairness,
            Self::SummaryFraud,
            Self::AuditSuspiciousOrigins,
            Self::AuditLeakageStats,
            Self::AuditTopLeakageLocs,
            Self::ImpactQ1Comparison,
            Self::BorderEffect,
            Self::VelocityHeatmap,
            Self::VelocityHeatmapBaseline,
            Self::CrowdingOut,
            Self::WeatherElasticity,
            Self::WeatherSimulated,
        ]
    }

    /// CSV file name under the results directory.
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{self}.csv")
    }
}

/// `summary_revenue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueSummary {
    /// Sum of `total_amount`.
    pub total_revenue: f64,
    /// Sum of `congestion_surcharge`, nulls as zero.
    pub total_surcharge: f64,
    /// Clean trips.
    pub total_rides: u64,
}

/// `summary_fairness`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessSummary {
    /// Mean tip as a percentage of fare over trips with a positive fare.
    pub avg_tip_percent: Option<f64>,
    /// Trips under two miles ending in the congestion zone.
    pub short_trip_count: u64,
}

/// One row of `summary_fraud`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudCount {
    /// Category label.
    pub violation_type: String,
    /// Clean trips in the category.
    pub violation_count: u64,
}

/// One row of `audit_suspicious_origins`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousOrigin {
    /// Pickup zone.
    pub origin_zone: ZoneId,
    /// Fraud-flagged trips starting there.
    pub suspicious_trip_count: u64,
}

/// `audit_leakage_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakageStats {
    /// Trips from outside into the zone after the cutover.
    pub total_eligible: u64,
    /// Eligible trips that paid a surcharge.
    pub compliant_count: u64,
    /// `compliant / eligible * 100`; absent when nothing was eligible.
    pub compliance_rate_pct: Option<f64>,
    /// Non-compliant trips times the per-trip surcharge estimate.
    pub estimated_revenue_loss: f64,
}

/// One row of `audit_top3_leakage_locs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakyOrigin {
    /// Pickup zone.
    pub origin_zone: ZoneId,
    /// Eligible trips starting there.
    pub trip_count: u64,
    /// Of those, trips with a null or zero surcharge.
    pub missed_surcharge_count: u64,
    /// `missed / trips * 100`.
    pub leakage_rate_pct: f64,
}

/// One row of `impact_q1_comparison`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodVolume {
    /// Window label, e.g. `2025 Q1`.
    pub period_label: String,
    /// Trips ending in the congestion zone.
    pub trip_count: u64,
}

/// One row of `border_effect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderEffect {
    /// Border zone.
    pub zone_id: ZoneId,
    /// Change in dropoffs, baseline to comparison, in percent.
    pub pct_change: f64,
    /// Whether the zone is itself inside the congestion zone.
    pub location_type: LocationType,
}

/// One row of `velocity_heatmap` / `velocity_heatmap_baseline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityCell {
    /// ISO weekday, 1 = Monday.
    pub day_of_week: u32,
    /// Pickup hour, 0-23.
    pub hour_of_day: u32,
    /// Mean speed in mph.
    pub avg_speed: f64,
}

/// One row of `crowding_out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrowdingMonth {
    /// `YYYY-MM`.
    pub month: String,
    /// Mean surcharge, nulls as zero.
    pub avg_surcharge: f64,
    /// Mean tip as a percentage of fare.
    pub avg_tip_pct: f64,
}

/// One row of `weather_elasticity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDay {
    /// Calendar day.
    pub date: NaiveDate,
    /// Clean pickups that day.
    pub trip_count: u64,
    /// Simulated precipitation.
    pub prcp_mm: f64,
}

/// One row of `weather_simulated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipitationDay {
    /// Calendar day.
    pub date: NaiveDate,
    /// Precipitation in millimetres; exactly zero on dry days.
    pub prcp_mm: f64,
}

/// A derived table's rows, tagged with the table they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRows {
    /// `summary_revenue`.
    Revenue(Vec<RevenueSummary>),
    /// `summary_fairness`.
    Fairness(Vec<FairnessSummary>),
    /// `summary_fraud`.
    Fraud(Vec<FraudCount>),
    /// `audit_suspicious_origins`.
    SuspiciousOrigins(Vec<SuspiciousOrigin>),
    /// `audit_leakage_stats`.
    Leakage(Vec<LeakageStats>),
    /// `audit_top3_leakage_locs`.
    LeakyOrigins(Vec<LeakyOrigin>),
    /// `impact_q1_comparison`.
    PeriodVolumes(Vec<PeriodVolume>),
    /// `border_effect`.
    Border(Vec<BorderEffect>),
    /// `velocity_heatmap`.
    Velocity(Vec<VelocityCell>),
    /// `velocity_heatmap_baseline`.
    VelocityBaseline(Vec<VelocityCell>),
    /// `crowding_out`.
    Crowding(Vec<CrowdingMonth>),
    /// `weather_elasticity`.
    Weather(Vec<WeatherDay>),
    /// `weather_simulated`.
    Precipitation(Vec<PrecipitationDay>),
}

impl TableRows {
    /// The table these rows are published as.
    #[must_use]
    pub const fn name(&self) -> TableName {
        match self {
            Self::Revenue(_) => TableName::SummaryRevenue,
            Self::Fairness(_) => TableName::SummaryFairness,
            Self::Fraud(_) => TableName::SummaryFraud,
            Self::SuspiciousOrigins(_) => TableName::AuditSuspiciousOrigins,
            Self::Leakage(_) => TableName::AuditLeakageStats,
            Self::LeakyOrigins(_) => TableName::AuditTopLeakageLocs,
            Self::PeriodVolumes(_) => TableName::ImpactQ1Comparison,
            Self::Border(_) => TableName::BorderEffect,
            Self::Velocity(_) => TableName::VelocityHeatmap,
            Self::VelocityBaseline(_) => TableName::VelocityHeatmapBaseline,
            Self::Crowding(_) => TableName::CrowdingOut,
            Self::Weather(_) => TableName::WeatherElasticity,
            Self::Precipitation(_) => TableName::WeatherSimulated,
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Revenue(r) => r.len(),
            Self::Fairness(r) => r.len(),
            Self::Fraud(r) => r.len(),
            Self::SuspiciousOrigins(r) => r.len(),
            Self::Leakage(r) => r.len(),
            Self::LeakyOrigins(r) => r.len(),
            Self::PeriodVolumes(r) => r.len(),
            Self::Border(r) => r.len(),
            Self::Velocity(r) | Self::VelocityBaseline(r) => r.len(),
            Self::Crowding(r) => r.len(),
            Self::Weather(r) => r.len(),
            Self::Precipitation(r) => r.len(),
        }
    }

    /// `true` when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether demand responds to rain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Elasticity {
    /// `|r| >= 0.3`.
    Elastic,
    /// `|r| < 0.3`.
    Inelastic,
}

/// Figures computed from the derived tables after they are built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Percentage change in zone-bound trips, baseline to comparison
    /// window.
    pub q1_pct_change: Option<f64>,
    /// Pearson correlation between daily trips and precipitation.
    pub weather_correlation: Option<f64>,
    /// Label for [`Self::weather_correlation`].
    pub elasticity: Option<Elasticity>,
    /// Month with the most precipitation over days with trips, `YYYY-MM`.
    pub wettest_month: Option<String>,
}
