#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pipeline configuration.
//!
//! The default configuration is embedded at compile time from
//! `config/default.toml`. A replacement file can be supplied with
//! `--config` or the `TAXI_AUDIT_CONFIG` environment variable; it must be
//! a complete configuration.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Embedded default configuration.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "TAXI_AUDIT_CONFIG";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TOML was malformed or missing required fields.
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are out of range.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of the offending value.
        message: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Input and output directories.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Analysis windows and constants.
    pub analysis: AnalysisConfig,
    /// Missing-period synthesis.
    pub imputation: ImputationConfig,
    /// Simulated precipitation series.
    pub weather: WeatherConfig,
    /// Embedded query engine settings.
    pub engine: EngineConfig,
}

/// Directory overrides. `None` falls back to the project `data/` layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory of raw `{dialect}_tripdata_{YYYY-MM}.parquet` batches.
    pub raw_dir: Option<PathBuf>,
    /// Directory receiving the `clean/` and `audit/` partitions.
    pub processed_dir: Option<PathBuf>,
    /// Directory receiving derived tables and the run manifest.
    pub results_dir: Option<PathBuf>,
}

/// Analysis windows and constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Year under audit (post-policy).
    pub target_year: i32,
    /// Year used as the pre-policy baseline.
    pub baseline_year: i32,
    /// Calendar months compared between baseline and target years.
    pub comparison_months: Vec<u32>,
    /// Pickups on or after this date are subject to the surcharge.
    pub cutover_date: NaiveDate,
    /// Assumed surcharge per non-compliant trip when estimating losses.
    pub estimated_surcharge: f64,
    /// Pickup zones need more eligible trips than this to be ranked.
    pub leakage_min_trips: u64,
    /// Number of leaky pickup zones reported.
    pub top_leaky_origins: u32,
    /// Number of suspicious pickup zones reported.
    pub top_suspicious_origins: u32,
}

/// One historical period contributing to the synthesized period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImputationSource {
    /// How many years before the target period to sample from.
    pub years_back: i32,
    /// Fraction of that period's rows to keep, in `[0, 1]`.
    pub ratio: f64,
}

/// Missing-period synthesis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationConfig {
    /// Month of the target year to synthesize when absent.
    pub month: u32,
    /// Sampling seed.
    pub seed: u64,
    /// Contributing periods.
    pub sources: Vec<ImputationSource>,
}

/// Simulated precipitation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Generator seed.
    pub seed: u64,
    /// Chance that a day is rainy.
    pub rain_probability: f64,
    /// Gamma shape for rainy-day precipitation.
    pub gamma_shape: f64,
    /// Gamma scale (mm) for rainy-day precipitation.
    pub gamma_scale: f64,
}

/// `DuckDB` settings applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads per connection.
    pub threads: u32,
    /// Memory limit per connection, in `DuckDB` syntax (e.g. `512MB`).
    pub memory_limit: String,
    /// Batches or aggregations run concurrently, each on its own
    /// connection.
    pub max_parallel: usize,
}

/// Parses and validates a configuration from a TOML string.
///
/// # Errors
///
/// Returns [`ConfigError`] if the TOML is malformed or a value is out of
/// range.
pub fn parse_config(toml_str: &str) -> Result<AuditConfig, ConfigError> {
    let config: AuditConfig = toml::from_str(toml_str)?;
    config.validate()?;
    Ok(config)
}

/// Loads configuration from `path`, then `$TAXI_AUDIT_CONFIG`, then the
/// embedded default.
///
/// # Errors
///
/// Returns [`ConfigError`] if the chosen file cannot be read or parsed.
pub fn load(path: Option<&Path>) -> Result<AuditConfig, ConfigError> {
    let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let Some(path) = path.map(Path::to_path_buf).or(from_env) else {
        log::info!("Using embedded default configuration");
        return parse_config(DEFAULT_CONFIG_TOML);
    };

    log::info!("Loading configuration from {}", path.display());
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    parse_config(&contents)
}

impl AuditConfig {
    /// Checks value ranges that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        let analysis = &self.analysis;
        if analysis.comparison_months.is_empty() {
            return invalid("analysis.comparison_months must not be empty".to_string());
        }
        if let Some(m) = analysis
            .comparison_months
            .iter()
            .find(|m| !(1..=12).contains(*m))
        {
            return invalid(format!("analysis.comparison_months contains {m}"));
        }
        if analysis.baseline_year >= analysis.target_year {
            return invalid(format!(
                "analysis.baseline_year {} must precede target_year {}",
                analysis.baseline_year, analysis.target_year
            ));
        }

        if !(1..=12).contains(&self.imputation.month) {
            return invalid(format!("imputation.month {}", self.imputation.month));
        }
        for (i, source) in self.imputation.sources.iter().enumerate() {
            if self.imputation.sources[..i]
                .iter()
                .any(|other| other.years_back == source.years_back)
            {
                return invalid(format!(
                    "imputation sources repeat years_back {}",
                    source.years_back
                ));
            }
            if source.years_back <= 0 {
                return invalid(format!(
                    "imputation source years_back {} must be positive",
                    source.years_back
                ));
            }
            if !(0.0..=1.0).contains(&source.ratio) {
                return invalid(format!("imputation source ratio {}", source.ratio));
            }
        }

        let weather = &self.weather;
        if !(0.0..=1.0).contains(&weather.rain_probability) {
            return invalid(format!(
                "weather.rain_probability {}",
                weather.rain_probability
            ));
        }
        if weather.gamma_shape <= 0.0 || weather.gamma_scale <= 0.0 {
            return invalid(format!(
                "weather gamma parameters must be positive (shape {}, scale {})",
                weather.gamma_shape, weather.gamma_scale
            ));
        }

        if self.engine.threads == 0 || self.engine.max_parallel == 0 {
            return invalid(format!(
                "engine.threads ({}) and engine.max_parallel ({}) must be at least 1",
                self.engine.threads, self.engine.max_parallel
            ));
        }

        Ok(())
    }
}
