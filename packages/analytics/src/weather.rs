//! Simulated daily precipitation and its join with daily trip counts.
//!
//! No observed weather feed is used. The series is drawn from a seeded
//! `Pcg64` generator: each day is rainy with the configured probability,
//! and rainy days draw an amount from a gamma distribution. The draw order
//! is fixed (one uniform per day, then one gamma sample on rainy days), so
//! a given seed always yields the same series.

use chrono::{Datelike as _, NaiveDate};
use duckdb::{Connection, params};
use rand::{Rng as _, SeedableRng as _};
use rand_distr::{Distribution as _, Gamma};
use rand_pcg::Pcg64;
use taxi_audit_analytics_models::{PrecipitationDay, WeatherDay};
use taxi_audit_config::WeatherConfig;

use crate::{AnalysisInputs, AnalyticsError, to_count};

/// Rounds to hundredths of a millimetre.
fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One precipitation value per calendar day of `year`.
///
/// # Errors
///
/// Returns [`AnalyticsError::Conversion`] if the gamma parameters are
/// invalid or `year` is out of range.
pub fn simulate_precipitation(
    year: i32,
    config: &WeatherConfig,
) -> Result<Vec<PrecipitationDay>, AnalyticsError> {
    let gamma = Gamma::new(config.gamma_shape, config.gamma_scale).map_err(|e| {
        AnalyticsError::Conversion {
            message: format!("gamma distribution: {e}"),
        }
    })?;
    let first = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| AnalyticsError::Conversion {
        message: format!("year {year} out of range"),
    })?;

    let mut rng = Pcg64::seed_from_u64(config.seed);
    let series = first
        .iter_days()
        .take_while(|date| date.year() == year)
        .map(|date| {
            let rainy = rng.r#gen::<f64>() < config.rain_probability;
            let prcp_mm = if rainy {
                round_2dp(gamma.sample(&mut rng))
            } else {
                0.0
            };
            PrecipitationDay { date, prcp_mm }
        })
        .collect();

    Ok(series)
}

/// Daily clean pickups inner-joined with the simulated series for the
/// target year.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing, the
/// series cannot be generated, or a query fails.
pub fn elasticity(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<WeatherDay>, AnalyticsError> {
    let series = simulate_precipitation(inputs.analysis.target_year, &inputs.weather)?;

    conn.execute_batch("CREATE TEMP TABLE weather (date DATE, prcp_mm DOUBLE)")?;
    {
        let mut insert = conn.prepare("INSERT INTO weather VALUES (CAST(? AS DATE), ?)")?;
        for day in &series {
            insert.execute(params![day.date.format("%Y-%m-%d").to_string(), day.prcp_mm])?;
        }
    }

    let sql = format!(
        "WITH daily AS (
            SELECT CAST(pickup_time AS DATE) AS date, COUNT(*) AS trip_count
            FROM {source}
            GROUP BY 1
         )
         SELECT CAST(w.date AS VARCHAR), d.trip_count, w.prcp_mm
         FROM daily d
         JOIN weather w ON d.date = w.date
         ORDER BY w.date",
        source = inputs.clean_source()?,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;

    let mut days = Vec::new();
    for row in rows {
        let (date, count, prcp_mm) = row?;
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
            AnalyticsError::Conversion {
                message: format!("date '{date}': {e}"),
            }
        })?;
        days.push(WeatherDay {
            date,
            trip_count: to_count(count)?,
            prcp_mm,
        });
    }
    Ok(days)
}
