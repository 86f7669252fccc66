//! Statistics computed from finished derived tables.

use std::collections::BTreeMap;

use taxi_audit_analytics_models::{Elasticity, PeriodVolume, RunStatistics, WeatherDay};

/// Below this absolute correlation, demand is considered unaffected by rain.
pub const ELASTICITY_THRESHOLD: f64 = 0.3;

/// `(new - old) / old * 100`, or `None` when `old` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pct_change(old: u64, new: u64) -> Option<f64> {
    (old > 0).then(|| (new as f64 - old as f64) / old as f64 * 100.0)
}

/// Pearson correlation of two equally long samples.
///
/// `None` with fewer than two pairs or when either sample is constant.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Labels a correlation coefficient.
#[must_use]
pub fn classify_elasticity(r: f64) -> Elasticity {
    if r.abs() < ELASTICITY_THRESHOLD {
        Elasticity::Inelastic
    } else {
        Elasticity::Elastic
    }
}

/// Month (`YYYY-MM`) with the most total precipitation over days that had
/// trips. Ties go to the earlier month.
#[must_use]
pub fn wettest_month(days: &[WeatherDay]) -> Option<String> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for day in days {
        *totals.entry(day.date.format("%Y-%m").to_string()).or_default() += day.prcp_mm;
    }

    let mut best: Option<(String, f64)> = None;
    for (month, total) in totals {
        if best.as_ref().is_none_or(|(_, b)| total > *b) {
            best = Some((month, total));
        }
    }
    best.map(|(month, _)| month)
}

/// Computes every run statistic from whichever tables were built.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn run_statistics(
    volumes: Option<&[PeriodVolume]>,
    weather: Option<&[WeatherDay]>,
) -> RunStatistics {
    let q1_pct_change = volumes.and_then(|v| match v {
        [baseline, comparison, ..] => pct_change(baseline.trip_count, comparison.trip_count),
        _ => None,
    });

    let weather_correlation = weather.and_then(|days| {
        let trips: Vec<f64> = days.iter().map(|d| d.trip_count as f64).collect();
        let prcp: Vec<f64> = days.iter().map(|d| d.prcp_mm).collect();
        pearson(&trips, &prcp)
    });

    RunStatistics {
        q1_pct_change,
        weather_correlation,
        elasticity: weather_correlation.map(classify_elasticity),
        wettest_month: weather.and_then(wettest_month),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn percentage_change() {
        assert!((pct_change(1000, 800).unwrap() - -20.0).abs() < 1e-9);
        assert!((pct_change(50, 75).unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(pct_change(0, 10), None);
    }

    #[test]
    fn correlation_edge_cases() {
        assert_eq!(pearson(&[1.0], &[2.0]), None);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);

        let r = pearson(&[1.0, 2.0, 3.0, 4.0], &[2.0, 4.0, 6.0, 8.0]).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        let r = pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn elasticity_labels() {
        assert_eq!(classify_elasticity(0.29), Elasticity::Inelastic);
        assert_eq!(classify_elasticity(-0.29), Elasticity::Inelastic);
        assert_eq!(classify_elasticity(0.3), Elasticity::Elastic);
        assert_eq!(classify_elasticity(-0.8), Elasticity::Elastic);
    }

    #[test]
    fn wettest_month_sums_days() {
        let day = |m: u32, d: u32, prcp_mm: f64| WeatherDay {
            date: NaiveDate::from_ymd_opt(2025, m, d).unwrap(),
            trip_count: 100,
            prcp_mm,
        };
        let series = [
            day(1, 1, 10.0),
            day(1, 2, 0.0),
            day(2, 1, 6.0),
            day(2, 2, 6.0),
            day(3, 1, 12.0),
        ];
        assert_eq!(wettest_month(&series).as_deref(), Some("2025-02"));
        assert_eq!(wettest_month(&[]), None);
    }

    #[test]
    fn statistics_tolerate_missing_tables() {
        let stats = run_statistics(None, None);
        assert_eq!(stats, RunStatistics::default());

        let volumes = [
            PeriodVolume {
                period_label: "2024 Q1".to_string(),
                trip_count: 1000,
            },
            PeriodVolume {
                period_label: "2025 Q1".to_string(),
                trip_count: 800,
            },
        ];
        let stats = run_statistics(Some(&volumes), Some(&[]));
        assert!((stats.q1_pct_change.unwrap() - -20.0).abs() < 1e-9);
        assert_eq!(stats.weather_correlation, None);
        assert_eq!(stats.elasticity, None);
        assert_eq!(stats.wettest_month, None);
    }

    #[test]
    fn wettest_month_ignores_days_without_trips() {
        // The simulated series has a very wet March, but no trips were
        // recorded in March, so it never reaches the merged rows.
        let merged = [
            WeatherDay {
                date: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
                trip_count: 40,
                prcp_mm: 4.5,
            },
            WeatherDay {
                date: NaiveDate::from_ymd_opt(2025, 2, 7).unwrap(),
                trip_count: 25,
                prcp_mm: 9.0,
            },
        ];
        let stats = run_statistics(None, Some(&merged));
        assert_eq!(stats.wettest_month.as_deref(), Some("2025-02"));
    }
}
