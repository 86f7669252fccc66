//! Monthly surcharge against tip share, to see whether surcharges crowd
//! out tips.

use duckdb::Connection;
use taxi_audit_analytics_models::CrowdingMonth;

use crate::summary::TIP_PERCENT_SQL;
use crate::{AnalysisInputs, AnalyticsError};

/// One row per pickup month from the start of the baseline year through the
/// end of the target year, over trips with a positive fare.
///
/// # Errors
///
/// Returns [`AnalyticsError`] if the clean partition is missing or the
/// query fails.
pub fn monthly(
    conn: &Connection,
    inputs: &AnalysisInputs,
) -> Result<Vec<CrowdingMonth>, AnalyticsError> {
    let sql = format!(
        "SELECT
            strftime(pickup_time, '%Y-%m') AS month,
            AVG(COALESCE(congestion_surcharge, 0)) AS avg_surcharge,
            AVG({TIP_PERCENT_SQL}) AS avg_tip_pct
         FROM {source}
         WHERE fare > 0
           AND pickup_time >= DATE '{from:04}-01-01'
           AND pickup_time < DATE '{until:04}-01-01'
         GROUP BY 1
         ORDER BY 1",
        source = inputs.clean_source()?,
        from = inputs.analysis.baseline_year,
        until = inputs.analysis.target_year + 1,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(CrowdingMonth {
            month: row.get(0)?,
            avg_surcharge: row.get(1)?,
            avg_tip_pct: row.get(2)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(AnalyticsError::from)
}
