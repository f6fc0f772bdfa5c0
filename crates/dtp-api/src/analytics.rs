use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{DateTime, NaiveDate, Utc};

use dtp_db::models::ReportFilter;
use dtp_types::api::{AnalyticsStats, CategoryCount, HospitalCount, MonthCount, SeverityCount};

use crate::access::{ADMINS, ReportScope, authorize};
use crate::auth::AppState;
use crate::error::{ApiResult, run_blocking};
use crate::middleware::CurrentUser;

const TOP_HOSPITALS: u32 = 10;

/// GET /reports/analytics/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    authorize(&caller, ADMINS, None)?;

    let mut filter = ReportFilter::default();
    ReportScope::for_caller(&caller).apply(&mut filter);
    let statewide = caller.role.is_statewide();

    let (categories, severities, months, hospitals) = run_blocking(move || {
        let db = &state.db;
        let hospitals = if statewide {
            db.top_hospitals(&filter, TOP_HOSPITALS)?
        } else {
            Vec::new()
        };
        Ok((
            db.count_reports_by_category(&filter)?,
            db.count_reports_by_severity(&filter)?,
            db.count_reports_by_month(&filter)?,
            hospitals,
        ))
    })
    .await?;

    let category_stats = categories
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    let severity_stats = severities
        .into_iter()
        .map(|(severity, count)| SeverityCount { severity, count })
        .collect();
    let trend_stats = months
        .into_iter()
        .map(|(month, count)| month_start(&month).map(|date| MonthCount { date, count }))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let hospital_stats = hospitals
        .into_iter()
        .map(|(hospital, count)| HospitalCount { hospital, count })
        .collect();

    Ok(Json(AnalyticsStats {
        category_stats,
        severity_stats,
        trend_stats,
        hospital_stats,
    }))
}

/// `YYYY-MM` to midnight UTC on the first of that month.
fn month_start(month: &str) -> anyhow::Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Bad month bucket '{}': {}", month, e))?;
    date.and_hms_opt(0, 0, 0)
        .map(|at| at.and_utc())
        .ok_or_else(|| anyhow::anyhow!("Bad month bucket '{}'", month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_buckets_become_first_of_month() {
        let at = month_start("2025-03").unwrap();
        assert_eq!(at.to_rfc3339(), "2025-03-01T00:00:00+00:00");
        assert!(month_start("2025-13").is_err());
    }
}
