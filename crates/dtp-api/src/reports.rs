use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use dtp_db::models::{PhotoRow, ReportFilter, ReportRow, ReportUpdate};
use dtp_db::{format_timestamp, now_timestamp, parse_timestamp};
use dtp_types::api::{
    Pagination, Photo, Report, ReportEnvelope, ReportPage, UpdateReportRequest,
};
use dtp_types::models::{DtpCategory, ReportStatus, Severity};

use crate::access::{MODERATORS, ReportScope, authorize};
use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, run_blocking};
use crate::middleware::CurrentUser;
use crate::photos::{self, MAX_PHOTO_SIZE, MAX_PHOTOS, PhotoUpload};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

/// Multipart field carrying the image files.
const PHOTOS_FIELD: &str = "photos";

/// Validated text fields of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDraft {
    pub hospital_name: String,
    pub ward: Option<String>,
    pub prescription_details: String,
    pub dtp_category: DtpCategory,
    pub custom_category: Option<String>,
    pub severity: Severity,
    pub prescribing_doctor: Option<String>,
    pub comments: Option<String>,
}

impl ReportDraft {
    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Self, ApiError> {
        let mut take = |key: &str| {
            fields
                .remove(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let (Some(hospital_name), Some(prescription_details), Some(category), Some(severity)) = (
            take("hospitalName"),
            take("prescriptionDetails"),
            take("dtpCategory"),
            take("severity"),
        ) else {
            return Err(ApiError::bad_request("Please provide all required fields"));
        };

        let dtp_category: DtpCategory = category
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid DTP category"))?;
        let severity: Severity = severity
            .parse()
            .map_err(|_| ApiError::bad_request("Invalid severity"))?;

        // A custom category only means something for "Other".
        let custom_category = take("customCategory").filter(|_| dtp_category == DtpCategory::Other);

        Ok(Self {
            hospital_name,
            ward: take("ward"),
            prescription_details,
            dtp_category,
            custom_category,
            severity,
            prescribing_doctor: take("prescribingDoctor"),
            comments: take("comments"),
        })
    }
}

/// POST /reports: multipart form, up to two images in `photos`.
pub async fn create_report(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
    WithRejection(mut multipart, _): WithRejection<Multipart, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let mut fields = HashMap::new();
    let mut uploads: Vec<PhotoUpload> = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name != PHOTOS_FIELD {
            fields.insert(name, field.text().await?);
            continue;
        }

        if uploads.len() == MAX_PHOTOS {
            return Err(ApiError::bad_request("Too many files (max 2)"));
        }
        let mimetype = field.content_type().unwrap_or_default().to_string();
        if !mimetype.starts_with("image/") {
            return Err(ApiError::bad_request("Invalid file type"));
        }
        let original_name = field.file_name().unwrap_or("photo").to_string();
        let data = field.bytes().await?;
        if data.len() > MAX_PHOTO_SIZE {
            return Err(ApiError::bad_request("File too large (max 5MB)"));
        }
        uploads.push(PhotoUpload {
            original_name,
            mimetype,
            data,
        });
    }

    let draft = ReportDraft::from_fields(fields)?;
    let stored = photos::upload_all(state.photos.as_ref(), &uploads).await?;

    let now = now_timestamp();
    let row = ReportRow {
        id: Uuid::new_v4().to_string(),
        pharmacist_id: caller.id.to_string(),
        pharmacist_name: caller.name.clone(),
        pharmacist_phone: caller.phone.clone(),
        hospital_name: draft.hospital_name,
        ward: draft.ward,
        prescription_details: draft.prescription_details,
        dtp_category: draft.dtp_category.as_str().to_string(),
        custom_category: draft.custom_category,
        severity: draft.severity.as_str().to_string(),
        prescribing_doctor: draft.prescribing_doctor,
        comments: draft.comments,
        status: ReportStatus::Submitted.as_str().to_string(),
        feedback: None,
        reviewed_by: None,
        reviewed_by_name: None,
        reviewed_at: None,
        created_at: now.clone(),
        updated_at: now,
        photos: stored
            .iter()
            .enumerate()
            .map(|(i, p)| PhotoRow {
                report_id: String::new(),
                position: i as i64,
                url: p.url.clone(),
                thumbnail_url: p.thumbnail_url.clone(),
                file_id: p.file_id.clone(),
                original_name: p.original_name.clone(),
                size: p.size as i64,
                mimetype: p.mimetype.clone(),
            })
            .collect(),
    };

    let db = state.clone();
    let saved = row.clone();
    if let Err(e) = run_blocking(move || Ok(db.db.insert_report(&saved)?)).await {
        warn!("Report insert failed, removing {} stored photos", stored.len());
        photos::compensate(state.photos.as_ref(), &stored).await;
        return Err(e);
    }

    info!(
        "Report {} submitted by {} for {} ({} photos)",
        row.id,
        caller.email,
        row.hospital_name,
        row.photos.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(ReportEnvelope {
            message: Some("DTP report submitted successfully".into()),
            report: report_from_row(row)?,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub hospital: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ReportQuery {
    /// Builds the row filter: role scope first, user filters on top.
    pub fn to_filter(&self, scope: &ReportScope) -> Result<ReportFilter, ApiError> {
        let mut filter = ReportFilter {
            hospital: non_empty(&self.hospital),
            category: non_empty(&self.category),
            severity: non_empty(&self.severity),
            status: non_empty(&self.status),
            created_from: non_empty(&self.date_from)
                .map(|raw| date_bound(&raw, false))
                .transpose()?,
            created_to: non_empty(&self.date_to)
                .map(|raw| date_bound(&raw, true))
                .transpose()?,
            ..Default::default()
        };
        scope.apply(&mut filter);
        Ok(filter)
    }
}

pub async fn list_reports(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
    WithRejection(Query(query), _): WithRejection<Query<ReportQuery>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let filter = query.to_filter(&ReportScope::for_caller(&caller))?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = u64::from(page - 1) * u64::from(limit);

    let (rows, total) = run_blocking(move || Ok(state.db.list_reports(&filter, limit, offset)?)).await?;

    let reports = rows
        .into_iter()
        .map(report_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(ReportPage {
        reports,
        pagination: Pagination {
            current: page,
            pages: total.div_ceil(u64::from(limit)) as u32,
            total,
        },
    }))
}

pub async fn get_report(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
    WithRejection(Path(report_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let row = run_blocking(move || Ok(state.db.get_report(&report_id.to_string())?))
        .await?
        .ok_or_else(|| ApiError::not_found("Report not found"))?;

    if !ReportScope::for_caller(&caller).permits(&row.pharmacist_id, &row.hospital_name) {
        return Err(ApiError::forbidden());
    }

    Ok(Json(ReportEnvelope {
        message: None,
        report: report_from_row(row)?,
    }))
}

/// PATCH /reports/{id}: status and feedback. Any status value is accepted,
/// including moving backwards; concurrent updates are last-write-wins.
pub async fn update_report(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
    WithRejection(Path(report_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateReportRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    authorize(&caller, MODERATORS, None)?;

    let profile = caller.0.clone();
    let row = run_blocking(move || {
        let id = report_id.to_string();
        let report = state
            .db
            .get_report(&id)?
            .ok_or_else(|| ApiError::not_found("Report not found"))?;
        authorize(&profile, MODERATORS, Some(&report.hospital_name))?;

        let feedback = req
            .feedback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        let reviewed = req.status == Some(ReportStatus::Reviewed) || feedback.is_some();

        let now = now_timestamp();
        let update = ReportUpdate {
            status: req.status.map(|s| s.as_str().to_string()),
            feedback,
            reviewed_by: reviewed.then(|| profile.id.to_string()),
            reviewed_at: reviewed.then(|| now.clone()),
            updated_at: now,
        };
        state.db.update_report(&id, &update)?;

        state
            .db
            .get_report(&id)?
            .ok_or_else(|| ApiError::not_found("Report not found"))
    })
    .await?;

    info!("{} updated report {} (status {})", caller.email, row.id, row.status);

    Ok(Json(ReportEnvelope {
        message: Some("Report updated successfully".into()),
        report: report_from_row(row)?,
    }))
}

pub fn report_from_row(row: ReportRow) -> anyhow::Result<Report> {
    Ok(Report {
        id: row.id.parse()?,
        pharmacist_id: row.pharmacist_id.parse()?,
        pharmacist_name: row.pharmacist_name,
        pharmacist_phone: row.pharmacist_phone,
        hospital_name: row.hospital_name,
        ward: row.ward,
        prescription_details: row.prescription_details,
        dtp_category: row.dtp_category.parse()?,
        custom_category: row.custom_category,
        severity: row.severity.parse()?,
        prescribing_doctor: row.prescribing_doctor,
        comments: row.comments,
        photos: row
            .photos
            .into_iter()
            .map(|p| Photo {
                url: p.url,
                thumbnail_url: p.thumbnail_url,
                file_id: p.file_id,
                original_name: p.original_name,
                size: p.size.max(0) as u64,
                mimetype: p.mimetype,
            })
            .collect(),
        status: row.status.parse()?,
        feedback: row.feedback,
        reviewed_by: row.reviewed_by.as_deref().map(str::parse).transpose()?,
        reviewed_by_name: row.reviewed_by_name,
        reviewed_at: row.reviewed_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Accepts an RFC 3339 instant or a bare `YYYY-MM-DD`. A bare date used as
/// an upper bound covers the whole day.
fn date_bound(raw: &str, end_of_day: bool) -> Result<String, ApiError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(format_timestamp(at.with_timezone(&Utc)));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("Invalid date '{}'", raw)))?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| ApiError::bad_request(format!("Invalid date '{}'", raw)))?;
    Ok(format_timestamp(date.and_time(time).and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn draft_requires_core_fields() {
        let err = ReportDraft::from_fields(fields(&[("hospitalName", "H1"), ("severity", "mild")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Please provide all required fields");
    }

    #[test]
    fn custom_category_only_for_other() {
        let base = [
            ("hospitalName", "H1"),
            ("prescriptionDetails", "Warfarin + aspirin"),
            ("severity", "severe"),
            ("customCategory", "Look-alike packaging"),
        ];

        let mut other = fields(&base);
        other.insert("dtpCategory".into(), "Other".into());
        let draft = ReportDraft::from_fields(other).unwrap();
        assert_eq!(draft.custom_category.as_deref(), Some("Look-alike packaging"));

        let mut interaction = fields(&base);
        interaction.insert("dtpCategory".into(), "Drug interaction".into());
        let draft = ReportDraft::from_fields(interaction).unwrap();
        assert_eq!(draft.dtp_category, DtpCategory::DrugInteraction);
        assert!(draft.custom_category.is_none());
    }

    #[test]
    fn unknown_enums_are_bad_requests() {
        let err = ReportDraft::from_fields(fields(&[
            ("hospitalName", "H1"),
            ("prescriptionDetails", "x"),
            ("dtpCategory", "Wrong dose"),
            ("severity", "fatal"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn date_bounds() {
        assert_eq!(date_bound("2025-02-01", false).unwrap(), "2025-02-01T00:00:00.000000Z");
        assert_eq!(date_bound("2025-02-01", true).unwrap(), "2025-02-01T23:59:59.999999Z");
        assert_eq!(
            date_bound("2025-02-01T10:00:00+01:00", true).unwrap(),
            "2025-02-01T09:00:00.000000Z"
        );
        assert!(date_bound("01/02/2025", false).is_err());
    }

    #[test]
    fn query_filters_stack_on_scope() {
        let query = ReportQuery {
            hospital: Some("H2".into()),
            severity: Some(" ".into()),
            ..Default::default()
        };
        let filter = query
            .to_filter(&ReportScope::Hospital("H1".into()))
            .unwrap();
        assert_eq!(filter.scope_hospital.as_deref(), Some("H1"));
        assert_eq!(filter.hospital.as_deref(), Some("H2"));
        assert!(filter.severity.is_none());
    }
}
