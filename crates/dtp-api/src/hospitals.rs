use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;

use dtp_db::models::HospitalRow;
use dtp_types::api::{HealthResponse, Hospital, HospitalList};

use crate::auth::AppState;
use crate::error::{ApiResult, run_blocking};

fn hospital_from_row(row: HospitalRow) -> anyhow::Result<Hospital> {
    Ok(Hospital {
        id: row.id.parse()?,
        name: row.name,
        location: row.location,
        kind: row.kind.parse()?,
    })
}

/// GET /hospitals: public, active hospitals sorted by name.
pub async fn list_hospitals(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rows = run_blocking(move || Ok(state.db.list_active_hospitals()?)).await?;

    let hospitals = rows
        .into_iter()
        .map(hospital_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(HospitalList { hospitals }))
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "OK".into(),
        timestamp: Utc::now(),
    })
}
