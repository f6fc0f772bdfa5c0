use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use dtp_db::models::UserRow;
use dtp_db::{now_timestamp, parse_timestamp};
use dtp_types::api::{MessageBody, UserEnvelope, UserList, UserProfile};
use dtp_types::models::Role;

use crate::access::{MODERATORS, STATE_ONLY, authorize};
use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, run_blocking};
use crate::middleware::CurrentUser;

/// Strips the password hash and parses the stored enums and timestamps.
pub fn profile_from_row(row: UserRow) -> anyhow::Result<UserProfile> {
    Ok(UserProfile {
        id: row.id.parse()?,
        name: row.name,
        email: row.email,
        hospital: row.hospital,
        phone: row.phone,
        registration_number: row.registration_number,
        role: row.role.parse()?,
        approved: row.approved,
        last_login: row.last_login.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn profiles(rows: Vec<UserRow>) -> anyhow::Result<Vec<UserProfile>> {
    rows.into_iter().map(profile_from_row).collect()
}

/// Hospital admins only see accounts registered at their own hospital.
fn hospital_filter(caller: &UserProfile) -> Option<String> {
    (caller.role == Role::HospitalAdmin).then(|| caller.hospital.clone())
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    authorize(&caller, MODERATORS, None)?;

    let hospital = hospital_filter(&caller);
    let rows = run_blocking(move || Ok(state.db.list_users(hospital.as_deref(), false)?)).await?;

    Ok(Json(UserList { users: profiles(rows)? }))
}

pub async fn list_pending_users(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    authorize(&caller, MODERATORS, None)?;

    let hospital = hospital_filter(&caller);
    let rows = run_blocking(move || Ok(state.db.list_users(hospital.as_deref(), true)?)).await?;

    Ok(Json(UserList { users: profiles(rows)? }))
}

pub async fn list_hospital_admins(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    authorize(&caller, STATE_ONLY, None)?;

    let rows = run_blocking(move || {
        Ok(state.db.list_users_by_role(Role::HospitalAdmin.as_str())?)
    })
    .await?;

    Ok(Json(UserList { users: profiles(rows)? }))
}

pub async fn approve_user(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    authorize(&caller, MODERATORS, None)?;

    let profile = caller.0.clone();
    let row = run_blocking(move || {
        let id = user_id.to_string();
        let mut row = state
            .db
            .get_user_by_id(&id)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        authorize(&profile, MODERATORS, Some(&row.hospital))?;

        let now = now_timestamp();
        state.db.approve_user(&id, &now)?;
        row.approved = true;
        row.updated_at = now;
        Ok(row)
    })
    .await?;

    info!("{} approved {} ({})", caller.email, row.email, row.hospital);

    Ok(Json(UserEnvelope {
        message: Some("User approved successfully".into()),
        user: profile_from_row(row)?,
    }))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    authorize(&caller, MODERATORS, None)?;

    let profile = caller.0.clone();
    let email = run_blocking(move || {
        let id = user_id.to_string();
        let row = state
            .db
            .get_user_by_id(&id)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        authorize(&profile, MODERATORS, Some(&row.hospital))?;

        state.db.delete_user(&id)?;
        Ok(row.email)
    })
    .await?;

    info!("{} deleted user {}", caller.email, email);

    Ok(Json(MessageBody::new("User deleted successfully")))
}
