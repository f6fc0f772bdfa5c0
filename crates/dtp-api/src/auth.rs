use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::WithRejection;
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use dtp_db::models::UserRow;
use dtp_db::{Database, now_timestamp};
use dtp_types::api::{
    Claims, LoginRequest, LoginResponse, MessageBody, RegisterRequest, ResetPasswordRequest,
    UserEnvelope,
};
use dtp_types::models::Role;

use crate::access::{ADMINS, authorize};
use crate::error::{ApiError, ApiResult, run_blocking};
use crate::middleware::CurrentUser;
use crate::photos::PhotoStore;
use crate::users::profile_from_row;

pub const MIN_PASSWORD_LEN: usize = 6;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt: JwtSettings,
    pub photos: Arc<dyn PhotoStore>,
    /// Development mode: 500 bodies include the underlying error text.
    pub expose_internal_errors: bool,
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub ttl: chrono::Duration,
}

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let (
        Some(name),
        Some(email),
        Some(password),
        Some(hospital),
        Some(role),
        Some(registration_number),
        Some(phone),
    ) = (
        required(req.name),
        required(req.email),
        req.password.filter(|p| !p.is_empty()),
        required(req.hospital),
        required(req.role),
        required(req.registration_number),
        required(req.phone),
    )
    else {
        return Err(ApiError::bad_request("Please provide all required fields"));
    };

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 6 characters"));
    }

    let role: Role = role
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid role"))?;
    let email = email.to_lowercase();

    let db = state.clone();
    let user = run_blocking(move || {
        if db.db.get_user_by_email(&email)?.is_some() {
            return Err(ApiError::bad_request("User already exists"));
        }
        if !db.db.hospital_exists(&hospital)? {
            return Err(ApiError::bad_request("Invalid hospital selection"));
        }

        let now = now_timestamp();
        let row = UserRow {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            password: hash_password(&password)?,
            hospital,
            registration_number: Some(registration_number),
            phone: Some(phone),
            role: role.as_str().to_string(),
            approved: false,
            last_login: None,
            created_at: now.clone(),
            updated_at: now,
        };

        // The unique index still catches a concurrent registration.
        if !db.db.create_user(&row)? {
            return Err(ApiError::bad_request("User already exists"));
        }
        Ok(row)
    })
    .await?;

    info!("Registered {} ({}) at {}, awaiting approval", user.email, user.role, user.hospital);

    Ok((
        StatusCode::CREATED,
        Json(UserEnvelope {
            message: Some("Registration successful! Awaiting admin approval.".into()),
            user: profile_from_row(user)?,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let (Some(email), Some(password)) = (required(req.email), req.password.filter(|p| !p.is_empty()))
    else {
        return Err(ApiError::bad_request("Please provide email and password"));
    };
    let email = email.to_lowercase();

    let db = state.clone();
    let mut user = run_blocking(move || {
        let user = db
            .db
            .get_user_by_email(&email)?
            .ok_or_else(|| ApiError::bad_request("Invalid credentials"))?;

        // Approval is checked before the password so an unapproved account
        // always answers 403.
        if !user.approved {
            warn!("Login refused for unapproved account {}", user.email);
            return Err(ApiError::Forbidden("Account not approved yet".into()));
        }

        if !verify_password(&password, &user.password)? {
            return Err(ApiError::bad_request("Invalid credentials"));
        }

        Ok(user)
    })
    .await?;

    let now = now_timestamp();
    let db = state.clone();
    let (id, at) = (user.id.clone(), now.clone());
    run_blocking(move || Ok(db.db.record_login(&id, &at)?)).await?;
    user.last_login = Some(now);

    let profile = profile_from_row(user)?;
    let token = create_token(&state.jwt, profile.id, &profile.email, profile.role)?;

    info!("{} logged in", profile.email);

    Ok(Json(LoginResponse { token, user: profile }))
}

pub async fn me(Extension(caller): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    Ok(Json(UserEnvelope {
        message: None,
        user: caller.0,
    }))
}

/// Self-service password change, or an admin resetting another account
/// when `userId` is present.
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(caller): Extension<CurrentUser>,
    WithRejection(Json(req), _): WithRejection<Json<ResetPasswordRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let new_password = req
        .new_password
        .filter(|p| p.chars().count() >= MIN_PASSWORD_LEN)
        .ok_or_else(|| ApiError::bad_request("New password must be at least 6 characters long"))?;

    if let Some(target_id) = req.user_id {
        authorize(&caller, ADMINS, None)
            .map_err(|_| ApiError::Forbidden("Unauthorized to reset other users password".into()))?;

        let db = state.clone();
        run_blocking(move || {
            let hash = hash_password(&new_password)?;
            if !db.db.set_password(&target_id.to_string(), &hash, &now_timestamp())? {
                return Err(ApiError::not_found("Target user not found"));
            }
            Ok(())
        })
        .await?;

        info!("{} reset the password of user {}", caller.email, target_id);
        return Ok(Json(MessageBody::new("Password reset successfully for target user")));
    }

    let current = req
        .current_password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Current password is required"))?;

    let db = state.clone();
    let user_id = caller.id.to_string();
    run_blocking(move || {
        let user = db
            .db
            .get_user_by_id(&user_id)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        if !verify_password(&current, &user.password)? {
            return Err(ApiError::bad_request("Current password is incorrect"));
        }
        let hash = hash_password(&new_password)?;
        db.db.set_password(&user.id, &hash, &now_timestamp())?;
        Ok(())
    })
    .await?;

    info!("{} changed their password", caller.email);
    Ok(Json(MessageBody::new("Password changed successfully")))
}

/// Creates the first state admin when none exists. Returns true when an
/// account was created.
pub fn ensure_state_admin(db: &Database, name: &str, email: &str, password: &str) -> anyhow::Result<bool> {
    if db.role_exists(Role::StateAdmin.as_str())? {
        info!("Admin already exists");
        return Ok(false);
    }

    let now = now_timestamp();
    let row = UserRow {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.trim().to_lowercase(),
        password: hash_password(password)?,
        hospital: "HQ".to_string(),
        registration_number: None,
        phone: None,
        role: Role::StateAdmin.as_str().to_string(),
        approved: true,
        last_login: None,
        created_at: now.clone(),
        updated_at: now,
    };
    if !db.create_user(&row)? {
        anyhow::bail!("Cannot seed admin: {} is already registered", row.email);
    }

    info!("Seeded state admin {}", row.email);
    Ok(true)
}

pub fn create_token(jwt: &JwtSettings, user_id: Uuid, email: &str, role: Role) -> anyhow::Result<String> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        role,
        iat: now.timestamp() as usize,
        exp: (now + jwt.ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt.secret.as_bytes()),
    )?;

    Ok(token)
}

/// Hash password with Argon2id
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Stored hash is corrupt: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Trimmed value, or `None` when missing or blank.
fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("pharm123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("pharm123", &hash).unwrap());
        assert!(!verify_password("pharm124", &hash).unwrap());
    }

    #[test]
    fn token_carries_identity() {
        let jwt = JwtSettings {
            secret: "test-secret".into(),
            ttl: chrono::Duration::days(7),
        };
        let id = Uuid::new_v4();
        let token = create_token(&jwt, id, "a@dtp.ng", Role::HospitalAdmin).unwrap();
        let claims = decode_token("test-secret", &token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::HospitalAdmin);
        assert!(decode_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let jwt = JwtSettings {
            secret: "test-secret".into(),
            ttl: chrono::Duration::hours(-2),
        };
        let token = create_token(&jwt, Uuid::new_v4(), "a@dtp.ng", Role::Pharmacist).unwrap();
        assert!(decode_token("test-secret", &token).is_err());
    }

    #[test]
    fn seeds_a_single_state_admin() {
        let db = Database::open_in_memory().unwrap();
        assert!(ensure_state_admin(&db, "Director", "DPS@dtp.com", "Admin54673289").unwrap());
        assert!(!ensure_state_admin(&db, "Director", "dps@dtp.com", "Admin54673289").unwrap());
        let admin = db.get_user_by_email("dps@dtp.com").unwrap().unwrap();
        assert!(admin.approved);
        assert_eq!(admin.role, "state_admin");
    }
}
