pub mod access;
pub mod analytics;
pub mod auth;
pub mod error;
pub mod hospitals;
pub mod middleware;
pub mod photos;
pub mod rate_limit;
pub mod reports;
pub mod security;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
};

use crate::auth::AppState;
use crate::error::expose_internal_errors;
use crate::middleware::require_auth;
use crate::rate_limit::{RateLimiter, limit_requests};

/// Whole-request cap; two 5 MiB photos plus form fields fit under it.
pub const MAX_BODY_SIZE: usize = 12 * 1024 * 1024;

/// The `/api` router. The caller adds CORS, tracing, static files and
/// [`security::harden`].
pub fn app(state: AppState, limiter: Option<Arc<RateLimiter>>) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/hospitals", get(hospitals::list_hospitals))
        .route("/health", get(hospitals::health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/reset-password", patch(auth::reset_password))
        .route("/reports", get(reports::list_reports).post(reports::create_report))
        .route("/reports/analytics/stats", get(analytics::get_stats))
        .route("/reports/{id}", get(reports::get_report).patch(reports::update_report))
        .route("/users", get(users::list_users))
        .route("/users/pending", get(users::list_pending_users))
        .route("/users/hospital-admins", get(users::list_hospital_admins))
        .route("/users/{id}/approve", patch(users::approve_user))
        .route("/users/{id}", delete(users::delete_user))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let mut api = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(from_fn_with_state(state, expose_internal_errors));

    if let Some(limiter) = limiter {
        api = api.layer(from_fn_with_state(limiter, limit_requests));
    }

    Router::new().nest("/api", api)
}
