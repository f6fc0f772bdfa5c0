use std::ops::Deref;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use dtp_types::api::{Claims, UserProfile};

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::users::profile_from_row;

/// The authenticated caller, loaded fresh from the database on every request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserProfile);

impl Deref for CurrentUser {
    type Target = UserProfile;

    fn deref(&self) -> &UserProfile {
        &self.0
    }
}

/// Validate the bearer token and resolve it to an existing user.
///
/// On success the caller is available to handlers as
/// `Extension<CurrentUser>`.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.map_err(|_| ApiError::Unauthorized("No token, authorization denied".into()))?;

    let claims = decode_token(&state.jwt.secret, bearer.token())?;

    let db = state.clone();
    let user_id = claims.sub.to_string();
    let row = run_blocking(move || Ok(db.db.get_user_by_id(&user_id)?)).await?;

    let Some(row) = row else {
        debug!("Token for deleted user {}", claims.sub);
        return Err(ApiError::Unauthorized("Token is not valid".into()));
    };

    req.extensions_mut().insert(CurrentUser(profile_from_row(row)?));
    Ok(next.run(req).await)
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::Unauthorized("Token is not valid".into())
    })
}
