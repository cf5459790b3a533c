//! # Session Routes
//!
//! - `POST /auth/login`    — handle + password → access, refresh, role
//! - `POST /auth/sw-login` — form login for API explorers → bearer access token
//! - `POST /auth/refresh`  — refresh token → new access token
//! - `POST /auth/logout`   — revoke a refresh token

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{Form, State};
use axum::routing::post;
use axum::{Json, Router};
use ferrest_auth::LogoutOutcome;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zeroize::Zeroize;

use crate::error::AppError;
use crate::extractors::{extract_form, extract_json, extract_validated_json, require_present, Validate};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/sw-login", post(sw_login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

// ── Request / response types ────────────────────────────────────────────────

/// Credentials for `POST /auth/login`.
#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Login handle.
    pub username: String,
    /// Plaintext password.
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Drop for LoginRequest {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Only emptiness is checked. Any other mismatch is `InvalidCredentials`,
/// so accounts created before a length rule existed can still log in.
impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), AppError> {
        require_present("username", &self.username)?;
        require_present("password", &self.password)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    /// Name of the caller's first group, if any.
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SwLoginResponse {
    pub access_token: String,
    /// Always `bearer`.
    pub token_type: String,
}

/// Body of `POST /auth/refresh` and `POST /auth/logout`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessResponse {
    pub access: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub detail: String,
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// Log in with a handle and password.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody),
        (status = 422, description = "Empty username or password", body = crate::error::ErrorBody),
    ),
    security(()),
    tag = "auth"
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let tokens = state.tokens.login(&req.username, &req.password).await?;
    Ok(Json(LoginResponse {
        access: tokens.access,
        refresh: tokens.refresh,
        role: tokens.role,
    }))
}

/// Form login for interactive API explorers.
#[utoipa::path(
    post,
    path = "/auth/sw-login",
    request_body(content = LoginRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Access token issued", body = SwLoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody),
    ),
    security(()),
    tag = "auth"
)]
pub(crate) async fn sw_login(
    State(state): State<AppState>,
    form: Result<Form<LoginRequest>, FormRejection>,
) -> Result<Json<SwLoginResponse>, AppError> {
    let req = extract_form(form)?;
    req.validate()?;
    let access_token = state.tokens.sw_login(&req.username, &req.password).await?;
    Ok(Json(SwLoginResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// Redeem a refresh token for a new access token.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = AccessResponse),
        (status = 401, description = "Invalid, unknown or revoked refresh token", body = crate::error::ErrorBody),
    ),
    security(()),
    tag = "auth"
)]
pub(crate) async fn refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<AccessResponse>, AppError> {
    let req = extract_json(body)?;
    let access = state.tokens.refresh(&req.refresh).await?;
    Ok(Json(AccessResponse { access }))
}

/// Revoke a refresh token. Revoking an already revoked token succeeds.
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token revoked", body = LogoutResponse),
        (status = 401, description = "Invalid refresh token", body = crate::error::ErrorBody),
        (status = 404, description = "Token was never issued", body = crate::error::ErrorBody),
    ),
    security(()),
    tag = "auth"
)]
pub(crate) async fn logout(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<LogoutResponse>, AppError> {
    let req = extract_json(body)?;
    let detail = match state.tokens.logout(&req.refresh).await? {
        LogoutOutcome::Revoked => "Successfully logged out",
        LogoutOutcome::AlreadyRevoked => "Token already blacklisted",
    };
    Ok(Json(LogoutResponse {
        detail: detail.to_string(),
    }))
}
