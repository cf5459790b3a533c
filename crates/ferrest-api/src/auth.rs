//! # Caller Identity Middleware
//!
//! Resolves the optional `Authorization: Bearer <access token>` header into
//! a [`CallerIdentity`] stored in the request extensions:
//!
//! ```text
//! no header                 → CallerIdentity(None)     (anonymous)
//! Bearer <valid access>     → CallerIdentity(Some(identity))
//! anything else             → 401, handler never runs
//! ```
//!
//! Anonymous callers are not rejected here. Whether an operation admits
//! them is up to the resource's permission expression.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use ferrest_core::Identity;

use crate::error::AppError;
use crate::state::AppState;

/// The caller of the current request. `None` is anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub Option<Identity>);

impl CallerIdentity {
    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }
}

/// Extracts the identity that [`auth_middleware`] injected.
///
/// Fails with 500 if the middleware did not run: a route that reads the
/// caller must be mounted behind it.
impl<S: Send + Sync> FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Internal("no caller identity in request context".into()))
    }
}

pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let bearer = match request.headers().typed_get::<Authorization<Bearer>>() {
        Some(Authorization(bearer)) => Some(bearer.token().to_string()),
        None if request.headers().contains_key(header::AUTHORIZATION) => {
            tracing::warn!(reason = "non-bearer scheme", "authentication failed");
            return AppError::InvalidToken("authorization header must use the Bearer scheme".into())
                .into_response();
        }
        None => None,
    };

    match state.tokens.resolve_identity(bearer.as_deref()).await {
        Ok(identity) => {
            request.extensions_mut().insert(CallerIdentity(identity));
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(reason = %e, "authentication failed");
            AppError::from(e).into_response()
        }
    }
}
