//! `GET /me`: who the bearer token says the caller is.

use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::CallerIdentity;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// Either the string `"anonymous"` or the caller's profile.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Me {
    Anonymous(String),
    Identified(MeResponse),
}

/// The resolved caller.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "`\"anonymous\"` or the caller's id, username and email", body = Me),
        (status = 401, description = "Invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub(crate) async fn me(caller: CallerIdentity) -> Json<Me> {
    Json(match caller.identity() {
        None => Me::Anonymous("anonymous".to_string()),
        Some(identity) => Me::Identified(MeResponse {
            id: identity.id.get(),
            username: identity.handle.clone(),
            email: identity.email.clone(),
        }),
    })
}
