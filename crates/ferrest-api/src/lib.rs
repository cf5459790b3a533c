//! # ferrest-api — Axum HTTP Surface
//!
//! Mounts declarative resources, the session endpoints and the generated
//! OpenAPI document.
//!
//! ## API Surface
//!
//! | Path                 | Module                  | Caller resolved |
//! |----------------------|-------------------------|-----------------|
//! | `/auth/*`            | [`routes::auth`]        | no              |
//! | `/me`                | [`routes::me`]          | yes             |
//! | `/<resource>[/{id}]` | [`resource::routes`]    | yes             |
//! | `/openapi.json`      | [`openapi`]             | no              |
//! | `/health/*`          | this module             | no              |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → auth_middleware (caller resolution) → Handler
//! ```
//!
//! The middleware never rejects anonymous callers; each resource's
//! permission expression decides what they may do.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod extractors;
pub mod openapi;
pub mod resource;
pub mod routes;
pub mod state;
pub mod views;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router.
///
/// Health probes, the session endpoints and the OpenAPI document are
/// mounted outside the caller-identity middleware.
pub fn app(state: AppState) -> Router {
    let mut resolved = Router::new().merge(routes::me::router());
    for resource in state.resources.iter() {
        resolved = resolved.merge(resource::routes::router(resource.clone()));
    }
    let resolved = resolved.layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    let open = Router::new()
        .merge(routes::auth::router())
        .merge(openapi::router())
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness));

    Router::new()
        .merge(open)
        .merge(resolved)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 when the store answers, 503 otherwise.
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.storage.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, backend = state.storage.backend(), "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}
