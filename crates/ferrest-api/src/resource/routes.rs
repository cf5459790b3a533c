//! HTTP binding of a [`Resource`]. Each resource gets its own router with
//! the resource attached as an extension, so one set of handlers serves
//! every entity.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::MethodRouter;
use axum::{Extension, Json, Router};
use ferrest_core::OperationKind;
use serde_json::Value;

use super::{ListPage, ListParams, Resource};
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_query};
use crate::state::AppState;

/// Mount the enabled operations of `resource` at `/<name>` and
/// `/<name>/{id}`.
pub fn router(resource: Arc<Resource>) -> Router<AppState> {
    let mut collection: MethodRouter<AppState> = MethodRouter::new();
    let mut item: MethodRouter<AppState> = MethodRouter::new();
    let (mut has_collection, mut has_item) = (false, false);

    for op in resource.operations() {
        match op {
            OperationKind::Read => {
                collection = collection.get(list);
                has_collection = true;
            }
            OperationKind::Create => {
                collection = collection.put(create);
                has_collection = true;
            }
            OperationKind::Post => {
                collection = collection.post(post);
                has_collection = true;
            }
            OperationKind::Get => {
                item = item.get(get);
                has_item = true;
            }
            OperationKind::Update => {
                item = item.patch(update);
                has_item = true;
            }
            OperationKind::Delete => {
                item = item.delete(delete);
                has_item = true;
            }
        }
    }

    let mut router = Router::new();
    if has_collection {
        router = router.route(&format!("/{}", resource.name()), collection);
    }
    if has_item {
        router = router.route(&format!("/{}/{{id}}", resource.name()), item);
    }
    router.layer(Extension(resource))
}

async fn list(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    caller: CallerIdentity,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListPage>, AppError> {
    let params = extract_query(params)?;
    Ok(Json(resource.list(&state, caller.identity(), params).await?))
}

async fn get(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(resource.get(&state, caller.identity(), &id).await?))
}

async fn create(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    caller: CallerIdentity,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let body = extract_json(body)?;
    Ok(Json(resource.create(&state, caller.identity(), body).await?))
}

async fn update(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    caller: CallerIdentity,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let body = extract_json(body)?;
    Ok(Json(resource.update(&state, caller.identity(), &id, body).await?))
}

async fn delete(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    caller: CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(resource.delete(&state, caller.identity(), &id).await?))
}

async fn post(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    caller: CallerIdentity,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let body = extract_json(body)?;
    Ok(Json(resource.post(&state, caller.identity(), body).await?))
}
