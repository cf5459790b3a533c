//! # OpenAPI Specification Assembly
//!
//! The fixed endpoints are documented with utoipa derives. Resource
//! endpoints exist only at runtime, so their paths, tags and derived JSON
//! Schemas are merged into the serialized document when it is served at
//! `/openapi.json`. Nested `$defs` become shared components, one per
//! nested schema name.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use ferrest_core::OperationKind;
use ferrest_schema::ViewSchema;
use serde_json::{json, Map, Value};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{IntoParams, Modify, OpenApi};

use crate::error::AppError;
use crate::resource::{ListParams, Resource};
use crate::state::AppState;

/// Adds the bearer JWT security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Access token from `POST /auth/login`."))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ferrest",
        description = "Declarative CRUD resources over a relational store.\n\nEach resource is protected by a permission expression, shown in its tag description. Authenticate with `Authorization: Bearer <access token>`; requests without the header run as the anonymous caller.",
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        (),
        ("bearer_auth" = [])
    ),
    paths(
        crate::routes::auth::login,
        crate::routes::auth::sw_login,
        crate::routes::auth::refresh,
        crate::routes::auth::logout,
        crate::routes::me::me,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::resource::ListPage,
            crate::routes::auth::LoginRequest,
            crate::routes::auth::LoginResponse,
            crate::routes::auth::SwLoginResponse,
            crate::routes::auth::RefreshRequest,
            crate::routes::auth::AccessResponse,
            crate::routes::auth::LogoutResponse,
            crate::routes::me::Me,
            crate::routes::me::MeResponse,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login, token refresh and logout"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(document(&state.resources)?))
}

/// The complete document: static endpoints plus every mounted resource.
pub fn document(resources: &[std::sync::Arc<Resource>]) -> Result<Value, AppError> {
    let serialized = serde_json::to_value(ApiDoc::openapi()).and_then(|doc| {
        serde_json::to_value(ListParams::into_params(|| None)).map(|params| (doc, params))
    });
    let (Value::Object(mut doc), list_params) =
        serialized.map_err(|e| AppError::Internal(format!("openapi serialization failed: {e}")))?
    else {
        return Err(AppError::Internal("openapi document is not an object".into()));
    };

    for resource in resources {
        for schema in resource_schemas(resource) {
            add_schema(&mut doc, schema);
        }
        let (collection, item) = resource_paths(resource, &list_params);
        if let Some(paths) = object_at(&mut doc, "paths") {
            if !collection.is_empty() {
                paths.insert(format!("/{}", resource.name()), Value::Object(collection));
            }
            if !item.is_empty() {
                paths.insert(format!("/{}/{{id}}", resource.name()), Value::Object(item));
            }
        }
        if let Some(tags) = doc.get_mut("tags").and_then(Value::as_array_mut) {
            tags.push(json!({
                "name": resource.name(),
                "description": resource.tag_description(),
            }));
        }
    }
    Ok(Value::Object(doc))
}

fn resource_schemas(resource: &Resource) -> [&ViewSchema; 4] {
    let s = resource.schemas();
    [s.list.as_ref(), s.get.as_ref(), s.create.as_ref(), s.update.as_ref()]
}

// ── Schemas ─────────────────────────────────────────────────────────────────

fn object_at<'a>(root: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    root.entry(key).or_insert_with(|| json!({})).as_object_mut()
}

/// Register a view schema and its nested definitions as components.
fn add_schema(doc: &mut Map<String, Value>, schema: &ViewSchema) {
    let mut rendered = schema.json_schema().clone();
    rewrite_refs(&mut rendered);
    let Value::Object(mut root) = rendered else {
        return;
    };
    root.remove("$schema");
    let defs = root.remove("$defs");

    let Some(schemas) = object_at(doc, "components").and_then(|c| object_at(c, "schemas")) else {
        return;
    };
    if let Some(Value::Object(defs)) = defs {
        for (name, def) in defs {
            schemas.entry(name).or_insert(def);
        }
    }
    schemas.insert(schema.name().to_string(), Value::Object(root));
}

/// Point `$defs` references at `#/components/schemas`.
fn rewrite_refs(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                match child {
                    Value::String(target) if key == "$ref" => {
                        if let Some(name) = target.strip_prefix("#/$defs/") {
                            *target = format!("#/components/schemas/{name}");
                        }
                    }
                    other => rewrite_refs(other),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}

fn schema_ref(schema: &ViewSchema) -> Value {
    json!({ "$ref": format!("#/components/schemas/{}", schema.name()) })
}

// ── Paths ───────────────────────────────────────────────────────────────────

fn error_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorBody" }
            }
        }
    })
}

fn json_response(description: &str, schema: Value) -> Value {
    json!({
        "description": description,
        "content": { "application/json": { "schema": schema } }
    })
}

fn json_body(schema: Value) -> Value {
    json!({
        "required": true,
        "content": { "application/json": { "schema": schema } }
    })
}

/// A 200 response plus the error responses every operation shares.
fn responses(ok: Value, extra: &[(&str, &str)]) -> Value {
    let mut map = Map::new();
    map.insert("200".into(), ok);
    let shared = [("401", "Invalid bearer token"), ("403", "Permission denied")];
    for (status, description) in shared.iter().chain(extra) {
        map.insert((*status).to_string(), error_response(description));
    }
    Value::Object(map)
}

fn operation(resource: &Resource, kind: OperationKind, summary: String) -> Map<String, Value> {
    let mut op = Map::new();
    op.insert("tags".into(), json!([resource.name()]));
    op.insert("summary".into(), json!(summary));
    op.insert("operationId".into(), json!(format!("{}_{}", resource.name(), kind)));
    op
}

/// Path items for `/<name>` and `/<name>/{id}`.
fn resource_paths(resource: &Resource, list_params: &Value) -> (Map<String, Value>, Map<String, Value>) {
    let schemas = resource.schemas();
    let entity = &resource.entity().name;
    let mut collection = Map::new();
    let mut item = Map::new();

    let id_param = json!([{
        "name": "id",
        "in": "path",
        "required": true,
        "description": format!("Primary key of the {entity}"),
        "schema": { "type": "string" }
    }]);
    for kind in resource.operations() {
        match kind {
            OperationKind::Read => {
                let mut op = operation(resource, kind, format!("List {entity} records"));
                op.insert("description".into(), json!(resource.list_description()));
                op.insert("parameters".into(), list_params.clone());
                let page = json!({
                    "type": "object",
                    "properties": {
                        "count": { "type": "integer", "minimum": 0 },
                        "result": { "type": "array", "items": schema_ref(&schemas.list) }
                    },
                    "required": ["count", "result"]
                });
                op.insert(
                    "responses".into(),
                    responses(
                        json_response("One page of records", page),
                        &[("400", "Unsupported ordering"), ("422", "Invalid pagination")],
                    ),
                );
                collection.insert("get".into(), Value::Object(op));
            }
            OperationKind::Create => {
                let mut op = operation(resource, kind, format!("Create a {entity}"));
                op.insert("requestBody".into(), json_body(schema_ref(&schemas.create)));
                op.insert(
                    "responses".into(),
                    responses(
                        json_response("The created record", schema_ref(&schemas.get)),
                        &[("409", "Unique constraint violated"), ("422", "Invalid payload")],
                    ),
                );
                collection.insert("put".into(), Value::Object(op));
            }
            OperationKind::Post => {
                let Some(custom) = resource.custom_operation() else {
                    continue;
                };
                let mut op = operation(resource, kind, custom.summary().to_string());
                op.insert("requestBody".into(), json_body(custom.request_schema()));
                op.insert(
                    "responses".into(),
                    responses(
                        json_response("Operation result", json!({ "type": "object" })),
                        &[("422", "Invalid payload")],
                    ),
                );
                collection.insert("post".into(), Value::Object(op));
            }
            OperationKind::Get => {
                let mut op = operation(resource, kind, format!("Get a {entity}"));
                op.insert(
                    "responses".into(),
                    responses(
                        json_response("The record", schema_ref(&schemas.get)),
                        &[("404", "Item not found")],
                    ),
                );
                item.insert("get".into(), Value::Object(op));
            }
            OperationKind::Update => {
                let mut op = operation(resource, kind, format!("Update a {entity}"));
                op.insert("requestBody".into(), json_body(schema_ref(&schemas.update)));
                op.insert(
                    "responses".into(),
                    responses(
                        json_response("The updated record", schema_ref(&schemas.get)),
                        &[("404", "Item not found"), ("422", "Invalid payload")],
                    ),
                );
                item.insert("patch".into(), Value::Object(op));
            }
            OperationKind::Delete => {
                let mut op = operation(resource, kind, format!("Delete a {entity}"));
                op.insert(
                    "responses".into(),
                    responses(
                        json_response("Deleted", json!({ "type": "object" })),
                        &[("404", "Item not found")],
                    ),
                );
                item.insert("delete".into(), Value::Object(op));
            }
        }
    }
    if !item.is_empty() {
        item.insert("parameters".into(), id_param);
    }
    (collection, item)
}
