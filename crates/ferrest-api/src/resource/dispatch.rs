//! # Operation Pipeline
//!
//! ```text
//! Unauthenticated ──▶ IdentityResolved ──▶ Authorized ──▶ Executing ──▶ Serialized
//!   (middleware)        (CallerIdentity)    (policy)       (one tx)      (view schema)
//! ```
//!
//! Authorization always precedes execution: a denied request never touches
//! the payload or the store beyond what its predicates read. Mutations run
//! fetch, validate, mutate and commit inside one transaction; any early
//! return drops the transaction and rolls it back.

use ferrest_core::{ColumnType, Identity, OperationKind};
use ferrest_policy::PermissionContext;
use ferrest_store::{Isolation, Ordering};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};

use super::relations::shape;
use super::Resource;
use crate::error::AppError;
use crate::state::AppState;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Query parameters of a list operation.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Rows to skip. Must be non-negative.
    pub offset: Option<i64>,
    /// Page size, at most 100.
    pub limit: Option<i64>,
    /// Case-insensitive substring matched against the search fields.
    pub search: Option<String>,
    /// An ordering field, `-` prefixed for descending.
    pub ordering: Option<String>,
}

/// One page of a list operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListPage {
    /// Rows matching the filters, before pagination.
    pub count: u64,
    pub result: Vec<Value>,
}

impl Resource {
    /// Evaluate the permission expression for one operation.
    pub async fn authorize(
        &self,
        state: &AppState,
        caller: Option<&Identity>,
        operation: OperationKind,
        params: &Value,
    ) -> Result<(), AppError> {
        let ctx = PermissionContext {
            identity: caller,
            operation,
            target: self.base_query(),
            params,
            storage: state.storage.as_ref(),
        };
        let verdict = self.policy().evaluate(&ctx).await;
        if verdict.allowed {
            return Ok(());
        }
        tracing::info!(
            resource = %self.name(),
            operation = %operation,
            policy = %self.policy(),
            user_id = ?caller.map(|i| i.id),
            "permission denied"
        );
        Err(AppError::Forbidden(verdict.messages.into_iter().collect()))
    }

    /// Interpret a path segment as a primary key value.
    pub fn parse_key(&self, raw: &str) -> Result<Value, AppError> {
        let entity = self.entity();
        let integer = entity
            .find_column(&entity.primary_key)
            .is_some_and(|c| matches!(c.ty, ColumnType::Integer | ColumnType::BigInteger));
        if !integer {
            return Ok(json!(raw));
        }
        raw.parse::<i64>()
            .map(|k| json!(k))
            .map_err(|_| AppError::invalid_field("id", "must be an integer"))
    }

    // ── Read ────────────────────────────────────────────────────────────

    /// `GET /<e>`: count and page from one snapshot.
    pub async fn list(&self, state: &AppState, caller: Option<&Identity>, params: ListParams) -> Result<ListPage, AppError> {
        let described = json!({
            "offset": params.offset,
            "limit": params.limit,
            "search": params.search,
            "ordering": params.ordering,
        });
        self.authorize(state, caller, OperationKind::Read, &described).await?;

        let offset = params.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::invalid_field("offset", "must be greater than or equal to 0"));
        }
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        if limit < 0 {
            return Err(AppError::invalid_field("limit", "must be greater than or equal to 0"));
        }
        if limit > MAX_LIMIT {
            return Err(AppError::invalid_field(
                "limit",
                format!("must be less than or equal to {MAX_LIMIT}"),
            ));
        }

        let ordering = match params.ordering.as_deref().filter(|s| !s.is_empty()) {
            Some(spec) => {
                let ordering = Ordering::parse(spec);
                if !self.ordering_fields().contains(&ordering.column) {
                    return Err(AppError::UnsupportedOrdering(spec.to_string()));
                }
                Some(ordering)
            }
            None => self.default_ordering().map(Ordering::asc),
        };

        let mut query = self.base_query().clone();
        if let Some(term) = params.search.as_deref() {
            query = query.search(self.search_fields(), term);
        }
        if let Some(ordering) = ordering {
            query = query.order_by(ordering);
        }

        let mut tx = state.storage.begin(Isolation::Snapshot).await?;
        let count = tx.count(&query).await?;
        let rows = tx.fetch(&query.offset(offset as u64).limit(limit as u64)).await?;

        let schema = &self.schemas().list;
        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            result.push(shape(tx.as_mut(), state.catalog(), schema, row).await?);
        }
        Ok(ListPage { count, result })
    }

    /// `GET /<e>/{id}`.
    pub async fn get(&self, state: &AppState, caller: Option<&Identity>, raw_key: &str) -> Result<Value, AppError> {
        let key = self.parse_key(raw_key)?;
        self.authorize(state, caller, OperationKind::Get, &json!({ "id": key })).await?;

        let mut tx = state.storage.begin(Isolation::ReadCommitted).await?;
        let row = tx
            .fetch_one(&self.base_query().clone().by_key(key))
            .await?
            .ok_or_else(AppError::item_not_found)?;
        shape(tx.as_mut(), state.catalog(), &self.schemas().get, &row).await
    }

    // ── Write ───────────────────────────────────────────────────────────

    /// `PUT /<e>`: validate, apply defaults, insert.
    pub async fn create(&self, state: &AppState, caller: Option<&Identity>, body: Value) -> Result<Value, AppError> {
        self.authorize(state, caller, OperationKind::Create, &json!({ "body": body }))
            .await?;

        let schemas = self.schemas();
        let mut row = schemas.create.validate(&body)?;
        self.hooks.before_create(state, &mut row).await?;
        self.entity().apply_defaults(&mut row);
        schemas.create.fill_absent(&mut row);

        let mut tx = state.storage.begin(Isolation::ReadCommitted).await?;
        let stored = tx.insert(&self.table(), row).await?;
        let out = shape(tx.as_mut(), state.catalog(), &schemas.get, &stored).await?;
        tx.commit().await?;

        tracing::info!(
            resource = %self.name(),
            key = %(stored.get(&self.entity().primary_key).cloned().unwrap_or_default()),
            "record created"
        );
        Ok(out)
    }

    /// `PATCH /<e>/{id}`: only the fields present in the payload change.
    pub async fn update(
        &self,
        state: &AppState,
        caller: Option<&Identity>,
        raw_key: &str,
        body: Value,
    ) -> Result<Value, AppError> {
        let key = self.parse_key(raw_key)?;
        self.authorize(state, caller, OperationKind::Update, &json!({ "id": key, "body": body }))
            .await?;

        let schemas = self.schemas();
        let mut changes = schemas.update.validate(&body)?;
        self.hooks.before_update(state, &key, &mut changes).await?;

        let mut tx = state.storage.begin(Isolation::ReadCommitted).await?;
        let current = tx
            .fetch_one(&self.base_query().clone().by_key(key.clone()))
            .await?
            .ok_or_else(AppError::item_not_found)?;
        let stored = if changes.is_empty() {
            current
        } else {
            tx.update(&self.table(), &key, changes).await?
        };
        let out = shape(tx.as_mut(), state.catalog(), &schemas.get, &stored).await?;
        tx.commit().await?;

        tracing::info!(resource = %self.name(), key = %key, "record updated");
        Ok(out)
    }

    /// `DELETE /<e>/{id}`.
    pub async fn delete(&self, state: &AppState, caller: Option<&Identity>, raw_key: &str) -> Result<Value, AppError> {
        let key = self.parse_key(raw_key)?;
        self.authorize(state, caller, OperationKind::Delete, &json!({ "id": key }))
            .await?;

        let mut tx = state.storage.begin(Isolation::ReadCommitted).await?;
        tx.fetch_one(&self.base_query().clone().by_key(key.clone()))
            .await?
            .ok_or_else(AppError::item_not_found)?;
        self.hooks.before_delete(tx.as_mut(), &key).await?;
        tx.delete(&self.table(), &key).await?;
        tx.commit().await?;

        tracing::info!(resource = %self.name(), key = %key, "record deleted");
        Ok(json!({}))
    }

    /// `POST /<e>`: the resource's custom operation.
    pub async fn post(&self, state: &AppState, caller: Option<&Identity>, body: Value) -> Result<Value, AppError> {
        let Some(operation) = self.custom_operation() else {
            return Err(AppError::NotFound(format!("no custom operation on '{}'", self.name())));
        };
        self.authorize(state, caller, OperationKind::Post, &json!({ "body": body }))
            .await?;
        operation.execute(state, caller, body).await
    }
}
