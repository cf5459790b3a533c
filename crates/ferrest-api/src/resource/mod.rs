//! # Declarative Resources
//!
//! A [`Resource`] binds one catalog entity to a CRUD HTTP surface:
//!
//! | Method   | Path          | Operation               | Default schema      |
//! |----------|---------------|-------------------------|---------------------|
//! | `GET`    | `/<e>`        | [`OperationKind::Read`]   | `<E>Read`           |
//! | `GET`    | `/<e>/{id}`   | [`OperationKind::Get`]    | `<E>Get`            |
//! | `PUT`    | `/<e>`        | [`OperationKind::Create`] | `<E>CreateReq`      |
//! | `PATCH`  | `/<e>/{id}`   | [`OperationKind::Update`] | `<E>UpdateReq`      |
//! | `DELETE` | `/<e>/{id}`   | [`OperationKind::Delete`] | empty object        |
//! | `POST`   | `/<e>`        | [`OperationKind::Post`]   | operation-specific  |
//!
//! Create and update respond through the get schema. `POST` exists only
//! when the resource registers a [`CustomOperation`].
//!
//! Every operation runs the same pipeline (see [`dispatch`]): resolve the
//! caller, evaluate the permission expression against the base query and
//! the request parameters, then execute.

pub mod dispatch;
pub mod relations;
pub mod routes;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ferrest_core::{CatalogError, EntityDescription, Identity, OperationKind, Row};
use ferrest_policy::{AllowAll, Expr};
use ferrest_schema::{SchemaDeriver, SchemaError, SchemaIntent, SchemaRequest, ViewSchema};
use ferrest_store::{Filter, Query, TableRef, Transaction};
use serde_json::Value;
use thiserror::Error;

use crate::error::AppError;
use crate::state::AppState;

pub use dispatch::{ListPage, ListParams, DEFAULT_LIMIT, MAX_LIMIT};

/// Faults in a resource declaration. Raised at startup, never per request.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A search, ordering or default-ordering field is not a column.
    #[error("resource '{resource}' names unknown field '{field}'")]
    UnknownField { resource: String, field: String },
}

// ── Extension points ────────────────────────────────────────────────────────

/// Per-resource hooks around persistence.
#[async_trait]
pub trait ResourceHooks: Send + Sync {
    /// Transform a validated create payload before defaults are applied.
    async fn before_create(&self, _state: &AppState, _row: &mut Row) -> Result<(), AppError> {
        Ok(())
    }

    /// Transform a validated partial update before it is applied.
    async fn before_update(&self, _state: &AppState, _key: &Value, _changes: &mut Row) -> Result<(), AppError> {
        Ok(())
    }

    /// Runs inside the delete transaction, after the row is found and
    /// before it is removed.
    async fn before_delete(&self, _tx: &mut dyn Transaction, _key: &Value) -> Result<(), AppError> {
        Ok(())
    }
}

struct NoHooks;

impl ResourceHooks for NoHooks {}

/// A resource-specific operation mounted at `POST /<e>`.
#[async_trait]
pub trait CustomOperation: Send + Sync {
    /// One-line summary for the OpenAPI document.
    fn summary(&self) -> &str;

    /// JSON Schema of the request body.
    fn request_schema(&self) -> Value;

    async fn execute(&self, state: &AppState, caller: Option<&Identity>, body: Value) -> Result<Value, AppError>;
}

// ── Resource ────────────────────────────────────────────────────────────────

/// The derived schemas a resource serves.
#[derive(Debug, Clone)]
pub struct ResourceSchemas {
    pub list: Arc<ViewSchema>,
    pub get: Arc<ViewSchema>,
    pub create: Arc<ViewSchema>,
    pub update: Arc<ViewSchema>,
}

/// A mounted entity. Immutable once built.
pub struct Resource {
    name: String,
    entity: Arc<EntityDescription>,
    base: Query,
    policy: Expr,
    search_fields: Vec<String>,
    ordering_fields: Vec<String>,
    default_ordering: Option<String>,
    excluded: HashSet<OperationKind>,
    schemas: ResourceSchemas,
    hooks: Arc<dyn ResourceHooks>,
    post: Option<Arc<dyn CustomOperation>>,
    description: Option<String>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("entity", &self.entity.name)
            .field("policy", &self.policy)
            .field("operations", &self.operations())
            .finish()
    }
}

impl Resource {
    pub fn builder(name: impl Into<String>, entity: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder::new(name, entity)
    }

    /// Route segment, e.g. `user` for `/user`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &Arc<EntityDescription> {
        &self.entity
    }

    pub fn base_query(&self) -> &Query {
        &self.base
    }

    pub fn table(&self) -> TableRef {
        self.base.table.clone()
    }

    pub fn policy(&self) -> &Expr {
        &self.policy
    }

    pub fn search_fields(&self) -> &[String] {
        &self.search_fields
    }

    pub fn ordering_fields(&self) -> &[String] {
        &self.ordering_fields
    }

    pub fn default_ordering(&self) -> Option<&str> {
        self.default_ordering.as_deref()
    }

    pub fn schemas(&self) -> &ResourceSchemas {
        &self.schemas
    }

    pub fn custom_operation(&self) -> Option<&Arc<dyn CustomOperation>> {
        self.post.as_ref()
    }

    /// Whether the operation is routed.
    pub fn enabled(&self, op: OperationKind) -> bool {
        match op {
            OperationKind::Post => self.post.is_some(),
            other => !self.excluded.contains(&other),
        }
    }

    pub fn operations(&self) -> Vec<OperationKind> {
        OperationKind::ALL.into_iter().filter(|op| self.enabled(*op)).collect()
    }

    /// Markdown documenting the list operation's query parameters.
    pub fn list_description(&self) -> String {
        list_description(&self.search_fields, &self.ordering_fields, self.default_ordering())
    }

    /// Documentation tag text: the declared description, or the permission
    /// expression followed by the list description.
    pub fn tag_description(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        let mut text = format!("*`{}`*", self.policy);
        if self.enabled(OperationKind::Read) {
            text.push_str("\n\n");
            text.push_str(&self.list_description());
        }
        text
    }
}

/// Markdown listing ordering fields, search fields and the default ordering.
pub fn list_description(search: &[String], ordering: &[String], default_ordering: Option<&str>) -> String {
    let mut text = String::from("Valid ordering fields are:\n");
    for field in ordering {
        text.push_str(&format!("- `{field}`\n\n"));
    }
    text.push_str("\nSearching is done in fields:\n");
    for field in search {
        text.push_str(&format!("- `{field}`\n\n"));
    }
    if let Some(default) = default_ordering {
        text.push_str(&format!("\nDefault ordering field is: `{default}`"));
    }
    text
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Declares a [`Resource`]. Unset options take the defaults in the module
/// docs; the permission expression defaults to `AllowAll`.
pub struct ResourceBuilder {
    name: String,
    entity: String,
    filters: Vec<Filter>,
    policy: Expr,
    search_fields: Vec<String>,
    ordering_fields: Vec<String>,
    default_ordering: Option<String>,
    excluded: HashSet<OperationKind>,
    list: Option<SchemaRequest>,
    get: Option<SchemaRequest>,
    create: Option<SchemaRequest>,
    update: Option<SchemaRequest>,
    hooks: Option<Arc<dyn ResourceHooks>>,
    post: Option<Arc<dyn CustomOperation>>,
    description: Option<String>,
}

impl ResourceBuilder {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            filters: Vec::new(),
            policy: Expr::leaf::<AllowAll>(),
            search_fields: Vec::new(),
            ordering_fields: Vec::new(),
            default_ordering: None,
            excluded: HashSet::new(),
            list: None,
            get: None,
            create: None,
            update: None,
            hooks: None,
            post: None,
            description: None,
        }
    }

    /// Narrow the base query. Rows outside it are invisible to every
    /// operation.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn protect_by(mut self, policy: Expr) -> Self {
        self.policy = policy;
        self
    }

    pub fn search<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn ordering<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_ordering(mut self, field: impl Into<String>) -> Self {
        self.default_ordering = Some(field.into());
        self
    }

    /// Remove operations from the surface. `Post` is controlled by
    /// [`post`](Self::post) instead.
    pub fn exclude(mut self, ops: impl IntoIterator<Item = OperationKind>) -> Self {
        self.excluded.extend(ops);
        self
    }

    pub fn list_schema(mut self, request: SchemaRequest) -> Self {
        self.list = Some(request);
        self
    }

    pub fn get_schema(mut self, request: SchemaRequest) -> Self {
        self.get = Some(request);
        self
    }

    pub fn create_schema(mut self, request: SchemaRequest) -> Self {
        self.create = Some(request);
        self
    }

    pub fn update_schema(mut self, request: SchemaRequest) -> Self {
        self.update = Some(request);
        self
    }

    pub fn hooks(mut self, hooks: impl ResourceHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn post(mut self, operation: impl CustomOperation + 'static) -> Self {
        self.post = Some(Arc::new(operation));
        self
    }

    /// Replace the generated documentation tag text.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Resolve the entity, check field names and derive every schema.
    pub fn build(self, deriver: &SchemaDeriver) -> Result<Resource, ResourceError> {
        let entity = deriver.catalog().get(&self.entity)?;

        let named = self
            .search_fields
            .iter()
            .chain(&self.ordering_fields)
            .chain(self.default_ordering.iter());
        for field in named {
            if !entity.has_column(field) {
                return Err(ResourceError::UnknownField {
                    resource: self.name.clone(),
                    field: field.clone(),
                });
            }
        }

        let e = entity.name.as_str();
        let request = |custom: Option<SchemaRequest>, suffix: &str, intent: SchemaIntent| {
            custom.unwrap_or_else(|| SchemaRequest::new(e, format!("{e}{suffix}"), intent))
        };
        let schemas = ResourceSchemas {
            list: deriver.derive(&request(self.list, "Read", SchemaIntent::Read))?,
            get: deriver.derive(&request(self.get, "Get", SchemaIntent::Read))?,
            create: deriver.derive(&request(self.create, "CreateReq", SchemaIntent::Create))?,
            update: deriver.derive(&request(self.update, "UpdateReq", SchemaIntent::Update))?,
        };

        let mut base = Query::table(TableRef::of(&entity));
        for filter in self.filters {
            base = base.filter(filter);
        }

        tracing::debug!(resource = %self.name, entity = %entity.name, policy = %self.policy, "resource built");
        Ok(Resource {
            name: self.name,
            entity,
            base,
            policy: self.policy,
            search_fields: self.search_fields,
            ordering_fields: self.ordering_fields,
            default_ordering: self.default_ordering,
            excluded: self.excluded,
            schemas,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoHooks)),
            post: self.post,
            description: self.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrest_auth::accounts;
    use ferrest_core::Catalog;
    use ferrest_policy::IsAuthenticated;

    fn deriver() -> SchemaDeriver {
        let mut catalog = Catalog::new();
        accounts::register(&mut catalog).unwrap();
        SchemaDeriver::new(Arc::new(catalog))
    }

    #[test]
    fn defaults_name_schemas_after_the_entity() {
        let resource = Resource::builder("group", "Group").build(&deriver()).unwrap();
        let schemas = resource.schemas();
        assert_eq!(schemas.list.name(), "GroupRead");
        assert_eq!(schemas.get.name(), "GroupGet");
        assert_eq!(schemas.create.name(), "GroupCreateReq");
        assert_eq!(schemas.update.name(), "GroupUpdateReq");
        assert!(schemas.create.field("id").is_none());
        assert_eq!(resource.table().name, "auth_group");
        assert_eq!(resource.policy().to_string(), "AllowAll");
    }

    #[test]
    fn excluded_operations_are_not_enabled() {
        let resource = Resource::builder("group", "Group")
            .exclude([OperationKind::Create, OperationKind::Update, OperationKind::Delete])
            .build(&deriver())
            .unwrap();
        assert_eq!(resource.operations(), vec![OperationKind::Read, OperationKind::Get]);
        assert!(!resource.enabled(OperationKind::Post));
    }

    #[test]
    fn unknown_fields_fail_the_build() {
        let err = Resource::builder("user", "User")
            .ordering(["username", "nickname"])
            .build(&deriver())
            .unwrap_err();
        assert!(matches!(err, ResourceError::UnknownField { field, .. } if field == "nickname"));

        let err = Resource::builder("thing", "Thing").build(&deriver()).unwrap_err();
        assert!(matches!(err, ResourceError::Catalog(CatalogError::UnknownEntity(_))));
    }

    #[test]
    fn list_description_lists_every_field() {
        let text = list_description(
            &["first_name".into(), "username".into()],
            &["username".into()],
            Some("date_joined"),
        );
        assert_eq!(
            text,
            "Valid ordering fields are:\n- `username`\n\n\nSearching is done in fields:\n- `first_name`\n\n- `username`\n\n\nDefault ordering field is: `date_joined`"
        );
    }

    #[test]
    fn tag_description_shows_the_policy() {
        let resource = Resource::builder("user", "User")
            .protect_by(Expr::leaf::<IsAuthenticated>() & Expr::leaf::<AllowAll>())
            .ordering(["username"])
            .build(&deriver())
            .unwrap();
        let text = resource.tag_description();
        assert!(text.starts_with("*`(IsAuthenticated & AllowAll)`*"));
        assert!(text.contains("- `username`"));

        let custom = Resource::builder("group", "Group")
            .description("Groups.")
            .build(&deriver())
            .unwrap();
        assert_eq!(custom.tag_description(), "Groups.");
    }
}
