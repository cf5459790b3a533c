//! # Schema Derivation
//!
//! Turns an [`EntityDescription`](ferrest_core::EntityDescription) plus a
//! [`SchemaRequest`] into a [`ViewSchema`].
//!
//! Field rules by intent:
//!
//! | Intent               | Primary key | Required when                      | Nullable when   |
//! |----------------------|-------------|------------------------------------|-----------------|
//! | `Read`               | included    | column is not nullable             | column nullable |
//! | `ReadWithRelations`  | included    | column is not nullable             | column nullable |
//! | `Create`             | excluded    | not nullable and has no default    | column nullable |
//! | `Update`             | excluded    | never                              | column nullable |
//!
//! Write-only columns never appear in response schemas.
//!
//! Relationships are embedded only for `ReadWithRelations` with a depth
//! above zero. Each target gets one nested schema named `<Target>NestedOut`
//! per derivation; a second reference to the same target reuses it, and a
//! reference back into a schema still being built is dropped, so mutually
//! referencing entities terminate at any depth.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use ferrest_core::Catalog;
use parking_lot::RwLock;

use crate::error::SchemaError;
use crate::view::{FieldKind, FieldSchema, Primitive, SchemaIntent, ViewSchema};

/// Everything that determines a derived schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaRequest {
    pub entity: String,
    pub name: String,
    pub intent: SchemaIntent,
    /// When set, only these fields are considered.
    pub include: Option<BTreeSet<String>>,
    /// Removed after `include` is applied.
    pub exclude: BTreeSet<String>,
    pub depth: u32,
}

impl SchemaRequest {
    pub fn new(entity: impl Into<String>, name: impl Into<String>, intent: SchemaIntent) -> Self {
        Self {
            entity: entity.into(),
            name: name.into(),
            intent,
            include: None,
            exclude: BTreeSet::new(),
            depth: 1,
        }
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Whether a field survives the include/exclude selection.
    pub fn selects(&self, field: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |inc| inc.contains(field));
        included && !self.exclude.contains(field)
    }
}

/// Derive a schema without caching.
pub fn derive(catalog: &Catalog, request: &SchemaRequest) -> Result<Arc<ViewSchema>, SchemaError> {
    Derivation::new(catalog).derive(request)
}

struct Derivation<'a> {
    catalog: &'a Catalog,
    nested: HashMap<String, Arc<ViewSchema>>,
    in_progress: HashSet<String>,
}

impl<'a> Derivation<'a> {
    fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            nested: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    fn derive(&mut self, request: &SchemaRequest) -> Result<Arc<ViewSchema>, SchemaError> {
        let entity = self.catalog.get(&request.entity)?;
        let mut fields = Vec::new();

        for column in &entity.columns {
            if !request.selects(&column.name) {
                continue;
            }
            let writes = matches!(request.intent, SchemaIntent::Create | SchemaIntent::Update);
            if writes && column.name == entity.primary_key {
                continue;
            }
            if !writes && column.write_only {
                continue;
            }

            let primitive =
                Primitive::from_column_type(&column.ty).ok_or_else(|| SchemaError::UnsupportedFieldType {
                    entity: entity.name.clone(),
                    column: column.name.clone(),
                    ty: column.ty.name().to_string(),
                })?;

            let required = match request.intent {
                SchemaIntent::Read | SchemaIntent::ReadWithRelations => !column.nullable,
                SchemaIntent::Create => !column.nullable && column.default.is_none(),
                SchemaIntent::Update => false,
            };

            fields.push(FieldSchema {
                name: column.name.clone(),
                kind: FieldKind::Scalar(primitive),
                required,
                nullable: column.nullable,
            });
        }

        if request.intent == SchemaIntent::ReadWithRelations && request.depth > 0 {
            for rel in &entity.relationships {
                if !request.selects(&rel.name) {
                    continue;
                }
                let Some(schema) = self.nested(&rel.target, request.depth - 1)? else {
                    continue;
                };
                let many = rel.is_many();
                fields.push(FieldSchema {
                    name: rel.name.clone(),
                    kind: FieldKind::Nested {
                        schema,
                        relationship: rel.name.clone(),
                        many,
                    },
                    required: true,
                    nullable: !many,
                });
            }
        }

        let schema = ViewSchema::build(request.name.clone(), entity.name.clone(), request.intent, fields)?;
        Ok(Arc::new(schema))
    }

    fn nested(&mut self, target: &str, depth: u32) -> Result<Option<Arc<ViewSchema>>, SchemaError> {
        let name = format!("{target}NestedOut");
        if let Some(hit) = self.nested.get(&name) {
            return Ok(Some(Arc::clone(hit)));
        }
        if !self.in_progress.insert(name.clone()) {
            return Ok(None);
        }

        let intent = if depth > 0 {
            SchemaIntent::ReadWithRelations
        } else {
            SchemaIntent::Read
        };
        let request = SchemaRequest::new(target, name.clone(), intent).depth(depth);
        let result = self.derive(&request);
        self.in_progress.remove(&name);

        let schema = result?;
        self.nested.insert(name, Arc::clone(&schema));
        Ok(Some(schema))
    }
}

/// Process-wide derivation cache over a fixed catalog.
///
/// Concurrent misses for the same request may both derive; the first to
/// store its result wins and every caller gets that instance.
#[derive(Debug)]
pub struct SchemaDeriver {
    catalog: Arc<Catalog>,
    cache: RwLock<HashMap<SchemaRequest, Arc<ViewSchema>>>,
}

impl SchemaDeriver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn derive(&self, request: &SchemaRequest) -> Result<Arc<ViewSchema>, SchemaError> {
        if let Some(hit) = self.cache.read().get(request) {
            return Ok(Arc::clone(hit));
        }
        let schema = derive(&self.catalog, request)?;
        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(request.clone()).or_insert(schema)))
    }

    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrest_core::{Column, ColumnType, EntityDescription, Join, Relationship};
    use serde_json::json;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .register(
                EntityDescription::new("Author", "library_author")
                    .column(Column::new("id", ColumnType::Integer))
                    .column(Column::new("name", ColumnType::string(100)))
                    .column(Column::new("bio", ColumnType::Text).nullable())
                    .column(Column::new("active", ColumnType::Boolean).default_value(json!(true)))
                    .column(Column::new("joined", ColumnType::DateTime).default_now())
                    .relationship(Relationship::new(
                        "books",
                        "Book",
                        Join::Reverse {
                            column: "author_id".into(),
                        },
                    )),
            )
            .unwrap();
        catalog
            .register(
                EntityDescription::new("Book", "library_book")
                    .column(Column::new("id", ColumnType::Integer))
                    .column(Column::new("title", ColumnType::string(200)))
                    .column(Column::new("author_id", ColumnType::Integer))
                    .column(Column::new("editor_id", ColumnType::Integer).nullable())
                    .column(Column::new("license_key", ColumnType::string(64)).write_only())
                    .relationship(Relationship::new(
                        "author",
                        "Author",
                        Join::ForeignKey {
                            column: "author_id".into(),
                        },
                    ))
                    .relationship(Relationship::new(
                        "editor",
                        "Author",
                        Join::ForeignKey {
                            column: "editor_id".into(),
                        },
                    )),
            )
            .unwrap();
        catalog
    }

    fn field<'a>(schema: &'a ViewSchema, name: &str) -> &'a FieldSchema {
        schema.field(name).unwrap_or_else(|| panic!("missing field {name}"))
    }

    #[test]
    fn read_marks_nullable_columns_optional() {
        let schema = derive(&catalog(), &SchemaRequest::new("Author", "AuthorOut", SchemaIntent::Read)).unwrap();
        assert_eq!(
            schema.field_names().collect::<Vec<_>>(),
            vec!["id", "name", "bio", "active", "joined"]
        );
        assert!(field(&schema, "id").required);
        assert!(!field(&schema, "bio").required);
        assert!(field(&schema, "bio").nullable);
        assert!(!schema.has_relations());
    }

    #[test]
    fn create_drops_primary_key_and_relaxes_defaulted_columns() {
        let schema = derive(&catalog(), &SchemaRequest::new("Author", "AuthorIn", SchemaIntent::Create)).unwrap();
        assert!(schema.field("id").is_none());
        assert!(field(&schema, "name").required);
        assert!(!field(&schema, "active").required);
        assert!(!field(&schema, "joined").required);
    }

    #[test]
    fn update_makes_every_field_optional() {
        let schema = derive(&catalog(), &SchemaRequest::new("Author", "AuthorPatch", SchemaIntent::Update)).unwrap();
        assert!(schema.field("id").is_none());
        assert!(schema.fields().iter().all(|f| !f.required));
        assert!(schema.validate(&json!({})).is_ok());
    }

    #[test]
    fn write_only_columns_are_request_side_only() {
        let cat = catalog();
        let read = derive(&cat, &SchemaRequest::new("Book", "BookOut", SchemaIntent::Read)).unwrap();
        assert!(read.field("license_key").is_none());
        let create = derive(&cat, &SchemaRequest::new("Book", "BookIn", SchemaIntent::Create)).unwrap();
        assert!(field(&create, "license_key").required);
    }

    #[test]
    fn include_then_exclude() {
        let request = SchemaRequest::new("Author", "AuthorSlim", SchemaIntent::Read)
            .include(["id", "name", "bio"])
            .exclude(["bio"]);
        let schema = derive(&catalog(), &request).unwrap();
        assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[test]
    fn unsupported_column_type_is_reported() {
        let mut catalog = Catalog::new();
        catalog
            .register(
                EntityDescription::new("Blob", "blob")
                    .column(Column::new("id", ColumnType::Integer))
                    .column(Column::new("data", ColumnType::Binary)),
            )
            .unwrap();
        let err = derive(&catalog, &SchemaRequest::new("Blob", "BlobOut", SchemaIntent::Read)).unwrap_err();
        match err {
            SchemaError::UnsupportedFieldType { entity, column, .. } => {
                assert_eq!(entity, "Blob");
                assert_eq!(column, "data");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_entity_is_a_catalog_error() {
        let err = derive(&catalog(), &SchemaRequest::new("Ghost", "GhostOut", SchemaIntent::Read)).unwrap_err();
        assert!(matches!(err, SchemaError::Catalog(_)));
    }

    #[test]
    fn nested_schema_is_shared_between_relationships_to_same_target() {
        let request = SchemaRequest::new("Book", "BookOut", SchemaIntent::ReadWithRelations);
        let schema = derive(&catalog(), &request).unwrap();

        let nested = |name: &str| match &field(&schema, name).kind {
            FieldKind::Nested { schema, many, .. } => (Arc::clone(schema), *many),
            FieldKind::Scalar(_) => panic!("{name} should be nested"),
        };
        let (author, author_many) = nested("author");
        let (editor, _) = nested("editor");
        assert!(Arc::ptr_eq(&author, &editor));
        assert!(!author_many);
        assert_eq!(author.name(), "AuthorNestedOut");
        // Depth 1 nests scalars only.
        assert!(!author.has_relations());
    }

    #[test]
    fn mutual_references_terminate_at_any_depth() {
        let request = SchemaRequest::new("Author", "AuthorDeep", SchemaIntent::ReadWithRelations).depth(25);
        let schema = derive(&catalog(), &request).unwrap();

        let defs = schema.definitions();
        assert_eq!(
            defs.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["AuthorNestedOut", "BookNestedOut"]
        );
        let rendered = schema.json_schema();
        assert!(rendered["$defs"]["BookNestedOut"].is_object());
        assert_eq!(
            rendered["properties"]["books"]["items"]["$ref"],
            json!("#/$defs/BookNestedOut")
        );
    }

    #[test]
    fn validation_reports_every_violation() {
        let schema = derive(&catalog(), &SchemaRequest::new("Author", "AuthorIn", SchemaIntent::Create)).unwrap();
        let err = schema
            .validate(&json!({"name": 7, "active": null, "nickname": "x"}))
            .unwrap_err();
        match err {
            SchemaError::ValidationFailed { schema, violations } => {
                assert_eq!(schema, "AuthorIn");
                assert!(violations.len() >= 3, "got {violations}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_enforces_length_and_format() {
        let schema = derive(&catalog(), &SchemaRequest::new("Author", "AuthorIn", SchemaIntent::Create)).unwrap();
        let long = "x".repeat(101);
        assert!(schema.validate(&json!({"name": long})).is_err());
        assert!(schema.validate(&json!({"name": "Ann", "joined": "yesterday"})).is_err());

        let row = schema
            .validate(&json!({"name": "Ann", "joined": "2024-01-02T03:04:05Z", "bio": null}))
            .unwrap();
        assert_eq!(row["name"], json!("Ann"));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let schema = derive(&catalog(), &SchemaRequest::new("Author", "AuthorIn", SchemaIntent::Create)).unwrap();
        assert!(schema.validate(&json!(["name"])).is_err());
    }

    #[test]
    fn fill_absent_sets_nullable_fields_to_null() {
        let schema = derive(&catalog(), &SchemaRequest::new("Author", "AuthorIn", SchemaIntent::Create)).unwrap();
        let mut row = schema.validate(&json!({"name": "Ann"})).unwrap();
        schema.fill_absent(&mut row);
        assert_eq!(row.get("bio"), Some(&json!(null)));
        assert!(!row.contains_key("active"));
    }

    #[test]
    fn project_keeps_only_schema_fields() {
        let request = SchemaRequest::new("Author", "AuthorOut", SchemaIntent::Read).exclude(["bio"]);
        let schema = derive(&catalog(), &request).unwrap();
        let row = json!({"id": 1, "name": "Ann", "bio": "secret", "active": true})
            .as_object()
            .cloned()
            .unwrap();
        let projected = schema.project(&row);
        assert_eq!(
            serde_json::Value::Object(projected),
            json!({"id": 1, "name": "Ann", "active": true, "joined": null})
        );
    }

    #[test]
    fn deriver_caches_by_request() {
        let deriver = SchemaDeriver::new(Arc::new(catalog()));
        let request = SchemaRequest::new("Book", "BookOut", SchemaIntent::ReadWithRelations);
        let first = deriver.derive(&request).unwrap();
        let second = deriver.derive(&request).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = deriver.derive(&request.clone().exclude(["editor"])).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(deriver.cached(), 2);
    }

    #[test]
    fn concurrent_derivations_share_one_instance() {
        let deriver = SchemaDeriver::new(Arc::new(catalog()));
        let request = SchemaRequest::new("Book", "BookOut", SchemaIntent::ReadWithRelations);

        let derived: Vec<Arc<ViewSchema>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| deriver.derive(&request).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let cached = deriver.derive(&request).unwrap();
        assert!(derived.iter().all(|schema| Arc::ptr_eq(schema, &cached)));
        assert_eq!(deriver.cached(), 1);
    }
}
