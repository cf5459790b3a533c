//! # View Schemas
//!
//! A [`ViewSchema`] is the derived shape of one entity for one purpose:
//! which fields appear, which are required, which may be null, and which
//! relationships are embedded as nested schemas. It renders to JSON Schema
//! for documentation and compiles that rendering once for validation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ferrest_core::{ColumnType, Row};
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::SchemaError;
use crate::validate;

/// What a derived schema is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaIntent {
    /// Response shape, scalar fields only.
    Read,
    /// Response shape with relationships embedded as nested schemas.
    ReadWithRelations,
    /// Request body for creation. The primary key is never accepted.
    Create,
    /// Request body for partial update. Every field is optional.
    Update,
}

impl SchemaIntent {
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWithRelations)
    }
}

/// Schema-level type of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Integer,
    Number,
    Boolean,
    String { max_length: Option<u32> },
    DateTime,
    Date,
    Uuid,
    /// Arbitrary JSON.
    Any,
}

impl Primitive {
    /// Map a storage type to its schema primitive.
    ///
    /// Returns `None` for types with no mapping (binary blobs, vendor types).
    pub fn from_column_type(ty: &ColumnType) -> Option<Self> {
        match ty {
            ColumnType::Integer | ColumnType::BigInteger => Some(Self::Integer),
            ColumnType::Float => Some(Self::Number),
            ColumnType::Boolean => Some(Self::Boolean),
            ColumnType::String { max_length } => Some(Self::String {
                max_length: *max_length,
            }),
            ColumnType::Text => Some(Self::String { max_length: None }),
            ColumnType::DateTime => Some(Self::DateTime),
            ColumnType::Date => Some(Self::Date),
            ColumnType::Uuid => Some(Self::Uuid),
            ColumnType::Json => Some(Self::Any),
            ColumnType::Binary | ColumnType::Other(_) => None,
        }
    }

    fn json_schema(&self, nullable: bool) -> Value {
        let (ty, extra): (&str, Option<(&str, Value)>) = match self {
            Self::Integer => ("integer", None),
            Self::Number => ("number", None),
            Self::Boolean => ("boolean", None),
            Self::String { max_length: Some(n) } => ("string", Some(("maxLength", json!(n)))),
            Self::String { max_length: None } => ("string", None),
            Self::DateTime => ("string", Some(("format", json!("date-time")))),
            Self::Date => ("string", Some(("format", json!("date")))),
            Self::Uuid => ("string", Some(("format", json!("uuid")))),
            Self::Any => return json!({}),
        };

        let mut schema = Map::new();
        if nullable {
            schema.insert("type".into(), json!([ty, "null"]));
        } else {
            schema.insert("type".into(), json!(ty));
        }
        if let Some((k, v)) = extra {
            schema.insert(k.into(), v);
        }
        Value::Object(schema)
    }
}

/// How a field's value is produced.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Scalar(Primitive),
    /// An embedded relationship. `many` relationships render as arrays.
    Nested {
        schema: Arc<ViewSchema>,
        relationship: String,
        many: bool,
    },
}

/// One field of a view schema.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    /// Must be present in a conforming payload.
    pub required: bool,
    /// `null` is an accepted value.
    pub nullable: bool,
}

impl FieldSchema {
    pub fn is_nested(&self) -> bool {
        matches!(self.kind, FieldKind::Nested { .. })
    }

    fn property(&self) -> Value {
        match &self.kind {
            FieldKind::Scalar(p) => p.json_schema(self.nullable),
            FieldKind::Nested { schema, many, .. } => {
                let reference = json!({ "$ref": format!("#/$defs/{}", schema.name()) });
                if *many {
                    json!({ "type": "array", "items": reference })
                } else {
                    json!({ "anyOf": [reference, { "type": "null" }] })
                }
            }
        }
    }
}

/// A derived, validated shape for one entity and one intent.
pub struct ViewSchema {
    name: String,
    entity: String,
    intent: SchemaIntent,
    fields: Vec<FieldSchema>,
    json_schema: Value,
    validator: Validator,
}

impl fmt::Debug for ViewSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewSchema")
            .field("name", &self.name)
            .field("entity", &self.entity)
            .field("intent", &self.intent)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}

impl ViewSchema {
    pub(crate) fn build(
        name: String,
        entity: String,
        intent: SchemaIntent,
        fields: Vec<FieldSchema>,
    ) -> Result<Self, SchemaError> {
        let json_schema = render(&name, &fields);
        let validator = validate::compile(&name, &json_schema)?;
        Ok(Self {
            name,
            entity,
            intent,
            fields,
            json_schema,
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn intent(&self) -> SchemaIntent {
        self.intent
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn has_relations(&self) -> bool {
        self.fields.iter().any(FieldSchema::is_nested)
    }

    /// The JSON Schema (Draft 2020-12) rendering, nested definitions under `$defs`.
    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Validate a request payload and return it as a row.
    ///
    /// Unknown fields, wrong types, missing required fields and nulls in
    /// non-nullable fields are all rejected, each reported as its own
    /// violation.
    pub fn validate(&self, payload: &Value) -> Result<Row, SchemaError> {
        validate::check(&self.validator, &self.name, payload)?;
        match payload {
            Value::Object(map) => Ok(map.clone()),
            // The rendered schema requires an object, so this is unreachable
            // after a successful check.
            _ => Err(SchemaError::ValidatorBuild {
                schema: self.name.clone(),
                reason: "schema accepted a non-object payload".into(),
            }),
        }
    }

    /// Fill absent optional nullable fields with `null`.
    pub fn fill_absent(&self, row: &mut Row) {
        for field in &self.fields {
            if field.nullable && !field.required && !field.is_nested() && !row.contains_key(&field.name) {
                row.insert(field.name.clone(), Value::Null);
            }
        }
    }

    /// Shape a stored row into this schema's scalar fields.
    ///
    /// Columns outside the schema are dropped and absent columns render as
    /// `null`. Nested fields are left to the caller, who has storage access.
    pub fn project(&self, row: &Row) -> Row {
        self.fields
            .iter()
            .filter_map(|f| match f.kind {
                FieldKind::Scalar(_) => Some((f.name.clone(), row.get(&f.name).cloned().unwrap_or(Value::Null))),
                FieldKind::Nested { .. } => None,
            })
            .collect()
    }

    /// Every nested schema reachable from this one, keyed by name.
    pub fn definitions(&self) -> BTreeMap<String, Arc<ViewSchema>> {
        let mut out = BTreeMap::new();
        collect_definitions(&self.fields, &mut out);
        out
    }
}

fn collect_definitions(fields: &[FieldSchema], out: &mut BTreeMap<String, Arc<ViewSchema>>) {
    for field in fields {
        if let FieldKind::Nested { schema, .. } = &field.kind {
            if out.contains_key(schema.name()) {
                continue;
            }
            out.insert(schema.name().to_string(), Arc::clone(schema));
            collect_definitions(schema.fields(), out);
        }
    }
}

fn object_schema(title: &str, fields: &[FieldSchema]) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields {
        properties.insert(field.name.clone(), field.property());
        if field.required {
            required.push(Value::String(field.name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("title".into(), json!(title));
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    schema.insert("additionalProperties".into(), json!(false));
    schema
}

fn render(name: &str, fields: &[FieldSchema]) -> Value {
    let mut schema = Map::new();
    schema.insert(
        "$schema".into(),
        json!("https://json-schema.org/draft/2020-12/schema"),
    );
    schema.extend(object_schema(name, fields));

    let mut defs = BTreeMap::new();
    collect_definitions(fields, &mut defs);
    if !defs.is_empty() {
        let defs: Map<String, Value> = defs
            .iter()
            .map(|(k, v)| (k.clone(), Value::Object(object_schema(k, v.fields()))))
            .collect();
        schema.insert("$defs".into(), Value::Object(defs));
    }
    Value::Object(schema)
}
