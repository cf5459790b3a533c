//! # Entity Descriptions
//!
//! A persisted entity is described as plain data: its table, primary key,
//! typed columns and relationships to other entities. The description is
//! built once at startup and shared behind an `Arc`; nothing reflects over
//! live records.
//!
//! ```text
//! EntityDescription "User" (auth_user)
//!   ├── columns: id, username, email, ...
//!   └── relationships:
//!         groups ──Association(auth_user_groups)──▶ "Group"
//!         tokens ──Reverse(user_id)────────────────▶ "OutstandingToken"
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CatalogError;

/// A stored record: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

// ── Columns ─────────────────────────────────────────────────────────────────

/// The underlying storage type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInteger,
    Float,
    Boolean,
    String { max_length: Option<u32> },
    Text,
    DateTime,
    Date,
    Uuid,
    Json,
    Binary,
    /// A backend-specific type known only by name (e.g. `tsvector`).
    Other(String),
}

impl ColumnType {
    /// Bounded string column.
    pub fn string(max_length: u32) -> Self {
        Self::String {
            max_length: Some(max_length),
        }
    }

    /// Human-readable type name used in diagnostics.
    pub fn name(&self) -> &str {
        match self {
            Self::Integer => "integer",
            Self::BigInteger => "big_integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String { .. } => "string",
            Self::Text => "text",
            Self::DateTime => "date_time",
            Self::Date => "date",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Other(name) => name,
        }
    }
}

/// Value applied to a column when a create payload omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    Value(Value),
    /// Current UTC timestamp at insert time.
    Now,
}

impl ColumnDefault {
    /// Produce the concrete value for a new record.
    pub fn resolve(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Now => timestamp(Utc::now()),
        }
    }
}

/// Render an instant the way date-time columns are stored.
pub fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// A persisted column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    /// Accepted in request payloads, never rendered in responses.
    #[serde(default)]
    pub write_only: bool,
}

impl Column {
    /// A non-nullable column without a default.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: None,
            write_only: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(ColumnDefault::Value(value));
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default = Some(ColumnDefault::Now);
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }
}

// ── Relationships ───────────────────────────────────────────────────────────

/// How two entities are joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Join {
    /// To-one: `self.column` holds the target's primary key.
    ForeignKey { column: String },
    /// To-many: `target.column` holds this entity's primary key.
    Reverse { column: String },
    /// To-many through a link table: `table.local` references this entity,
    /// `table.remote` references the target.
    Association {
        table: String,
        local: String,
        remote: String,
    },
}

/// A named relationship to another registered entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    /// Name of the target [`EntityDescription`].
    pub target: String,
    pub join: Join,
}

impl Relationship {
    pub fn new(name: impl Into<String>, target: impl Into<String>, join: Join) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            join,
        }
    }

    /// Whether the relationship yields a sequence of related records.
    pub fn is_many(&self) -> bool {
        !matches!(self.join, Join::ForeignKey { .. })
    }
}

// ── Entity ──────────────────────────────────────────────────────────────────

/// Structural description of a persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    /// Type name, used to name derived schemas (`UserRead`, `GroupNestedOut`).
    pub name: String,
    pub table: String,
    pub primary_key: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    pub relationships: Vec<Relationship>,
}

impl EntityDescription {
    /// Start a description whose primary key is `id`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Look up a column by name.
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    /// Fill columns missing from `row` with their declared defaults.
    pub fn apply_defaults(&self, row: &mut Row) {
        for column in &self.columns {
            if row.contains_key(&column.name) {
                continue;
            }
            if let Some(default) = &column.default {
                row.insert(column.name.clone(), default.resolve());
            }
        }
    }
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Registry of entity descriptions, indexed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entities: BTreeMap<String, Arc<EntityDescription>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Names must be unique.
    pub fn register(&mut self, entity: EntityDescription) -> Result<Arc<EntityDescription>, CatalogError> {
        if self.entities.contains_key(&entity.name) {
            return Err(CatalogError::DuplicateEntity(entity.name));
        }
        if !entity.has_column(&entity.primary_key) {
            return Err(CatalogError::MissingPrimaryKey {
                entity: entity.name,
                column: entity.primary_key,
            });
        }
        let entity = Arc::new(entity);
        self.entities.insert(entity.name.clone(), Arc::clone(&entity));
        Ok(entity)
    }

    /// Fetch an entity by name.
    pub fn get(&self, name: &str) -> Result<Arc<EntityDescription>, CatalogError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownEntity(name.to_string()))
    }

    /// Verify every relationship resolves to a registered entity.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for entity in self.entities.values() {
            for rel in &entity.relationships {
                if !self.entities.contains_key(&rel.target) {
                    return Err(CatalogError::DanglingRelationship {
                        entity: entity.name.clone(),
                        relationship: rel.name.clone(),
                        target: rel.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescription>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
