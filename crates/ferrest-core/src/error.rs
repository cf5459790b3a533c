use thiserror::Error;

/// Errors raised while assembling or querying an entity [`Catalog`](crate::Catalog).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// An entity with this name was registered twice.
    #[error("entity '{0}' is already registered")]
    DuplicateEntity(String),

    /// No entity with this name is registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// A relationship points at an entity that is not registered.
    #[error("relationship '{entity}.{relationship}' targets unknown entity '{target}'")]
    DanglingRelationship {
        entity: String,
        relationship: String,
        target: String,
    },

    /// The primary key column is not among the entity's columns.
    #[error("entity '{entity}' declares primary key '{column}' which is not a column")]
    MissingPrimaryKey { entity: String, column: String },
}
