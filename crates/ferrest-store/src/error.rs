use thiserror::Error;

/// Errors surfaced by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No row matched the primary key.
    #[error("no record with key {key} in '{table}'")]
    NotFound { table: String, key: String },

    /// A uniqueness constraint or primary key would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A table or column name is not a plain identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A record or key value has an unusable shape.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Any other backend failure. Opaque to clients.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}
