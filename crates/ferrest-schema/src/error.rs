use ferrest_core::CatalogError;
use thiserror::Error;

use crate::validate::ValidationViolations;

/// Errors raised by schema derivation and payload validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A column's storage type has no schema primitive.
    #[error("column '{entity}.{column}' has type '{ty}' with no schema mapping")]
    UnsupportedFieldType {
        entity: String,
        column: String,
        ty: String,
    },

    /// The entity or a relationship target is not in the catalog.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The rendered JSON Schema could not be compiled.
    #[error("validator build error for schema '{schema}': {reason}")]
    ValidatorBuild { schema: String, reason: String },

    /// A payload did not conform to the schema.
    #[error("payload does not match schema '{schema}': {violations}")]
    ValidationFailed {
        schema: String,
        violations: ValidationViolations,
    },
}
