//! # Payload Validation
//!
//! Request bodies are validated against the JSON Schema rendering of their
//! view schema (Draft 2020-12) before anything touches storage. Failures
//! carry one structured [`Violation`] per problem so clients can fix every
//! field in one round trip.

use std::fmt;

use jsonschema::Validator;
use serde::Serialize;
use serde_json::Value;

use crate::error::SchemaError;

/// A single validation violation with structured context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON Pointer path to the violating field in the instance.
    pub instance_path: String,
    /// JSON Pointer path within the schema that triggered the error.
    pub schema_path: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance_path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.instance_path, self.message)
        }
    }
}

/// Collection of validation violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationViolations {
    violations: Vec<Violation>,
}

impl ValidationViolations {
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn into_inner(self) -> Vec<Violation> {
        self.violations
    }
}

impl From<Vec<Violation>> for ValidationViolations {
    fn from(violations: Vec<Violation>) -> Self {
        Self { violations }
    }
}

impl fmt::Display for ValidationViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Compile a rendered view schema.
pub(crate) fn compile(schema_name: &str, schema: &Value) -> Result<Validator, SchemaError> {
    let mut opts = jsonschema::options();
    opts.with_draft(jsonschema::Draft::Draft202012);
    opts.should_validate_formats(true);
    opts.build(schema).map_err(|e| SchemaError::ValidatorBuild {
        schema: schema_name.to_string(),
        reason: e.to_string(),
    })
}

/// Run a compiled validator and collect every violation.
pub(crate) fn check(validator: &Validator, schema_name: &str, instance: &Value) -> Result<(), SchemaError> {
    let violations: Vec<Violation> = validator
        .iter_errors(instance)
        .map(|e| Violation {
            instance_path: e.instance_path.to_string(),
            schema_path: e.schema_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::ValidationFailed {
            schema: schema_name.to_string(),
            violations: ValidationViolations { violations },
        })
    }
}
