//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs and helpers that map
//! axum's extractor rejections onto [`AppError::BadRequest`].

use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::extract::{Form, Query};
use axum::Json;

use crate::error::AppError;

/// Request types with rules beyond what deserialization checks.
pub trait Validate {
    /// Validate business rules.
    fn validate(&self) -> Result<(), AppError>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate()?;
    Ok(value)
}

/// Extract a URL-encoded form body.
pub fn extract_form<T>(result: Result<Form<T>, FormRejection>) -> Result<T, AppError> {
    result
        .map(|Form(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract query string parameters.
pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Check a string field's length in characters, inclusive on both ends.
pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), AppError> {
    let len = value.chars().count();
    if len < min {
        return Err(AppError::invalid_field(
            field,
            format!("must be at least {min} characters"),
        ));
    }
    if len > max {
        return Err(AppError::invalid_field(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(())
}

/// Reject an empty string field.
pub fn require_present(field: &str, value: &str) -> Result<(), AppError> {
    if value.is_empty() {
        return Err(AppError::invalid_field(field, "must not be empty"));
    }
    Ok(())
}
