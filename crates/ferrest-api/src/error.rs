//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps errors from ferrest-auth, ferrest-store and ferrest-schema to HTTP
//! status codes and a JSON body carrying a machine-readable code, a message,
//! and optional details. Internal error details are never returned to
//! clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ferrest_auth::AuthError;
use ferrest_schema::{SchemaError, ValidationViolations, Violation};
use ferrest_store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "FORBIDDEN").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// `messages` for 403, `violations` for 422.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Unknown handle or wrong password (401).
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Malformed, forged, expired or wrong-kind token (401).
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Refresh token with no Outstanding Token row (401).
    #[error("Token not recognized")]
    TokenNotRecognized,

    /// Refresh token that has been logged out (401).
    #[error("Token has been revoked")]
    TokenRevoked,

    /// Valid access token for an identity that no longer exists (401).
    #[error("identity {0} not found")]
    IdentityNotFound(String),

    /// Logout of a token that was never issued (404).
    #[error("Token not found")]
    TokenNotFound,

    /// The resource's permission expression denied the operation (403).
    #[error("Access denied.")]
    Forbidden(Vec<String>),

    /// Resource not found (404).
    #[error("{0}")]
    NotFound(String),

    /// A request field broke a business rule (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// The payload failed schema validation (422).
    #[error("validation error: {0}")]
    InvalidPayload(ValidationViolations),

    /// Requested ordering is outside the resource's allow-list (400).
    #[error("The ordering field '{0}' is not supported.")]
    UnsupportedOrdering(String),

    /// Request body or query string could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unique constraint violated (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            Self::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            Self::TokenNotRecognized => (StatusCode::UNAUTHORIZED, "TOKEN_NOT_RECOGNIZED"),
            Self::TokenRevoked => (StatusCode::UNAUTHORIZED, "TOKEN_REVOKED"),
            Self::IdentityNotFound(_) => (StatusCode::UNAUTHORIZED, "IDENTITY_NOT_FOUND"),
            Self::TokenNotFound => (StatusCode::NOT_FOUND, "TOKEN_NOT_FOUND"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) | Self::InvalidPayload(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::UnsupportedOrdering(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_ORDERING"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Construct a not-found error for a missing item.
    pub fn item_not_found() -> Self {
        Self::NotFound("Item not found.".to_string())
    }

    /// A 422 carrying one violation for a single request field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidPayload(ValidationViolations::from(vec![Violation {
            instance_path: format!("/{field}"),
            schema_path: String::new(),
            message: message.into(),
        }]))
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Forbidden(messages) => Some(json!({ "messages": messages })),
            Self::InvalidPayload(violations) => Some(json!({ "violations": violations })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if let Self::Internal(_) = &self {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::InvalidToken(e) => Self::InvalidToken(e.to_string()),
            AuthError::TokenNotRecognized => Self::TokenNotRecognized,
            AuthError::TokenRevoked => Self::TokenRevoked,
            AuthError::TokenNotFound => Self::TokenNotFound,
            AuthError::IdentityNotFound(id) => Self::IdentityNotFound(id.to_string()),
            AuthError::Store(e) => e.into(),
            AuthError::UnsupportedAlgorithm(_) | AuthError::Internal(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::item_not_found(),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::InvalidIdentifier(_) | StoreError::InvalidRecord(_) | StoreError::Backend(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<SchemaError> for AppError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::ValidationFailed { violations, .. } => Self::InvalidPayload(violations),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrest_auth::TokenError;
    use ferrest_core::IdentityId;
    use http_body_util::BodyExt;

    async fn response_parts(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn token_errors_are_unauthorized() {
        for (err, code) in [
            (AppError::InvalidCredentials, "INVALID_CREDENTIALS"),
            (AppError::InvalidToken("expired".into()), "INVALID_TOKEN"),
            (AppError::TokenNotRecognized, "TOKEN_NOT_RECOGNIZED"),
            (AppError::TokenRevoked, "TOKEN_REVOKED"),
            (AppError::IdentityNotFound("3".into()), "IDENTITY_NOT_FOUND"),
        ] {
            assert_eq!(err.status_and_code(), (StatusCode::UNAUTHORIZED, code));
        }
    }

    #[test]
    fn token_not_found_status_code() {
        let (status, code) = AppError::TokenNotFound.status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "TOKEN_NOT_FOUND");
    }

    #[test]
    fn ordering_and_bad_request_are_400() {
        assert_eq!(
            AppError::UnsupportedOrdering("email".into()).status_and_code(),
            (StatusCode::BAD_REQUEST, "UNSUPPORTED_ORDERING")
        );
        assert_eq!(
            AppError::BadRequest("bad json".into()).status_and_code(),
            (StatusCode::BAD_REQUEST, "BAD_REQUEST")
        );
    }

    #[test]
    fn conflict_status_code() {
        let (status, code) = AppError::Conflict("duplicate".into()).status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "CONFLICT");
    }

    #[tokio::test]
    async fn forbidden_carries_messages() {
        let err = AppError::Forbidden(vec!["The permission 'IsStaff' has failed.".into()]);
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert_eq!(body["error"]["message"], "Access denied.");
        assert_eq!(
            body["error"]["details"]["messages"][0],
            "The permission 'IsStaff' has failed."
        );
    }

    #[tokio::test]
    async fn invalid_field_carries_violations() {
        let (status, body) = response_parts(AppError::invalid_field("limit", "must be at most 100")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        let violation = &body["error"]["details"]["violations"][0];
        assert_eq!(violation["instance_path"], "/limit");
        assert_eq!(violation["message"], "must be at most 100");
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let (status, body) = response_parts(AppError::Internal("pool exhausted at 10.0.0.3".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "An internal error occurred");
        assert!(body["error"].get("details").is_none());
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn not_found_message_is_returned() {
        let (status, body) = response_parts(AppError::item_not_found()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "Item not found.");
    }

    #[test]
    fn auth_errors_map_one_to_one() {
        assert!(matches!(
            AppError::from(AuthError::InvalidToken(TokenError::Expired)),
            AppError::InvalidToken(_)
        ));
        assert!(matches!(
            AppError::from(AuthError::IdentityNotFound(IdentityId(9))),
            AppError::IdentityNotFound(id) if id == "9"
        ));
        assert!(matches!(AppError::from(AuthError::TokenRevoked), AppError::TokenRevoked));
        assert!(matches!(
            AppError::from(AuthError::Store(StoreError::Backend("down".into()))),
            AppError::Internal(_)
        ));
    }

    #[test]
    fn store_errors_map() {
        assert!(matches!(
            AppError::from(StoreError::Conflict("username".into())),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            AppError::from(StoreError::NotFound {
                table: "auth_user".into(),
                key: "4".into()
            }),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(StoreError::InvalidIdentifier("x;y".into())),
            AppError::Internal(_)
        ));
    }
}
