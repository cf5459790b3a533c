use ferrest_core::IdentityId;
use ferrest_store::StoreError;
use thiserror::Error;

use crate::jwt::TokenKind;

/// Why a presented token was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a well-formed JWT")]
    Malformed,

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token algorithm '{found}' does not match '{expected}'")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("token has expired")]
    Expired,

    #[error("expected a {expected} token, got {found}")]
    WrongKind { expected: TokenKind, found: TokenKind },

    #[error("refresh token carries no jti")]
    MissingJti,
}

/// Failures of the credential and token lifecycle.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown handle or wrong password. The two are not distinguished.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    /// A well-formed refresh token with no Outstanding Token record.
    #[error("token not recognized")]
    TokenNotRecognized,

    #[error("token has been revoked")]
    TokenRevoked,

    /// Logout for a token with no Outstanding Token record.
    #[error("token not found")]
    TokenNotFound,

    /// A valid access token whose identity no longer exists.
    #[error("identity {0} not found")]
    IdentityNotFound(IdentityId),

    #[error("unsupported signing algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}
