//! # ferrest-auth — Credentials & Tokens
//!
//! Password verification across Django's hash encodings, HMAC-signed JWTs
//! compatible with simple-jwt, and the session lifecycle built on them:
//! login, refresh redemption, logout (revocation) and per-request identity
//! resolution.
//!
//! ## Persistence
//!
//! Every issued refresh token has an Outstanding Token row committed before
//! the token leaves the service. Logout attaches a Revocation Record to
//! that row; the record is never removed, so a revoked token can never be
//! redeemed again.
//!
//! ## Crate Policy
//!
//! - Password hashing and verification never run on the async executor.
//! - Secrets are zeroized on drop and redacted from `Debug` output.

pub mod accounts;
pub mod error;
pub mod jwt;
pub mod passwords;
pub mod service;

pub use accounts::{Account, NewAccount};
pub use error::{AuthError, TokenError};
pub use jwt::{Algorithm, Claims, JwtCodec, TokenKind};
pub use passwords::PasswordHasher;
pub use service::{IssuedRefresh, LoginTokens, LogoutOutcome, TokenService};
