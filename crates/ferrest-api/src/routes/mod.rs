//! # API Route Modules
//!
//! Fixed endpoints outside the resource framework:
//!
//! - `auth` — login, form login, refresh redemption and logout. Mounted
//!   outside the caller-identity middleware.
//! - `me` — the resolved caller.
//!
//! Resource endpoints are built per declaration by
//! [`crate::resource::routes`].

pub mod auth;
pub mod me;
