//! # Resource Declarations
//!
//! The resources mounted by the default application:
//!
//! - `user` — account management, password hashing on write, self-service
//!   password change via `POST /user`.
//! - `group` — read-only groups with their members embedded.

pub mod group;
pub mod user;

use std::sync::Arc;

use ferrest_schema::SchemaDeriver;

use crate::resource::{Resource, ResourceError};

/// Build every default resource against the deriver's catalog, in routing
/// order.
pub fn default_resources(deriver: &SchemaDeriver) -> Result<Vec<Arc<Resource>>, ResourceError> {
    Ok(vec![
        Arc::new(user::resource(deriver)?),
        Arc::new(group::resource(deriver)?),
    ])
}
