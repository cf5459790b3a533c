//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor. Every field is an `Arc` or `Copy`, so cloning per
//! request is cheap.

use std::sync::Arc;

use ferrest_auth::{PasswordHasher, TokenService};
use ferrest_core::Catalog;
use ferrest_schema::SchemaDeriver;
use ferrest_store::Storage;

use crate::resource::Resource;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub tokens: Arc<TokenService>,
    /// Process-wide schema cache over the entity catalog.
    pub schemas: Arc<SchemaDeriver>,
    pub hasher: PasswordHasher,
    /// Resources mounted by [`crate::app`], in routing order.
    pub resources: Arc<Vec<Arc<Resource>>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage", &self.storage.backend())
            .field("tokens", &self.tokens)
            .field("cached_schemas", &self.schemas.cached())
            .field("hasher", &self.hasher)
            .field(
                "resources",
                &self.resources.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        tokens: TokenService,
        schemas: SchemaDeriver,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            storage,
            tokens: Arc::new(tokens),
            schemas: Arc::new(schemas),
            hasher,
            resources: Arc::new(Vec::new()),
        }
    }

    pub fn with_resources(mut self, resources: Vec<Arc<Resource>>) -> Self {
        self.resources = Arc::new(resources);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.schemas.catalog()
    }
}
