//! # Startup
//!
//! 1. **Catalog** — register the account entities and check relationships.
//! 2. **Services** — token service, password hasher and schema deriver from
//!    [`AppConfig`].
//! 3. **Resources** — build the default resources, deriving every schema
//!    once so a bad declaration fails here rather than on a request.
//! 4. **Superuser** — optionally seed the configured bootstrap account.

use std::sync::Arc;

use ferrest_auth::{accounts, JwtCodec, NewAccount, PasswordHasher, TokenService};
use ferrest_core::{Catalog, CatalogError};
use ferrest_schema::SchemaDeriver;
use ferrest_store::{Isolation, Storage, StoreError};

use crate::config::{AppConfig, BootstrapUser};
use crate::resource::ResourceError;
use crate::state::AppState;
use crate::views;

/// Errors during startup.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("resource declaration error: {0}")]
    Resource(#[from] ResourceError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// The catalog of every entity the default resources serve.
pub fn catalog() -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::new();
    accounts::register(&mut catalog)?;
    catalog.validate()?;
    Ok(catalog)
}

/// Assemble the shared state over `storage`.
pub fn build_state(config: &AppConfig, storage: Arc<dyn Storage>) -> Result<AppState, BootstrapError> {
    let codec = JwtCodec::new(config.algorithm, config.secret_key.as_bytes().to_vec());
    let tokens = TokenService::new(codec, Arc::clone(&storage))
        .with_access_ttl(config.access_ttl)
        .with_refresh_ttl(config.refresh_ttl);
    let schemas = SchemaDeriver::new(Arc::new(catalog()?));
    let resources = views::default_resources(&schemas)?;

    tracing::info!(
        backend = storage.backend(),
        resources = ?resources.iter().map(|r| r.name()).collect::<Vec<_>>(),
        schemas = schemas.cached(),
        "application state built"
    );
    Ok(AppState::new(storage, tokens, schemas, PasswordHasher::new(config.hash_iterations)).with_resources(resources))
}

/// Create the bootstrap superuser unless an account with its handle exists.
/// Returns whether an account was created.
pub async fn seed_superuser(state: &AppState, user: &BootstrapUser) -> Result<bool, BootstrapError> {
    let mut tx = state.storage.begin(Isolation::ReadCommitted).await?;
    if accounts::find_account(tx.as_mut(), &user.username).await?.is_some() {
        tracing::debug!(username = %user.username, "bootstrap user already exists");
        return Ok(false);
    }

    let password_hash = state
        .hasher
        .hash_blocking(user.password.to_string())
        .await
        .map_err(|e| BootstrapError::Hashing(e.to_string()))?;
    let row = accounts::create_account(
        tx.as_mut(),
        NewAccount {
            username: user.username.clone(),
            password_hash,
            staff: true,
            superuser: true,
            ..Default::default()
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(username = %user.username, id = %row.get("id").cloned().unwrap_or_default(), "bootstrap superuser created");
    Ok(true)
}
