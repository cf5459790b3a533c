//! # ferrest-api — Binary Entry Point
//!
//! Starts the Axum HTTP server. Configuration comes from the environment
//! (see [`ferrest_api::config`]); without a database URL the process runs on
//! the in-memory store.

use std::sync::Arc;

use anyhow::Context;
use ferrest_api::config::{AppConfig, LogFormat};
use ferrest_auth::accounts;
use ferrest_store::{postgres, PgStorage, Storage};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    // Initialize structured tracing.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::debug!(?config, "configuration loaded");

    if config.ephemeral_secret {
        tracing::warn!("SECRET_KEY is not set; tokens are signed with a per-process key and will not survive a restart");
    }

    let storage: Arc<dyn Storage> = match &config.database_url {
        Some(url) => {
            let pool = postgres::connect(url).await.context("database connection failed")?;
            Arc::new(PgStorage::new(pool))
        }
        None => {
            tracing::warn!("no database configured; using the in-memory store");
            Arc::new(accounts::memory_storage())
        }
    };

    let state = ferrest_api::bootstrap::build_state(&config, storage).context("bootstrap failed")?;
    if let Some(user) = &config.bootstrap_user {
        ferrest_api::bootstrap::seed_superuser(&state, user)
            .await
            .context("seeding the bootstrap superuser failed")?;
    }

    let app = ferrest_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("ferrest API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
