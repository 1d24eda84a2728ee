//! # hearthd — hearth daemon
//!
//! Composition root that wires all adapters together and starts the server.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize logging
//! - Open the `SQLite` key-value store and run migrations
//! - Build the hub, attach the virtual provider and the process bridges
//! - Load scripted rules
//! - Build the axum router and serve it
//! - Handle graceful shutdown (SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It only wires things together; no domain logic belongs here.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hearth_adapter_http_axum::state::AppState;
use hearth_adapter_rpc::process;
use hearth_adapter_storage_sqlite_sqlx::SqliteKeyValueStore;
use hearth_adapter_virtual::VirtualOptions;
use hearth_app::hub::{Hub, HubOptions};
use hearth_app::provider::Provider;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    // Storage
    let db = hearth_adapter_storage_sqlite_sqlx::Config::new(config.database_url())
        .build()
        .await
        .context("opening database")?;
    let store = Arc::new(SqliteKeyValueStore::new(db.pool().clone()));

    let hub = Hub::new(HubOptions {
        sync_capacity: config.server.sync_capacity,
    });

    // Providers
    if config.integrations.virtual_enabled {
        let options = VirtualOptions {
            meter_period: Duration::from_secs(config.integrations.meter_period_secs),
            backoff: config.backoff(),
        };
        let provider = hearth_adapter_virtual::setup(Arc::clone(&store), options).await?;
        hub.add_provider(provider)?;
    }
    for bridge in &config.bridges {
        let provider = Arc::new(Provider::new(bridge.id.as_str())?);
        process::supervise(&provider, bridge.process(), config.supervisor_options());
        hub.add_provider(provider)?;
        tracing::info!(bridge = %bridge.id, command = %bridge.command, "bridge configured");
    }

    // Rules
    for script in config.rules.iter().cloned() {
        hub.load_script(script)?;
    }

    let hub_loop = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.run().await }
    });

    // HTTP
    let app = hearth_adapter_http_axum::router::build(AppState::new(Arc::clone(&hub)));
    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(address = %bind_addr, "hearthd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&hub)))
        .await?;

    if let Err(err) = hub_loop.await {
        tracing::error!(error = %err, "hub loop panicked");
    }
    db.close().await;
    Ok(())
}

async fn shutdown_signal(hub: Arc<Hub>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
    hub.shutdown().await;
}
