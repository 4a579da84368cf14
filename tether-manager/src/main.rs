use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tether::config::load_config;
use tether::transport::memory::MemoryHub;
use tether::{KindTable, TetherConfig};
use tether_manager::api::{create_router, ApiState};
use tether_manager::auth::api_users_auth;
use tether_manager::SupervisorManager;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=info,tether_manager=info".into()),
        )
        .init();

    info!("Tether manager starting...");

    let config_path = std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "tether.toml".to_string());
    let mut config = if Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        TetherConfig::default()
    };
    config.apply_env();

    info!(
        config_path = %config_path,
        api_bind = %config.api.bind,
        retry_delay_ms = config.supervisor.retry_delay_ms,
        connectors = config.connectors.len(),
        api_users = config.api_users.len(),
        "Configuration loaded"
    );
    if config.api_users.is_empty() {
        warn!("No [api_users] configured, channel connectors accept any caller");
    }

    let table = KindTable::builtin(MemoryHub::new());
    let manager = Arc::new(
        SupervisorManager::new(&table, config.supervisor.clone())
            .with_auth(api_users_auth(&config.api_users)),
    );
    manager.load(&config.connectors).await;
    let started = manager.start().await;
    info!(connectors_started = started, "Supervisor manager started");

    // Start HTTP API server
    let router = create_router(ApiState {
        manager: Arc::clone(&manager),
    });
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind API address {}", config.api.bind))?;
    info!(bind = %config.api.bind, "Tether API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Tether API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    server_handle.abort();
    manager.shutdown().await;
    info!("Tether manager stopped");

    Ok(())
}
