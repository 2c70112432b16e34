//! # llmbox
//!
//! Broker binary: loads settings, starts the WebSocket server, builds the
//! model catalog in the background and shuts down cleanly on Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use llmbox_catalog::{CatalogConfig, CatalogManager, ModelCatalog};
use llmbox_core::command::CommandEngineLoader;
use llmbox_server::{BrokerServer, ServerConfig};
use llmbox_settings::BrokerSettings;
use llmbox_telemetry::{TelemetryConfig, init_telemetry, parse_level};
use tracing::{error, info, warn};

/// Multi-client WebSocket broker for long-lived inference sessions.
#[derive(Parser, Debug)]
#[command(name = "llmbox", version, about)]
struct Cli {
    /// JSON settings file merged over the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to bind (overrides settings and environment).
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Default log level (`RUST_LOG` takes precedence).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn catalog_config(settings: &BrokerSettings) -> CatalogConfig {
    CatalogConfig {
        source_url: settings.catalog.source_url.clone(),
        storage_path: settings.catalog.storage_path.clone(),
        verify_hashes: settings.catalog.verify_hashes,
        download_attempts: settings.catalog.download_attempts,
        parallel_downloads: settings.catalog.parallel_downloads,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = TelemetryConfig {
        log_level: parse_level(&cli.log_level)
            .with_context(|| format!("unknown log level {:?}", cli.log_level))?,
        json: cli.log_json,
        ..TelemetryConfig::default()
    };
    init_telemetry(&telemetry)?;

    let mut settings = llmbox_settings::load_settings_from_path(cli.config.as_deref())
        .context("failed to load settings")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    let catalog = Arc::new(ModelCatalog::new());
    let loader = Arc::new(CommandEngineLoader::new(settings.engine.command.clone()));
    let server = Arc::new(BrokerServer::new(
        ServerConfig::from_settings(&settings),
        Arc::clone(&catalog),
        loader,
    ));

    let (addr, serve_handle) = server.listen().await.context("failed to start server")?;
    info!(%addr, engine = %settings.engine.command, "broker ready");
    let reaper_handle = server.spawn_reaper();

    let manager = CatalogManager::new(catalog_config(&settings), catalog);
    let catalog_server = Arc::clone(&server);
    let cancel = server.state().shutdown.token();
    let catalog_handle = tokio::spawn(async move {
        tokio::select! {
            result = manager.run() => match result {
                Ok(models) => {
                    info!(models = models.len(), "model catalog ready");
                    let _ = catalog_server.push_catalog();
                }
                Err(e) => error!(error = %e, "model catalog unavailable"),
            },
            () = cancel.cancelled() => warn!("catalog build cancelled"),
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    server
        .shutdown_gracefully(vec![serve_handle, reaper_handle, catalog_handle])
        .await;
    info!("shutdown complete");
    Ok(())
}
