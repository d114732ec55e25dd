//! # OkaProxy
//!
//! Reverse proxy that challenges unverified clients with a cookie check,
//! rate limits them through a shared Redis counter, and forwards everything
//! else to the configured upstream. Several listeners, each with its own
//! upstream and secret, run in one process.
//!
//! ## Usage
//!
//! ```bash
//! # Start with ./config.toml
//! okaproxy
//!
//! # Start with another config file
//! okaproxy --config /etc/okaproxy/config.toml
//!
//! # Only validate the configuration
//! okaproxy --config /etc/okaproxy/config.toml --check
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use oka_config::{load_config, LogFormat, ProxyConfig};
use oka_resilience::{CounterStore, RedisCounterStore};
use oka_server::{shutdown_signal, Pages, ServerManager, SharedResources};
use oka_telemetry::{init_logging, load_geo_locator, LogOutput, LoggingConfig, GEOIP_DB_PATHS};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// OkaProxy - verifying, rate limiting reverse proxy
#[derive(Parser, Debug)]
#[command(name = "okaproxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "OKA_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Log level filter, overrides `logging.level`
    #[arg(short, long, env = "OKA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

/// Application entry point
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("okaproxy: {e:#}");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<()> {
    // Both axum-server and reqwest link rustls; the process needs one default provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = load_config(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    if cli.check {
        println!(
            "Configuration OK: {} server(s) in {}",
            config.servers.len(),
            cli.config.display()
        );
        return Ok(());
    }

    let log_guard = init_logging(&logging_config(&config, cli.log_level))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        servers = config.servers.len(),
        "Starting OkaProxy"
    );

    let store = RedisCounterStore::new(
        &config.redis.url,
        config.redis.operation_timeout,
        config.redis.connect_timeout,
    )
    .context("Invalid Redis configuration")?;
    match store.health_check().await {
        Ok(()) => info!("Redis connection established successfully"),
        Err(err) => warn!(
            error = %err,
            "Redis connection failed, requests are admitted without rate limiting until it recovers"
        ),
    }

    let pages = Pages::load(&config.pages).await;
    let resources = SharedResources::new(Arc::new(store), pages)
        .with_geo(load_geo_locator(&GEOIP_DB_PATHS))
        .with_log_guard(log_guard);

    let mut manager = ServerManager::start(&config, resources)
        .await
        .context("Failed to start servers")?;

    tokio::select! {
        _ = shutdown_signal() => {}
        () = manager.wait() => warn!("All listeners stopped"),
    }

    manager.shutdown().await;
    Ok(())
}

fn logging_config(config: &ProxyConfig, level_override: Option<String>) -> LoggingConfig {
    let logging = LoggingConfig::new(level_override.unwrap_or_else(|| config.logging.level.clone()))
        .with_output(match config.logging.format {
            LogFormat::Pretty => LogOutput::Pretty,
            LogFormat::Json => LogOutput::Json,
        });

    match config.logging.directory {
        Some(ref directory) => logging.with_directory(directory),
        None => logging,
    }
}
