// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sensorlink gateway server
//!
//! Accepts sensor devices over mutual TLS, stores their readings in SQLite
//! and forwards them to Graphite/Carbon.
//!
//! # Usage
//!
//! ```bash
//! # Run with a config file
//! sensorlink-server --config gateway.json
//!
//! # Override the listening address
//! sensorlink-server --config gateway.json --bind 127.0.0.1 --port 9443
//!
//! # Show row counts of the configured database
//! sensorlink-server --config gateway.json stats
//!
//! # Write a config template with default values
//! sensorlink-server --port 9443 init gateway.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::unbounded;
use sensorlink_carbon::{DeviceNames, MetricsForwarder};
use sensorlink_proto::ReadingKind;
use sensorlink_server::{Dispatcher, GatewayConfig, GatewayServer};
use sensorlink_store::{table_name, MeasurementStore, SqliteStore, StorageWorker};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// sensorlink gateway - sensor telemetry ingestion over mutual TLS
#[derive(Parser, Debug)]
#[command(name = "sensorlink-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// TCP port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show stored row counts
    Stats,

    /// Write the effective configuration to a file
    Init {
        /// Output path
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            GatewayConfig::from_file(path)?
        }
        None => GatewayConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind_address = bind.parse().context("invalid --bind address")?;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    if let Some(Commands::Init { output }) = &args.command {
        config.to_file(output)?;
        info!("Configuration written to {:?}", output);
        return Ok(());
    }

    let store = SqliteStore::new(&config.storage.database_path).with_context(|| {
        format!(
            "failed to open database {}",
            config.storage.database_path.display()
        )
    })?;

    if let Some(Commands::Stats) = args.command {
        return print_stats(&store);
    }

    let names = match DeviceNames::load(&config.metrics.names_path) {
        Ok(names) => names,
        Err(e) => {
            warn!("{}; metric paths fall back to raw device keys", e);
            DeviceNames::new()
        }
    };

    info!("+----------------------------------------------------+");
    info!(
        "|       sensorlink gateway v{}                    |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  Bind:     {:38} |",
        format!("{}:{}", config.bind_address, config.port)
    );
    info!(
        "|  Database: {:38} |",
        config.storage.database_path.display().to_string()
    );
    info!(
        "|  Carbon:   {:38} |",
        format!("{}:{}", config.metrics.host, config.metrics.port)
    );
    info!("|  Names:    {:38} |", names.len());
    info!("+----------------------------------------------------+");

    let (storage_tx, storage_rx) = unbounded();
    let (metrics_tx, metrics_rx) = unbounded();

    let storage_worker = StorageWorker::new(store);
    let storage_stats = storage_worker.stats();
    thread::Builder::new()
        .name("storage-worker".into())
        .spawn(move || storage_worker.run(storage_rx))
        .context("failed to spawn storage worker")?;

    let forwarder = MetricsForwarder::new(config.metrics.forwarder_config(), names);
    let forwarder_stats = forwarder.stats();
    thread::Builder::new()
        .name("metrics-forwarder".into())
        .spawn(move || forwarder.run(metrics_rx))
        .context("failed to spawn metrics forwarder")?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        let server = GatewayServer::new(config, Dispatcher::new(storage_tx, metrics_tx))?;

        // Handle shutdown signals
        let server_handle = server.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received, stopping server...");
            server_handle.shutdown();
        });

        server.run().await?;

        let stats = server.stats();
        info!(
            "Gateway stopped: {} connections, {} handshake failures, {} expired certificates",
            stats.connections.load(Ordering::Relaxed),
            stats.handshake_failures.load(Ordering::Relaxed),
            stats.expired_rejected.load(Ordering::Relaxed),
        );
        Ok::<(), anyhow::Error>(())
    })?;

    let stored = storage_stats.snapshot();
    let forwarded = forwarder_stats.snapshot();
    info!(
        "Storage: {} stored, {} duplicates, {} rejected, {} failed",
        stored.stored, stored.duplicates, stored.rejected, stored.failed
    );
    info!(
        "Metrics: {} items, {} lines, {} skipped, {} failures",
        forwarded.items, forwarded.lines_sent, forwarded.skipped, forwarded.send_failures
    );
    Ok(())
}

fn print_stats(store: &SqliteStore) -> Result<()> {
    println!("Stored readings:");
    for kind in [ReadingKind::Power, ReadingKind::TempHum, ReadingKind::Plug] {
        println!("  {:10} {}", table_name(kind), store.count(kind)?);
    }
    Ok(())
}
