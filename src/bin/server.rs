//! mapkv Server Binary
//!
//! Starts the TCP server for mapkv.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mapkv::{Config, Server};
use tracing_subscriber::{fmt, EnvFilter};

/// mapkv Server
#[derive(Parser, Debug)]
#[command(name = "mapkv-server")]
#[command(about = "Key-value store server persisted in a memory-mapped file")]
#[command(version)]
struct Args {
    /// Listen address (ip:port)
    #[arg(short, long)]
    address: Option<String>,

    /// Path to the storage file (default: storage.bin beside the executable)
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// TOML config file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network worker threads (default: CPUs - 1)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Seconds between stats reports
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Name of the cross-process storage lock
    #[arg(long)]
    lock_name: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(address) = self.address {
            config.listen_addr = address;
        }
        if let Some(storage) = self.storage {
            config.storage_path = storage;
        }
        if let Some(threads) = self.threads {
            config.worker_threads = Some(threads);
        }
        if let Some(secs) = self.stats_interval {
            config.stats_interval_secs = secs;
        }
        if let Some(name) = self.lock_name {
            config.lock_name = name;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mapkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let config = Args::parse().into_config()?;

    tracing::info!("mapkv Server v{}", mapkv::VERSION);
    tracing::info!("Storage file: {}", config.storage_path.display());
    tracing::info!("Listen address: {}", config.listen_addr);

    let server = Server::new(config).context("starting server")?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal, shutting down gracefully...");
        shutdown.cancel();
    })?;

    server.run()?;
    Ok(())
}
