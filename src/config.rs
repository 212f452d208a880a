//! Configuration for mapkv
//!
//! Centralized configuration with sensible defaults. Can be built in code via
//! [`Config::builder`] or loaded from a TOML file via [`Config::from_file`].

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MapKvError, Result};

/// Default file name of the mapped storage file
pub const DEFAULT_STORAGE_FILENAME: &str = "storage.bin";

/// Default name of the cross-process lock
pub const DEFAULT_LOCK_NAME: &str = "mapkv-storage";

/// Main configuration for a mapkv server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the memory-mapped storage file
    pub storage_path: PathBuf,

    /// Name of the cross-process lock guarding the storage file
    pub lock_name: String,

    /// Hard ceiling for the mapped segment (in bytes)
    pub max_segment_bytes: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Worker threads for the network reactor (None = hardware concurrency - 1)
    pub worker_threads: Option<usize>,

    /// Disable Nagle's algorithm on accepted sockets
    pub tcp_nodelay: bool,

    // -------------------------------------------------------------------------
    // Stats Configuration
    // -------------------------------------------------------------------------
    /// Seconds between two stats reports
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: Self::default_storage_path(),
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            max_segment_bytes: 1024 * 1024 * 1024, // 1 GiB
            listen_addr: "127.0.0.1:7878".to_string(),
            worker_threads: None,
            tcp_nodelay: true,
            stats_interval_secs: 60,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `storage.bin` beside the running executable, or in the current
    /// directory when the executable path is unknown.
    pub fn default_storage_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_STORAGE_FILENAME)
    }

    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| MapKvError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| MapKvError::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            MapKvError::Config(format!("invalid listen_addr '{}': {}", self.listen_addr, e))
        })?;

        if self.stats_interval_secs == 0 {
            return Err(MapKvError::Config("stats_interval_secs must be > 0".into()));
        }

        if self.worker_threads == Some(0) {
            return Err(MapKvError::Config("worker_threads must be > 0".into()));
        }

        if self.lock_name.is_empty() || self.lock_name.contains('/') {
            return Err(MapKvError::Config(format!(
                "invalid lock_name '{}'",
                self.lock_name
            )));
        }

        let page = crate::storage::page_size() as u64;
        if self.max_segment_bytes < page {
            return Err(MapKvError::Config(format!(
                "max_segment_bytes must be at least one page ({} bytes)",
                page
            )));
        }

        Ok(())
    }

    /// Worker threads for the network reactor: `max(cpus - 1, 1)` unless set
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1).max(1))
    }

    /// Stats report period
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the storage file path
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage_path = path.into();
        self
    }

    /// Set the cross-process lock name
    pub fn lock_name(mut self, name: impl Into<String>) -> Self {
        self.config.lock_name = name.into();
        self
    }

    /// Set the segment size ceiling (in bytes)
    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.config.max_segment_bytes = bytes;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the number of reactor worker threads
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = Some(count);
        self
    }

    /// Enable or disable TCP_NODELAY on accepted sockets
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    /// Set the stats report period (in seconds)
    pub fn stats_interval_secs(mut self, secs: u64) -> Self {
        self.config.stats_interval_secs = secs;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
