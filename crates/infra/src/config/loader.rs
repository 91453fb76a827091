//! Configuration loader
//!
//! Loads engine configuration from environment variables or a file.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a config file
//! 3. Probes standard paths for config files
//! 4. Supports TOML and JSON formats
//!
//! ## Environment Variables
//! - `LEAVESYNC_DB_PATH`: execution log database path (required)
//! - `LEAVESYNC_TRACKER_BASE_URL`: tracker API base URL (required)
//! - `LEAVESYNC_DB_POOL_SIZE`: connection pool size
//! - `LEAVESYNC_TRACKER_TIMEOUT_SECONDS`: per-request timeout
//! - `LEAVESYNC_RETRY_DELAY_SECONDS`: transient retry delay
//! - `LEAVESYNC_PURGE_GRACE_SECONDS`: grace window before hard-deleting a
//!   purged integration
//! - `LEAVESYNC_MAX_CONCURRENT_CREATE` / `_DELETE` / `_PURGE`: runtime caps

use std::path::{Path, PathBuf};

use leavesync_domain::constants::{
    MAX_CONCURRENT_CREATE, MAX_CONCURRENT_DELETE, MAX_CONCURRENT_PURGE, PURGE_GRACE_WINDOW,
    TRANSIENT_RETRY_DELAY,
};
use leavesync_domain::{LeaveSyncError, Result};
use serde::{Deserialize, Serialize};

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    pub base_url: String,
    #[serde(default = "default_tracker_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_purge_grace")]
    pub purge_grace_seconds: u64,
    #[serde(default = "default_max_create")]
    pub max_concurrent_create: usize,
    #[serde(default = "default_max_delete")]
    pub max_concurrent_delete: usize,
    #[serde(default = "default_max_purge")]
    pub max_concurrent_purge: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            retry_delay_seconds: default_retry_delay(),
            purge_grace_seconds: default_purge_grace(),
            max_concurrent_create: default_max_create(),
            max_concurrent_delete: default_max_delete(),
            max_concurrent_purge: default_max_purge(),
        }
    }
}

fn default_pool_size() -> u32 {
    4
}
fn default_tracker_timeout() -> u64 {
    30
}
fn default_retry_delay() -> u64 {
    TRANSIENT_RETRY_DELAY.as_secs()
}
fn default_purge_grace() -> u64 {
    PURGE_GRACE_WINDOW.as_secs()
}
fn default_max_create() -> usize {
    MAX_CONCURRENT_CREATE
}
fn default_max_delete() -> usize {
    MAX_CONCURRENT_DELETE
}
fn default_max_purge() -> usize {
    MAX_CONCURRENT_PURGE
}

/// Load configuration with automatic fallback strategy.
///
/// First attempts to load from environment variables. If the required
/// variables are missing, falls back to loading from a config file.
pub fn load() -> Result<EngineConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = %e, "environment incomplete, trying config file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `LEAVESYNC_*` environment variables.
pub fn load_from_env() -> Result<EngineConfig> {
    let database = DatabaseConfig {
        path: env_var("LEAVESYNC_DB_PATH")?,
        pool_size: env_parsed("LEAVESYNC_DB_POOL_SIZE", default_pool_size())?,
    };
    let tracker = TrackerSettings {
        base_url: env_var("LEAVESYNC_TRACKER_BASE_URL")?,
        timeout_seconds: env_parsed("LEAVESYNC_TRACKER_TIMEOUT_SECONDS", default_tracker_timeout())?,
    };
    let runtime = RuntimeSettings {
        retry_delay_seconds: env_parsed("LEAVESYNC_RETRY_DELAY_SECONDS", default_retry_delay())?,
        purge_grace_seconds: env_parsed("LEAVESYNC_PURGE_GRACE_SECONDS", default_purge_grace())?,
        max_concurrent_create: env_parsed("LEAVESYNC_MAX_CONCURRENT_CREATE", default_max_create())?,
        max_concurrent_delete: env_parsed("LEAVESYNC_MAX_CONCURRENT_DELETE", default_max_delete())?,
        max_concurrent_purge: env_parsed("LEAVESYNC_MAX_CONCURRENT_PURGE", default_max_purge())?,
    };
    Ok(EngineConfig { database, tracker, runtime })
}

/// Load configuration from a file, probing standard locations when `path`
/// is `None`. Format is detected by extension (`.toml` or `.json`).
pub fn load_from_file(path: Option<PathBuf>) -> Result<EngineConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(LeaveSyncError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            LeaveSyncError::Config("no config file found in any standard location".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| LeaveSyncError::Config(format!("failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<EngineConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| LeaveSyncError::Config(format!("invalid TOML: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| LeaveSyncError::Config(format!("invalid JSON: {e}"))),
        other => Err(LeaveSyncError::Config(format!("unsupported config format: {other}"))),
    }
}

/// Probe the working directory and its parents for a config file.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        for dir in [cwd.clone(), cwd.join(".."), cwd.join("../..")] {
            candidates.push(dir.join("leavesync.toml"));
            candidates.push(dir.join("leavesync.json"));
            candidates.push(dir.join("config.toml"));
        }
    }
    candidates.into_iter().find(|p| p.exists())
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| LeaveSyncError::Config(format!("missing environment variable {name}")))
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| LeaveSyncError::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
