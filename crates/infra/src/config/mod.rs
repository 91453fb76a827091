//! Engine configuration (env first, file fallback).

pub mod loader;

use std::time::Duration;

pub use loader::{
    load, load_from_env, load_from_file, DatabaseConfig, EngineConfig, RuntimeSettings,
    TrackerSettings,
};

use leavesync_core::RetryPolicy;

use crate::engine::RuntimeLimits;
use crate::tracker::TrackerConfig;

impl EngineConfig {
    pub fn runtime_limits(&self) -> RuntimeLimits {
        RuntimeLimits {
            max_concurrent_create: self.runtime.max_concurrent_create,
            max_concurrent_delete: self.runtime.max_concurrent_delete,
            max_concurrent_purge: self.runtime.max_concurrent_purge,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { delay: Duration::from_secs(self.runtime.retry_delay_seconds) }
    }

    pub fn purge_grace(&self) -> Duration {
        Duration::from_secs(self.runtime.purge_grace_seconds)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            base_url: self.tracker.base_url.clone(),
            timeout: Duration::from_secs(self.tracker.timeout_seconds),
        }
    }
}
