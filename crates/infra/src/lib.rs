//! # LeaveSync Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - The SQLite-backed durable execution log
//! - The reqwest-based external tracker client and its failure
//!   classification table
//! - The workflow runtime (instance registry, concurrency caps, retry
//!   scheduling) and the event dispatcher
//! - The configuration loader
//!
//! ## Architecture
//! - Implements traits defined in `leavesync-core`
//! - Contains all "impure" code (I/O, HTTP, SQLite)

pub mod config;
pub mod database;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod tracker;

// Re-export commonly used items
pub use config::EngineConfig;
pub use database::{DbManager, SqliteExecutionLog};
pub use dispatch::{event_channel, DispatcherHandle, EventReceiver, SyncDispatcher};
pub use engine::{RuntimeLimits, WorkflowRuntime};
pub use errors::InfraError;
pub use tracker::{TrackerApiClient, TrackerConfig};
