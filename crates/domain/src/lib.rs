//! # LeaveSync Domain
//!
//! Business domain types and models for LeaveSync.
//!
//! This crate contains:
//! - Domain data types (SyncRecord, IntegrationSetting, LeaveRequest, ...)
//! - Inbound and outbound event payloads
//! - Durable execution log row types
//! - Domain error types and Result definitions
//! - Policy constants
//!
//! ## Architecture
//! - No dependencies on other LeaveSync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
