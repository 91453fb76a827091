//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for LeaveSync
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum LeaveSyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for LeaveSync operations
pub type Result<T> = std::result::Result<T, LeaveSyncError>;

/// Classified failure of an external tracker call.
///
/// The HTTP adapter folds every response and transport failure into one of
/// these three classes; workflow bodies decide what each class means for the
/// owning sync record. `Transient` is retried on a fixed delay without an
/// attempt cap, `InvalidCredential` is terminal for the credential,
/// `RateExceeded` is a hard, non-retried failure (see the 500
/// "request rate too large" handling).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("request rate too large: {0}")]
    RateExceeded(String),

    #[error("transient tracker failure: {0}")]
    Transient(String),
}

impl TrackerError {
    /// True when the failure should be retried on the fixed delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
