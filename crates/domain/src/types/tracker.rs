//! External tracker call payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of an authentication probe against the external tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthOutcome {
    /// False when the tracker rejected the credential (401 or an invalid
    /// token response). Not a retryable condition.
    pub valid: bool,
    /// Workspaces the credential can act on; empty when invalid.
    pub workspace_ids: Vec<String>,
}

impl AuthOutcome {
    pub fn invalid() -> Self {
        Self { valid: false, workspace_ids: Vec::new() }
    }
}

/// Payload of one external time-off entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryPayload {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}
