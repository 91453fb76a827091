//! Inbound and outbound event payloads

use serde::{Deserialize, Serialize};

/// Domain events consumed by the dispatcher.
///
/// Serialized with the event name as tag so the execution log can replay
/// the originating event verbatim after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum SyncEvent {
    CreateSync {
        request_id: String,
        sync_log_id: String,
        integration_id: String,
        /// True when this creation replaces an earlier sync after an edit.
        for_update: bool,
        /// True on the very first sync attempt for the request.
        first_event: bool,
    },
    UpdateSync {
        request_id: String,
        sync_log_id: String,
        integration_id: String,
    },
    DeleteSync {
        sync_log_id: String,
    },
    DeleteIntegration {
        integration_id: String,
        delete_past_syncs: bool,
    },
}

impl SyncEvent {
    /// Short event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSync { .. } => "create-sync",
            Self::UpdateSync { .. } => "update-sync",
            Self::DeleteSync { .. } => "delete-sync",
            Self::DeleteIntegration { .. } => "delete-integration",
        }
    }
}

/// Events emitted towards the notification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum OutboundEvent {
    NotifyInvalidCredential {
        request_id: String,
        integration_name: String,
        already_notified: bool,
    },
}
