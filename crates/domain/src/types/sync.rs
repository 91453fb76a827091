//! Sync record types and the status state machine

use serde::{Deserialize, Serialize};

use crate::types::setting::ApiCredential;

/// Synchronization state of one request against one integration.
///
/// `Pending` is the only initial state. Transitions are validated by
/// [`SyncStatus::can_transition`]; writers must refuse anything else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
    MustBeDeleted,
    Removed,
}

crate::impl_status_conversions!(SyncStatus {
    Pending => "pending",
    Synced => "synced",
    Failed => "failed",
    MustBeDeleted => "must_be_deleted",
    Removed => "removed",
});

impl SyncStatus {
    /// Whether moving from `self` to `next` is a legal state-machine edge.
    ///
    /// A terminal `Synced` is never demoted back to `Pending`; re-syncs run
    /// as brand-new workflow instances instead. Writing the current status
    /// again is allowed so replayed steps stay idempotent.
    pub fn can_transition(self, next: SyncStatus) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Synced)
                | (Self::Pending, Self::Failed)
                | (Self::Synced, Self::Failed)
                | (Self::Synced, Self::MustBeDeleted)
                | (Self::Synced, Self::Removed)
        )
    }
}

/// Persisted status of one request's synchronization with one external
/// integration. One row per request x integration; never deleted by the
/// workflow itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRecord {
    /// Sync log id (`sync_log_id` in events).
    pub id: String,
    /// Owning leave request.
    pub request_id: String,
    /// Integration setting this record mirrors into.
    pub integration_id: String,
    /// External item id; `None` until the first successful creation.
    pub external_item_id: Option<String>,
    pub status: SyncStatus,
    /// Last error text, kept across retries for operator visibility.
    pub last_error: Option<String>,
    /// Last-known credential snapshot, used by deletion workflows that may
    /// outlive the integration setting.
    pub credential: ApiCredential,
    /// External workspace the entry lives in.
    pub external_workspace_id: String,
    /// External user the entry is booked against, when mapped.
    pub external_user_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
