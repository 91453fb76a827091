//! Port interfaces towards collaborators and infrastructure
//!
//! The relational persistence of business entities, notification delivery
//! and the external HTTP surface all live behind these traits; the engine
//! only ever sees the narrow contracts below.

use async_trait::async_trait;
use leavesync_domain::{
    ApiCredential, AuthOutcome, EntryPayload, InstanceRecord, IntegrationSetting, LeaveRequest,
    OutboundEvent, Result, StepRecord, SyncEvent, SyncRecord, TrackerError,
};

/// Read access to leave requests (collaborator-owned, read-only here).
#[async_trait]
pub trait RequestReader: Send + Sync {
    /// Fetch the synchronization view of a request, `None` when unknown.
    async fn request_for_sync(&self, request_id: &str) -> Result<Option<LeaveRequest>>;
}

/// Store of per-request, per-integration sync records.
#[async_trait]
pub trait SyncRecordStore: Send + Sync {
    async fn get(&self, sync_log_id: &str) -> Result<Option<SyncRecord>>;

    async fn create(&self, record: &SyncRecord) -> Result<()>;

    /// Persist the full record; writers validate transitions before calling.
    async fn update(&self, record: &SyncRecord) -> Result<()>;

    /// All records of an integration currently in `Synced` state.
    async fn list_synced_for_integration(&self, integration_id: &str) -> Result<Vec<SyncRecord>>;
}

/// Store of integration settings, including the one-shot notification flag.
#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn get(&self, integration_id: &str) -> Result<Option<IntegrationSetting>>;

    /// Soft-delete: the setting stays readable for in-flight workflows.
    async fn mark_deleted(&self, integration_id: &str) -> Result<()>;

    /// Hard-delete after the purge grace window.
    async fn hard_delete(&self, integration_id: &str) -> Result<()>;

    /// Atomically flip `invalid_credential_notified` from false to true.
    /// Returns true only for the caller that performed the flip, so the
    /// notification fires at most once under concurrent failures.
    async fn try_mark_credential_notified(&self, integration_id: &str) -> Result<bool>;
}

/// Fire-and-forget notification delivery (email/webhook templating is a
/// collaborator concern).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, event: &OutboundEvent) -> Result<()>;
}

/// Outbound channel for follow-up domain events (e.g. the delete fan-out).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: SyncEvent) -> Result<()>;
}

/// Client of the external time-tracking service.
///
/// Implementations classify every failure into [`TrackerError`]; they do not
/// deduplicate calls — create/delete must only run inside memoized steps.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Probe the credential. Credential rejections surface as
    /// `AuthOutcome { valid: false, .. }`, not as errors.
    async fn authenticate(
        &self,
        credential: &ApiCredential,
    ) -> std::result::Result<AuthOutcome, TrackerError>;

    async fn is_user_in_workspace(
        &self,
        credential: &ApiCredential,
        workspace_id: &str,
        external_user_id: &str,
    ) -> std::result::Result<bool, TrackerError>;

    /// Create an entry and return its external id.
    async fn create_entry(
        &self,
        credential: &ApiCredential,
        workspace_id: &str,
        entry: &EntryPayload,
    ) -> std::result::Result<String, TrackerError>;

    async fn delete_entry(
        &self,
        credential: &ApiCredential,
        workspace_id: &str,
        external_item_id: &str,
    ) -> std::result::Result<(), TrackerError>;
}

/// Durable execution log: instance rows plus memoized step outcomes keyed by
/// `(instance_id, step_name)`.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<()>;

    /// Record or clear the instant a parked instance should wake at.
    async fn set_wake_at(&self, instance_id: &str, wake_at: Option<i64>) -> Result<()>;

    async fn mark_done(&self, instance_id: &str) -> Result<()>;

    /// Instances not yet done, in creation order; recovery re-dispatches
    /// their originating events after a restart.
    async fn live_instances(&self) -> Result<Vec<InstanceRecord>>;

    async fn get_step(&self, instance_id: &str, step_name: &str) -> Result<Option<StepRecord>>;

    async fn put_step(&self, step: &StepRecord) -> Result<()>;
}
