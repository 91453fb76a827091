//! # LeaveSync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) towards stores, the external tracker
//!   and the notification collaborator
//! - The durable step-execution context workflow bodies run against
//! - The three workflow bodies (create-sync, delete-sync, purge)
//! - Error classification and the sync record state-machine writer
//!
//! ## Architecture Principles
//! - Only depends on `leavesync-domain`
//! - No database or HTTP code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod classify;
pub mod notify;
pub mod ports;
pub mod records;
pub mod workflow;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export specific items to avoid ambiguity
pub use classify::{classify_tracker_error, FailureAction};
pub use notify::CredentialGate;
pub use ports::{
    EventSink, ExecutionLog, NotificationSender, RequestReader, SettingStore, SyncRecordStore,
    TrackerClient,
};
pub use records::SyncRecordWriter;
pub use workflow::context::{RetryPolicy, StepContext};
pub use workflow::create_sync::{CreateSyncInput, CreateSyncWorkflow};
pub use workflow::delete_integration::{DeleteIntegrationInput, DeleteIntegrationWorkflow};
pub use workflow::delete_sync::{DeleteSyncInput, DeleteSyncWorkflow};
pub use workflow::{StepError, WorkflowError, WorkflowOutcome};
