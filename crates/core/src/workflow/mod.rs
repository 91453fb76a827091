//! Workflow bodies and the durable execution contract
//!
//! Every workflow is a plain async function over ports plus a
//! [`context::StepContext`]. Steps are named and memoized; a replayed
//! instance skips steps whose outcome is already in the execution log, which
//! is what makes external side effects idempotent under replay.

pub mod context;
pub mod create_sync;
pub mod delete_integration;
pub mod delete_sync;
pub mod timing;

use std::time::Duration;

use thiserror::Error;

/// Failure of a single step, as raised inside a step future.
#[derive(Debug, Error)]
pub enum StepError {
    /// Transient failure; the runtime re-enters the workflow after the
    /// policy delay. Never memoized.
    #[error("retryable step failure: {reason}")]
    Retry { reason: String },

    /// Terminal failure; memoized and replayed as terminal.
    #[error("fatal step failure: {0}")]
    Fatal(String),
}

/// Failure of a workflow instance, as seen by the runtime.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Park the instance and re-enter the whole body after `delay`.
    #[error("retry in {delay:?}: {reason}")]
    RetryAfter { delay: Duration, reason: String },

    /// Park the instance until the wall-clock instant. Raised by durable
    /// sleeps; the runtime releases the instance's execution permit while it
    /// is parked and re-enters the body once the instant has passed.
    #[error("suspended until {wake_at}")]
    Suspended { wake_at: i64 },

    /// The instance was torn down by a matching cancellation. Not an error
    /// condition; no record is failed on this path.
    #[error("workflow canceled")]
    Canceled,

    /// Abort without retry. Callers persist a Failed record first wherever
    /// one exists.
    #[error("workflow aborted: {0}")]
    Fatal(String),
}

/// Terminal outcome of a completed workflow instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// External entry created; record is Synced.
    Synced { external_id: String },
    /// Request not approved yet; record untouched, a later event re-triggers.
    Waiting,
    /// Out of scope for this integration; record untouched.
    Skipped { reason: String },
    /// Terminal failure persisted on the record.
    Failed { reason: String },
    /// External entry deleted; record is Removed.
    Removed,
    /// Credential died before the delete ran; record is MustBeDeleted.
    MarkedForDeletion,
    /// Integration purged after the grace window.
    Purged { fanned_out: usize },
}
