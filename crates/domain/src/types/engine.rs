//! Durable execution log row types
//!
//! The engine persists two kinds of rows: one per workflow instance (the
//! originating event, correlation pairs for cancellation matching, and the
//! wake-up instant while parked) and one per completed step keyed by
//! `(instance_id, step_name)`. Together they make suspension and replay
//! survive process restarts.

use serde::{Deserialize, Serialize};

/// Class of a workflow instance, used for concurrency capping and recovery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    CreateSync,
    DeleteSync,
    PurgeIntegration,
}

crate::impl_status_conversions!(WorkflowKind {
    CreateSync => "create-sync",
    DeleteSync => "delete-sync",
    PurgeIntegration => "purge-integration",
});

/// One `(field, value)` pair a cancellation event can be matched against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationPair {
    pub field: String,
    pub value: String,
}

impl CorrelationPair {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self { field: field.into(), value: value.into() }
    }
}

/// Persisted workflow instance row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    /// Unique per run; a re-triggered sync gets a fresh id so old memoized
    /// steps never leak into the new run.
    pub id: String,
    pub kind: WorkflowKind,
    /// Originating event, serialized; re-dispatched verbatim on recovery.
    pub event_json: String,
    /// Correlation pairs, serialized as a JSON array.
    pub correlation_json: String,
    /// Epoch seconds of the next wake-up while parked; `None` when running.
    pub wake_at: Option<i64>,
    pub done: bool,
    pub created_at: i64,
}

/// Memoized outcome of one named step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoredOutcome {
    /// Step succeeded; the JSON value is handed back on replay.
    Ok(serde_json::Value),
    /// Step failed terminally; replay returns the same failure.
    Fatal(String),
}

/// Persisted step row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub instance_id: String,
    pub step_name: String,
    /// Serialized [`StoredOutcome`].
    pub outcome_json: String,
    pub recorded_at: i64,
}
