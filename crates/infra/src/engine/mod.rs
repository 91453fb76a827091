//! Workflow runtime (concurrency governor, cancellation registry, retries).

pub mod runtime;

pub use runtime::{RuntimeLimits, WorkflowRuntime};
