//! Domain data types

pub mod engine;
pub mod events;
pub mod request;
pub mod setting;
pub mod sync;
pub mod tracker;

pub use engine::{CorrelationPair, InstanceRecord, StepRecord, StoredOutcome, WorkflowKind};
pub use events::{OutboundEvent, SyncEvent};
pub use request::{ApprovalStatus, LeaveRequest, WorkSchedule};
pub use setting::{ApiCredential, IntegrationSetting};
pub use sync::{SyncRecord, SyncStatus};
pub use tracker::{AuthOutcome, EntryPayload};
