//! Leave request types (read-only collaborator entity)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Approval state of a leave request as reported by the request store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Declined,
    Canceled,
}

crate::impl_status_conversions!(ApprovalStatus {
    Pending => "pending",
    Approved => "approved",
    Declined => "declined",
    Canceled => "canceled",
});

impl ApprovalStatus {
    /// Declined and canceled requests are terminal for synchronization.
    pub fn is_withdrawn(self) -> bool {
        matches!(self, Self::Declined | Self::Canceled)
    }

    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Requester working schedule, reduced to what the engine needs: the hour
/// the workday starts in the requester's timezone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkSchedule {
    pub workday_start_hour: u32,
}

impl Default for WorkSchedule {
    fn default() -> Self {
        Self { workday_start_hour: 0 }
    }
}

/// Snapshot of a leave request as read through the request port.
///
/// The engine never writes these; approval changes arrive as new events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaveRequest {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub approval: ApprovalStatus,
    /// IANA timezone name of the requester, e.g. `Europe/Berlin`.
    pub requester_timezone: String,
    pub schedule: WorkSchedule,
    pub leave_type_id: String,
    pub department_id: Option<String>,
    /// External user the requester maps to, when known.
    pub external_user_id: Option<String>,
    /// Free-text note forwarded to the external entry.
    pub note: Option<String>,
}
