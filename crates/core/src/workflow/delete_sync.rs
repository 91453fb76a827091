//! Deletion workflow: remove a synced entry from the external tracker
//!
//! Runs against the credential snapshot stored on the sync record, not the
//! live setting; the integration may already be soft-deleted by the time the
//! delete executes. A credential that died before the delete leaves the
//! record in MustBeDeleted for a later manual or fan-out sweep.

use std::sync::Arc;

use leavesync_domain::constants::ERR_CANCELED_OR_DECLINED;
use leavesync_domain::{LeaveSyncError, SyncRecord, SyncStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::classify::{tracker_step, TrackerCall};
use crate::ports::{SyncRecordStore, TrackerClient};
use crate::records::SyncRecordWriter;
use crate::workflow::context::StepContext;
use crate::workflow::{WorkflowError, WorkflowOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSyncInput {
    pub sync_log_id: String,
}

pub struct DeleteSyncWorkflow {
    records: Arc<dyn SyncRecordStore>,
    tracker: Arc<dyn TrackerClient>,
    writer: SyncRecordWriter,
}

impl DeleteSyncWorkflow {
    pub fn new(
        records: Arc<dyn SyncRecordStore>,
        tracker: Arc<dyn TrackerClient>,
        writer: SyncRecordWriter,
    ) -> Self {
        Self { records, tracker, writer }
    }

    #[instrument(
        skip(self, ctx, input),
        fields(instance = %ctx.instance_id(), sync_log_id = %input.sync_log_id)
    )]
    pub async fn run(
        &self,
        ctx: &StepContext,
        input: &DeleteSyncInput,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let mut record = self
            .records
            .get(&input.sync_log_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| {
                WorkflowError::Fatal(format!("unknown sync record {}", input.sync_log_id))
            })?;

        if record.status == SyncStatus::Removed {
            return Ok(WorkflowOutcome::Removed);
        }

        // Nothing was ever created externally; close the record out without
        // touching the tracker.
        let Some(external_item_id) = record.external_item_id.clone() else {
            self.writer
                .fail(&mut record, SyncStatus::Failed, ERR_CANCELED_OR_DECLINED)
                .await
                .map_err(storage_failure)?;
            return Ok(WorkflowOutcome::Failed { reason: ERR_CANCELED_OR_DECLINED.into() });
        };

        let auth = {
            let tracker = self.tracker.clone();
            let credential = record.credential.clone();
            ctx.run_step("authenticate", async move {
                tracker_step(tracker.authenticate(&credential).await)
            })
            .await
        };
        let auth = match self.settle(&mut record, auth).await? {
            TrackerCall::Done(outcome) => outcome,
            TrackerCall::CredentialFailure(reason) => {
                return self.mark_for_deletion(&mut record, &reason).await;
            }
        };
        if !auth.valid || !auth.workspace_ids.contains(&record.external_workspace_id) {
            return self.mark_for_deletion(&mut record, "credential rejected by tracker").await;
        }

        let deleted = {
            let tracker = self.tracker.clone();
            let credential = record.credential.clone();
            let workspace_id = record.external_workspace_id.clone();
            let item_id = external_item_id.clone();
            ctx.run_step("delete-entry", async move {
                tracker_step(tracker.delete_entry(&credential, &workspace_id, &item_id).await)
            })
            .await
        };
        match self.settle(&mut record, deleted).await? {
            TrackerCall::Done(()) => {}
            TrackerCall::CredentialFailure(reason) => {
                return self.mark_for_deletion(&mut record, &reason).await;
            }
        }

        self.writer.mark_removed(&mut record).await.map_err(storage_failure)?;
        info!(external_item_id = %external_item_id, "entry removed from external tracker");
        Ok(WorkflowOutcome::Removed)
    }

    async fn settle<T>(
        &self,
        record: &mut SyncRecord,
        step: Result<TrackerCall<T>, WorkflowError>,
    ) -> Result<TrackerCall<T>, WorkflowError> {
        match step {
            Ok(call) => Ok(call),
            Err(WorkflowError::RetryAfter { delay, reason }) => {
                self.writer.note_retry(record, &reason).await.map_err(storage_failure)?;
                Err(WorkflowError::RetryAfter { delay, reason })
            }
            Err(WorkflowError::Fatal(message)) => {
                self.writer
                    .fail(record, SyncStatus::Failed, &message)
                    .await
                    .map_err(storage_failure)?;
                Err(WorkflowError::Fatal(message))
            }
            Err(other) => Err(other),
        }
    }

    /// The entry still exists externally but the credential can no longer
    /// remove it. No notification fires on the delete path.
    async fn mark_for_deletion(
        &self,
        record: &mut SyncRecord,
        reason: &str,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        warn!(
            sync_log_id = %record.id,
            reason = %reason,
            "credential failure during delete, marking record"
        );
        self.writer
            .fail(record, SyncStatus::MustBeDeleted, reason)
            .await
            .map_err(storage_failure)?;
        Ok(WorkflowOutcome::MarkedForDeletion)
    }
}

fn storage_failure(err: LeaveSyncError) -> WorkflowError {
    WorkflowError::Fatal(format!("storage failure: {err}"))
}
