//! Creation workflow: one instance per (request, integration) pair
//!
//! The body is re-entered from the top on every retry and after every
//! restart; all external side effects sit inside memoized steps, so replay
//! never repeats a create against the tracker.

use std::sync::Arc;

use leavesync_domain::constants::ERR_CANCELED_OR_DECLINED;
use leavesync_domain::{
    EntryPayload, IntegrationSetting, LeaveRequest, LeaveSyncError, SyncRecord, SyncStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::classify::{tracker_step, TrackerCall};
use crate::notify::CredentialGate;
use crate::ports::{RequestReader, SettingStore, SyncRecordStore, TrackerClient};
use crate::records::SyncRecordWriter;
use crate::workflow::context::StepContext;
use crate::workflow::timing::{effective_start, entry_window};
use crate::workflow::{WorkflowError, WorkflowOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSyncInput {
    pub request_id: String,
    pub sync_log_id: String,
    pub integration_id: String,
    /// True when this instance replaces an earlier one for the same record.
    pub for_update: bool,
    /// True on the very first event for the record.
    pub first_event: bool,
}

pub struct CreateSyncWorkflow {
    requests: Arc<dyn RequestReader>,
    records: Arc<dyn SyncRecordStore>,
    settings: Arc<dyn SettingStore>,
    tracker: Arc<dyn TrackerClient>,
    writer: SyncRecordWriter,
    gate: CredentialGate,
}

impl CreateSyncWorkflow {
    pub fn new(
        requests: Arc<dyn RequestReader>,
        records: Arc<dyn SyncRecordStore>,
        settings: Arc<dyn SettingStore>,
        tracker: Arc<dyn TrackerClient>,
        writer: SyncRecordWriter,
        gate: CredentialGate,
    ) -> Self {
        Self { requests, records, settings, tracker, writer, gate }
    }

    #[instrument(
        skip(self, ctx, input),
        fields(
            instance = %ctx.instance_id(),
            sync_log_id = %input.sync_log_id,
            integration_id = %input.integration_id,
        )
    )]
    pub async fn run(
        &self,
        ctx: &StepContext,
        input: &CreateSyncInput,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let mut record = self
            .records
            .get(&input.sync_log_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| {
                WorkflowError::Fatal(format!("unknown sync record {}", input.sync_log_id))
            })?;

        let setting = self
            .settings
            .get(&input.integration_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| {
                WorkflowError::Fatal(format!("unknown integration {}", input.integration_id))
            })?;
        if setting.deleted {
            return self.terminal_failure(&mut record, "integration has been deleted").await;
        }

        let Some(request) =
            self.requests.request_for_sync(&input.request_id).await.map_err(storage_failure)?
        else {
            return self
                .terminal_failure(&mut record, &format!("leave request {} missing", input.request_id))
                .await;
        };

        if !setting.in_scope(&request.leave_type_id, request.department_id.as_deref()) {
            info!(leave_type = %request.leave_type_id, "request out of integration scope");
            return Ok(WorkflowOutcome::Skipped {
                reason: format!("leave type {} out of scope", request.leave_type_id),
            });
        }

        let start = match effective_start(&request) {
            Ok(start) => start,
            Err(reason) => return self.terminal_failure(&mut record, &reason).await,
        };
        ctx.sleep_until("wait-for-start", start).await?;

        // The request may have changed while the instance was parked; decide
        // on a snapshot taken after the start instant.
        let snapshot: LeaveRequest = {
            let requests = self.requests.clone();
            let request_id = input.request_id.clone();
            ctx.run_step("snapshot-request", async move {
                requests
                    .request_for_sync(&request_id)
                    .await
                    .map_err(step_storage)?
                    .ok_or_else(|| {
                        crate::workflow::StepError::Fatal(format!(
                            "leave request {request_id} disappeared"
                        ))
                    })
            })
            .await
        }?;

        if snapshot.approval.is_withdrawn() {
            return self.terminal_failure(&mut record, ERR_CANCELED_OR_DECLINED).await;
        }
        if !snapshot.approval.is_approved() {
            info!(approval = %snapshot.approval, "request not approved yet, leaving record pending");
            return Ok(WorkflowOutcome::Waiting);
        }

        let auth = {
            let tracker = self.tracker.clone();
            let credential = setting.credential.clone();
            ctx.run_step("authenticate", async move {
                tracker_step(tracker.authenticate(&credential).await)
            })
            .await
        };
        let auth = match self.settle(&mut record, auth).await? {
            TrackerCall::Done(outcome) => outcome,
            TrackerCall::CredentialFailure(reason) => {
                return self.credential_failure(&mut record, &setting, input, &reason).await;
            }
        };
        if !auth.valid || !auth.workspace_ids.contains(&setting.workspace_id) {
            let reason = if auth.valid {
                format!("credential has no access to workspace {}", setting.workspace_id)
            } else {
                "credential rejected by tracker".to_string()
            };
            return self.credential_failure(&mut record, &setting, input, &reason).await;
        }

        let Some(external_user_id) =
            snapshot.external_user_id.clone().or_else(|| record.external_user_id.clone())
        else {
            return self
                .terminal_failure(&mut record, "no external user mapped for requester")
                .await;
        };

        let membership = {
            let tracker = self.tracker.clone();
            let credential = setting.credential.clone();
            let workspace_id = setting.workspace_id.clone();
            let user_id = external_user_id.clone();
            ctx.run_step("verify-membership", async move {
                tracker_step(tracker.is_user_in_workspace(&credential, &workspace_id, &user_id).await)
            })
            .await
        };
        match self.settle(&mut record, membership).await? {
            TrackerCall::Done(true) => {}
            TrackerCall::Done(false) => {
                return self
                    .terminal_failure(&mut record, "assigned user not found in external workspace")
                    .await;
            }
            TrackerCall::CredentialFailure(reason) => {
                return self.credential_failure(&mut record, &setting, input, &reason).await;
            }
        }

        let (window_start, window_end) = match entry_window(&snapshot) {
            Ok(window) => window,
            Err(reason) => return self.terminal_failure(&mut record, &reason).await,
        };
        let payload = EntryPayload {
            user_id: external_user_id.clone(),
            start: window_start,
            end: window_end,
            note: snapshot.note.clone(),
        };

        let created = {
            let tracker = self.tracker.clone();
            let credential = setting.credential.clone();
            let workspace_id = setting.workspace_id.clone();
            ctx.run_step("create-entry", async move {
                tracker_step(tracker.create_entry(&credential, &workspace_id, &payload).await)
            })
            .await
        };
        let external_id = match self.settle(&mut record, created).await? {
            TrackerCall::Done(id) => id,
            TrackerCall::CredentialFailure(reason) => {
                return self.credential_failure(&mut record, &setting, input, &reason).await;
            }
        };

        record.external_user_id = Some(external_user_id);
        self.writer.mark_synced(&mut record, &external_id).await.map_err(storage_failure)?;
        info!(external_id = %external_id, "entry created in external tracker");
        Ok(WorkflowOutcome::Synced { external_id })
    }

    /// Resolve a tracker step: transient failures leave a retry note on the
    /// record before the instance parks, terminal step failures persist a
    /// Failed record before aborting.
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

    async fn terminal_failure(
        &self,
        record: &mut SyncRecord,
        reason: &str,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        warn!(sync_log_id = %record.id, reason = %reason, "sync failed terminally");
        self.writer.fail(record, SyncStatus::Failed, reason).await.map_err(storage_failure)?;
        Ok(WorkflowOutcome::Failed { reason: reason.to_string() })
    }

    async fn credential_failure(
        &self,
        record: &mut SyncRecord,
        setting: &IntegrationSetting,
        input: &CreateSyncInput,
        reason: &str,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        warn!(
            sync_log_id = %record.id,
            integration_id = %setting.id,
            reason = %reason,
            "credential failure, not retrying"
        );
        self.writer.fail(record, SyncStatus::Failed, reason).await.map_err(storage_failure)?;
        self.gate
            .notify_invalid_credential(setting, &input.request_id)
            .await
            .map_err(storage_failure)?;
        Ok(WorkflowOutcome::Failed { reason: reason.to_string() })
    }
}

fn storage_failure(err: LeaveSyncError) -> WorkflowError {
    WorkflowError::Fatal(format!("storage failure: {err}"))
}

fn step_storage(err: LeaveSyncError) -> crate::workflow::StepError {
    // Storage hiccups on reads are retried like any transient failure.
    crate::workflow::StepError::Retry { reason: format!("storage failure: {err}") }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use leavesync_domain::{
        ApprovalStatus, AuthOutcome, OutboundEvent, SyncStatus, TrackerError,
    };
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::ports::ExecutionLog;
    use crate::testing::{
        sample_instance, sample_record, sample_request, sample_setting, CapturingNotifier,
        InMemoryExecutionLog, InMemoryRequestReader, InMemorySettingStore, InMemorySyncRecordStore,
        ScriptedTracker,
    };
    use crate::workflow::context::RetryPolicy;

    struct Fixture {
        workflow: CreateSyncWorkflow,
        log: Arc<InMemoryExecutionLog>,
        records: Arc<InMemorySyncRecordStore>,
        requests: Arc<InMemoryRequestReader>,
        settings: Arc<InMemorySettingStore>,
        tracker: Arc<ScriptedTracker>,
        notifier: Arc<CapturingNotifier>,
    }

    async fn fixture() -> Fixture {
        let log = Arc::new(InMemoryExecutionLog::new());
        let records = Arc::new(InMemorySyncRecordStore::new());
        let requests = Arc::new(InMemoryRequestReader::new());
        let settings = Arc::new(InMemorySettingStore::new());
        let tracker = ScriptedTracker::new();
        let notifier = Arc::new(CapturingNotifier::new());

        records.insert(sample_record("log-1", SyncStatus::Pending)).await;
        settings.insert(sample_setting("int-1")).await;
        // Start in the past so the start timer elapses immediately.
        requests.insert(sample_request("req-1", NaiveDate::from_ymd_opt(2020, 1, 6).unwrap())).await;

        let workflow = CreateSyncWorkflow::new(
            requests.clone(),
            records.clone(),
            settings.clone(),
            tracker.clone(),
            SyncRecordWriter::new(records.clone()),
            CredentialGate::new(settings.clone(), notifier.clone()),
        );
        Fixture { workflow, log, records, requests, settings, tracker, notifier }
    }

    fn input() -> CreateSyncInput {
        CreateSyncInput {
            request_id: "req-1".into(),
            sync_log_id: "log-1".into(),
            integration_id: "int-1".into(),
            for_update: false,
            first_event: true,
        }
    }

    fn context(f: &Fixture) -> StepContext {
        StepContext::new("inst-1", f.log.clone(), CancellationToken::new(), RetryPolicy::default())
    }

    #[tokio::test]
    async fn approved_request_ends_up_synced() {
        let f = fixture().await;
        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();

        assert_eq!(outcome, WorkflowOutcome::Synced { external_id: "ext-1".into() });
        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Synced);
        assert_eq!(stored.external_item_id.as_deref(), Some("ext-1"));
        assert_eq!(stored.last_error, None);
        assert_eq!(f.tracker.create_calls(), 1);
    }

    #[tokio::test]
    async fn replay_after_success_does_not_call_the_tracker_again() {
        let f = fixture().await;
        f.workflow.run(&context(&f), &input()).await.unwrap();

        // Same instance id: simulates crash recovery re-entering the body.
        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert_eq!(outcome, WorkflowOutcome::Synced { external_id: "ext-1".into() });
        assert_eq!(f.tracker.create_calls(), 1, "create must not repeat");
        assert_eq!(f.tracker.auth_calls(), 1, "auth must replay from the log");
    }

    #[tokio::test]
    async fn withdrawn_request_fails_with_the_canonical_error() {
        let f = fixture().await;
        let mut request = sample_request("req-1", NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
        request.approval = ApprovalStatus::Canceled;
        f.requests.insert(request).await;

        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert_eq!(outcome, WorkflowOutcome::Failed { reason: ERR_CANCELED_OR_DECLINED.into() });
        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some(ERR_CANCELED_OR_DECLINED));
        assert_eq!(f.tracker.total_calls(), 0);
    }

    #[tokio::test]
    async fn unapproved_request_waits_without_touching_the_record() {
        let f = fixture().await;
        let mut request = sample_request("req-1", NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
        request.approval = ApprovalStatus::Pending;
        f.requests.insert(request).await;

        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert_eq!(outcome, WorkflowOutcome::Waiting);
        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn out_of_scope_leave_type_is_skipped() {
        let f = fixture().await;
        let mut setting = sample_setting("int-1");
        setting.leave_type_ids = vec!["sick".into()];
        f.settings.insert(setting).await;

        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Skipped { .. }));
        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Pending, "record stays pending");
        assert_eq!(f.tracker.total_calls(), 0);
    }

    #[tokio::test]
    async fn future_start_suspends_without_external_calls() {
        let f = fixture().await;
        f.log.insert_instance(&sample_instance("inst-1")).await.unwrap();
        let start = chrono::Utc::now().date_naive() + chrono::Duration::days(4);
        let request = sample_request("req-1", start);
        f.requests.insert(request.clone()).await;

        let err = f.workflow.run(&context(&f), &input()).await.unwrap_err();
        let expected = effective_start(&request).unwrap().timestamp();
        assert!(matches!(err, WorkflowError::Suspended { wake_at } if wake_at == expected));
        assert_eq!(f.log.wake_at("inst-1").await, Some(expected));
        assert_eq!(f.tracker.total_calls(), 0, "no external call before the start instant");

        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Pending, "record untouched while suspended");
    }

    #[tokio::test]
    async fn rejected_credential_fails_and_notifies_once() {
        let f = fixture().await;
        f.tracker.push_auth(Ok(AuthOutcome::invalid())).await;

        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));

        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(f.tracker.create_calls(), 0);

        let sent = f.notifier.events().await;
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], OutboundEvent::NotifyInvalidCredential { .. }));
    }

    #[tokio::test]
    async fn workspace_mismatch_is_a_credential_failure() {
        let f = fixture().await;
        f.tracker
            .push_auth(Ok(AuthOutcome { valid: true, workspace_ids: vec!["other-ws".into()] }))
            .await;

        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));
        assert_eq!(f.notifier.events().await.len(), 1);
    }

    #[tokio::test]
    async fn transient_create_failure_retries_and_then_succeeds() {
        let f = fixture().await;
        f.tracker.push_create(Err(TrackerError::Transient("503 from tracker".into()))).await;

        let ctx = context(&f);
        let err = f.workflow.run(&ctx, &input()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::RetryAfter { .. }));

        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Pending, "transient failures never fail the record");
        assert_eq!(stored.last_error.as_deref(), Some("503 from tracker"));

        // Re-entry replays auth and membership from the log and only
        // re-executes the failed step.
        let outcome = f.workflow.run(&ctx, &input()).await.unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Synced { .. }));
        assert_eq!(f.tracker.auth_calls(), 1);
        assert_eq!(f.tracker.create_calls(), 2);
    }

    #[tokio::test]
    async fn rate_exceeded_fails_hard_without_retry() {
        let f = fixture().await;
        f.tracker
            .push_create(Err(TrackerError::RateExceeded("request rate too large".into())))
            .await;

        let err = f.workflow.run(&context(&f), &input()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Fatal(ref m) if m == "request rate too large"));

        let stored = f.records.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("request rate too large"));
    }

    #[tokio::test]
    async fn missing_external_user_mapping_fails_terminally() {
        let f = fixture().await;
        let mut request = sample_request("req-1", NaiveDate::from_ymd_opt(2020, 1, 6).unwrap());
        request.external_user_id = None;
        f.requests.insert(request).await;
        let mut record = sample_record("log-1", SyncStatus::Pending);
        record.external_user_id = None;
        f.records.insert(record).await;

        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));
        assert_eq!(f.tracker.create_calls(), 0);
    }

    #[tokio::test]
    async fn deleted_integration_fails_the_record() {
        let f = fixture().await;
        let mut setting = sample_setting("int-1");
        setting.deleted = true;
        f.settings.insert(setting).await;

        let outcome = f.workflow.run(&context(&f), &input()).await.unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Failed { .. }));
        assert_eq!(f.tracker.total_calls(), 0);
    }
}
