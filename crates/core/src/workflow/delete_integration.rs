//! Integration teardown: soft-delete, fan out deletes, purge after grace
//!
//! The setting is soft-deleted first so no new creation workflow picks it
//! up, then one delete event is published per synced record, and the setting
//! row itself is purged only after a grace window so the fanned-out deletes
//! can still read the credential snapshot they carry.

use std::sync::Arc;
use std::time::Duration;

use leavesync_domain::constants::PURGE_GRACE_WINDOW;
use leavesync_domain::{LeaveSyncError, SyncEvent};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::ports::{EventSink, SettingStore, SyncRecordStore};
use crate::workflow::context::StepContext;
use crate::workflow::{StepError, WorkflowError, WorkflowOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteIntegrationInput {
    pub integration_id: String,
    /// When true, every synced record of the integration gets a delete event.
    pub delete_past_syncs: bool,
}

pub struct DeleteIntegrationWorkflow {
    settings: Arc<dyn SettingStore>,
    records: Arc<dyn SyncRecordStore>,
    sink: Arc<dyn EventSink>,
    grace: Duration,
}

impl DeleteIntegrationWorkflow {
    pub fn new(
        settings: Arc<dyn SettingStore>,
        records: Arc<dyn SyncRecordStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self { settings, records, sink, grace: PURGE_GRACE_WINDOW }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[instrument(
        skip(self, ctx, input),
        fields(instance = %ctx.instance_id(), integration_id = %input.integration_id)
    )]
    pub async fn run(
        &self,
        ctx: &StepContext,
        input: &DeleteIntegrationInput,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        {
            let settings = self.settings.clone();
            let integration_id = input.integration_id.clone();
            ctx.run_step("soft-delete-setting", async move {
                settings.mark_deleted(&integration_id).await.map_err(step_storage)
            })
            .await?;
        }

        let fanned_out = if input.delete_past_syncs {
            let records = self.records.clone();
            let sink = self.sink.clone();
            let integration_id = input.integration_id.clone();
            ctx.run_step("fanout-deletes", async move {
                let synced =
                    records.list_synced_for_integration(&integration_id).await.map_err(step_storage)?;
                for record in &synced {
                    sink.publish(SyncEvent::DeleteSync { sync_log_id: record.id.clone() })
                        .await
                        .map_err(step_storage)?;
                }
                Ok::<_, StepError>(synced.len())
            })
            .await?
        } else {
            0
        };

        ctx.sleep("purge-grace", self.grace).await?;

        {
            let settings = self.settings.clone();
            let integration_id = input.integration_id.clone();
            ctx.run_step("purge-setting", async move {
                settings.hard_delete(&integration_id).await.map_err(step_storage)
            })
            .await?;
        }

        info!(fanned_out, "integration purged");
        Ok(WorkflowOutcome::Purged { fanned_out })
    }
}

fn step_storage(err: LeaveSyncError) -> StepError {
    match err {
        LeaveSyncError::NotFound(what) => StepError::Fatal(format!("{what} not found")),
        other => StepError::Retry { reason: format!("storage failure: {other}") },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leavesync_domain::{SyncEvent, SyncStatus};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::ports::ExecutionLog;
    use crate::testing::{
        sample_instance, sample_record, sample_setting, CapturingSink, InMemoryExecutionLog,
        InMemorySettingStore, InMemorySyncRecordStore,
    };
    use crate::workflow::context::RetryPolicy;

    struct Fixture {
        workflow: DeleteIntegrationWorkflow,
        log: Arc<InMemoryExecutionLog>,
        settings: Arc<InMemorySettingStore>,
        records: Arc<InMemorySyncRecordStore>,
        sink: Arc<CapturingSink>,
    }

    async fn fixture(grace: Duration) -> Fixture {
        let log = Arc::new(InMemoryExecutionLog::new());
        let settings = Arc::new(InMemorySettingStore::new());
        let records = Arc::new(InMemorySyncRecordStore::new());
        let sink = Arc::new(CapturingSink::new());

        settings.insert(sample_setting("int-1")).await;
        records.insert(sample_record("log-1", SyncStatus::Synced)).await;
        records.insert(sample_record("log-2", SyncStatus::Synced)).await;
        records.insert(sample_record("log-3", SyncStatus::Failed)).await;

        let workflow =
            DeleteIntegrationWorkflow::new(settings.clone(), records.clone(), sink.clone())
                .with_grace(grace);
        Fixture { workflow, log, settings, records, sink }
    }

    fn input(delete_past_syncs: bool) -> DeleteIntegrationInput {
        DeleteIntegrationInput { integration_id: "int-1".into(), delete_past_syncs }
    }

    fn context(f: &Fixture) -> StepContext {
        StepContext::new("inst-1", f.log.clone(), CancellationToken::new(), RetryPolicy::default())
    }

    #[tokio::test]
    async fn purge_fans_out_one_delete_per_synced_record() {
        let f = fixture(Duration::ZERO).await;
        let outcome = f.workflow.run(&context(&f), &input(true)).await.unwrap();

        assert_eq!(outcome, WorkflowOutcome::Purged { fanned_out: 2 });
        let events = f.sink.events().await;
        assert_eq!(events.len(), 2, "failed records get no delete event");
        assert!(events.iter().all(|e| matches!(e, SyncEvent::DeleteSync { .. })));
        assert!(f.settings.get_setting("int-1").await.is_none(), "setting purged");
    }

    #[tokio::test]
    async fn purge_without_fanout_publishes_nothing() {
        let f = fixture(Duration::ZERO).await;
        let outcome = f.workflow.run(&context(&f), &input(false)).await.unwrap();

        assert_eq!(outcome, WorkflowOutcome::Purged { fanned_out: 0 });
        assert!(f.sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn replay_does_not_fan_out_twice() {
        let f = fixture(Duration::ZERO).await;
        f.workflow.run(&context(&f), &input(true)).await.unwrap();

        // Hard delete memoized; re-seed the setting to prove nothing reruns.
        f.settings.insert(sample_setting("int-1")).await;
        let outcome = f.workflow.run(&context(&f), &input(true)).await.unwrap();
        assert_eq!(outcome, WorkflowOutcome::Purged { fanned_out: 2 });
        assert_eq!(f.sink.events().await.len(), 2);
        assert!(f.settings.get_setting("int-1").await.is_some(), "purge step replayed, not rerun");
    }

    #[tokio::test]
    async fn setting_is_soft_deleted_during_the_grace_window() {
        let f = fixture(Duration::from_secs(24 * 60 * 60)).await;
        f.log.insert_instance(&sample_instance("inst-1")).await.unwrap();

        let err = f.workflow.run(&context(&f), &input(false)).await.unwrap_err();
        let WorkflowError::Suspended { wake_at } = err else {
            panic!("expected a grace suspension, got {err:?}");
        };
        let remaining = wake_at - chrono::Utc::now().timestamp();
        assert!((23 * 60 * 60..=24 * 60 * 60).contains(&remaining), "remaining was {remaining}");

        let setting = f.settings.get_setting("int-1").await.unwrap();
        assert!(setting.deleted, "soft-deleted while suspended");
        assert_eq!(f.log.wake_at("inst-1").await, Some(wake_at));

        // Re-entry before the instant keeps the memoized grace deadline.
        let replay = f.workflow.run(&context(&f), &input(false)).await.unwrap_err();
        assert!(matches!(replay, WorkflowError::Suspended { wake_at: w } if w == wake_at));
        assert!(f.settings.get_setting("int-1").await.is_some(), "purge must not run early");
    }

    #[tokio::test]
    async fn unknown_integration_aborts() {
        let f = fixture(Duration::ZERO).await;
        let bad = DeleteIntegrationInput { integration_id: "ghost".into(), delete_past_syncs: false };
        let err = f.workflow.run(&context(&f), &bad).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Fatal(_)));
    }
}
