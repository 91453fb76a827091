//! Event dispatcher: routes sync events onto workflow instances.
//!
//! The dispatcher owns the runtime and the three workflow bodies. Inbound
//! events map to instance keys (`create:{request}:{integration}`,
//! `delete:{sync_log}`, `purge:{integration}`); update and delete events
//! first cancel whatever is running under the matching correlation pair.
//!
//! Workflows publish follow-up events (the delete fan-out) through a
//! [`DispatcherHandle`], an mpsc sender implementing the event sink port;
//! a pump task consumes the channel so there is no call cycle between core
//! and the dispatcher. `recover` re-dispatches every live instance from the
//! execution log after a restart, under its original instance id so memoized
//! steps replay; an instance recovered mid-park keeps its persisted wake
//! instant instead of re-entering immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leavesync_core::{
    CreateSyncInput, CreateSyncWorkflow, DeleteIntegrationInput, DeleteIntegrationWorkflow,
    DeleteSyncInput, DeleteSyncWorkflow, EventSink, ExecutionLog,
};
use leavesync_domain::{
    CorrelationPair, InstanceRecord, LeaveSyncError, Result, SyncEvent, WorkflowKind,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::engine::WorkflowRuntime;

/// How long a superseding event waits for the canceled predecessor to leave
/// the registry before giving up on the key.
const KEY_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiving half of the follow-up event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

/// Create the follow-up event channel. The handle goes to workflows that
/// publish events; the receiver goes to [`SyncDispatcher::start`].
pub fn event_channel() -> (DispatcherHandle, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatcherHandle { tx }, rx)
}

/// Cheap clonable sender implementing the event sink port.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

#[async_trait]
impl EventSink for DispatcherHandle {
    async fn publish(&self, event: SyncEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| LeaveSyncError::Internal("dispatcher event channel closed".into()))
    }
}

/// Routes events to workflow instances and owns their runtime.
pub struct SyncDispatcher {
    runtime: WorkflowRuntime,
    create: Arc<CreateSyncWorkflow>,
    delete: Arc<DeleteSyncWorkflow>,
    purge: Arc<DeleteIntegrationWorkflow>,
    log: Arc<dyn ExecutionLog>,
    shutdown: CancellationToken,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncDispatcher {
    pub fn new(
        runtime: WorkflowRuntime,
        create: CreateSyncWorkflow,
        delete: DeleteSyncWorkflow,
        purge: DeleteIntegrationWorkflow,
        log: Arc<dyn ExecutionLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            create: Arc::new(create),
            delete: Arc::new(delete),
            purge: Arc::new(purge),
            log,
            shutdown: CancellationToken::new(),
            pump: tokio::sync::Mutex::new(None),
        })
    }

    /// Start the pump task consuming follow-up events.
    pub async fn start(self: &Arc<Self>, mut events: EventReceiver) {
        let dispatcher = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            if let Err(err) = dispatcher.dispatch(event).await {
                                error!(error = %err, "failed to dispatch follow-up event");
                            }
                        }
                        None => break,
                    }
                }
            }
            info!("dispatcher pump stopped");
        });
        *self.pump.lock().await = Some(handle);
    }

    /// Stop the pump and wind down all running instances.
    pub async fn stop(&self, timeout: Duration) {
        self.shutdown.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("dispatcher pump did not stop in time");
            }
        }
        self.runtime.shutdown(timeout).await;
    }

    /// Route one event. Returns `true` when a new instance started, `false`
    /// when the event was a no-op (duplicate key).
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub async fn dispatch(&self, event: SyncEvent) -> Result<bool> {
        self.route(event, None).await
    }

    /// Re-dispatch every live instance from the execution log. Instances
    /// keep their ids, so completed steps replay instead of re-executing.
    pub async fn recover(&self) -> Result<usize> {
        let live = self.log.live_instances().await?;
        let mut recovered = 0;
        for instance in live {
            let event: SyncEvent = serde_json::from_str(&instance.event_json).map_err(|e| {
                LeaveSyncError::Internal(format!(
                    "corrupt event on instance {}: {e}",
                    instance.id
                ))
            })?;
            if self.route(event, Some(instance)).await? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "live instances re-dispatched after restart");
        }
        Ok(recovered)
    }

    async fn route(&self, event: SyncEvent, existing: Option<InstanceRecord>) -> Result<bool> {
        match event {
            SyncEvent::CreateSync { .. } => self.start_create(event, existing).await,
            SyncEvent::UpdateSync { request_id, sync_log_id, integration_id } => {
                // A re-sync supersedes whatever is in flight for the record.
                self.cancel_and_release("sync_log_id", &sync_log_id).await;
                let follow = SyncEvent::CreateSync {
                    request_id,
                    sync_log_id,
                    integration_id,
                    for_update: true,
                    first_event: false,
                };
                self.start_create(follow, existing).await
            }
            SyncEvent::DeleteSync { sync_log_id } => {
                self.cancel_and_release("sync_log_id", &sync_log_id).await;
                self.start_delete(sync_log_id, existing).await
            }
            SyncEvent::DeleteIntegration { integration_id, delete_past_syncs } => {
                self.cancel_and_release("integration_id", &integration_id).await;
                self.start_purge(integration_id, delete_past_syncs, existing).await
            }
        }
    }

    async fn start_create(&self, event: SyncEvent, existing: Option<InstanceRecord>) -> Result<bool> {
        let SyncEvent::CreateSync {
            ref request_id,
            ref sync_log_id,
            ref integration_id,
            for_update,
            first_event,
        } = event
        else {
            return Err(LeaveSyncError::Internal("start_create got a non-create event".into()));
        };

        let key = format!("create:{request_id}:{integration_id}");
        let pairs = vec![
            CorrelationPair::new("request_id", request_id),
            CorrelationPair::new("integration_id", integration_id),
            CorrelationPair::new("sync_log_id", sync_log_id),
        ];
        let input = CreateSyncInput {
            request_id: request_id.clone(),
            sync_log_id: sync_log_id.clone(),
            integration_id: integration_id.clone(),
            for_update,
            first_event,
        };
        let instance = self.instance(WorkflowKind::CreateSync, &event, &pairs, existing)?;

        let workflow = Arc::clone(&self.create);
        self.runtime
            .spawn(&key, instance, move |ctx| {
                let workflow = Arc::clone(&workflow);
                let input = input.clone();
                async move { workflow.run(&ctx, &input).await }
            })
            .await
    }

    async fn start_delete(
        &self,
        sync_log_id: String,
        existing: Option<InstanceRecord>,
    ) -> Result<bool> {
        let key = format!("delete:{sync_log_id}");
        let pairs = vec![CorrelationPair::new("sync_log_id", &sync_log_id)];
        let event = SyncEvent::DeleteSync { sync_log_id: sync_log_id.clone() };
        let input = DeleteSyncInput { sync_log_id };
        let instance = self.instance(WorkflowKind::DeleteSync, &event, &pairs, existing)?;

        let workflow = Arc::clone(&self.delete);
        self.runtime
            .spawn(&key, instance, move |ctx| {
                let workflow = Arc::clone(&workflow);
                let input = input.clone();
                async move { workflow.run(&ctx, &input).await }
            })
            .await
    }

    async fn start_purge(
        &self,
        integration_id: String,
        delete_past_syncs: bool,
        existing: Option<InstanceRecord>,
    ) -> Result<bool> {
        let key = format!("purge:{integration_id}");
        let pairs = vec![CorrelationPair::new("integration_id", &integration_id)];
        let event = SyncEvent::DeleteIntegration {
            integration_id: integration_id.clone(),
            delete_past_syncs,
        };
        let input = DeleteIntegrationInput { integration_id, delete_past_syncs };
        let instance = self.instance(WorkflowKind::PurgeIntegration, &event, &pairs, existing)?;

        let workflow = Arc::clone(&self.purge);
        self.runtime
            .spawn(&key, instance, move |ctx| {
                let workflow = Arc::clone(&workflow);
                let input = input.clone();
                async move { workflow.run(&ctx, &input).await }
            })
            .await
    }

    /// Cancel matching instances and wait briefly for them to leave the
    /// registry so the superseding instance can claim the key.
    async fn cancel_and_release(&self, field: &str, value: &str) {
        if self.runtime.cancel_matching(field, value) == 0 {
            return;
        }
        let deadline = tokio::time::Instant::now() + KEY_RELEASE_TIMEOUT;
        while self.runtime.cancel_matching(field, value) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(field, value, "canceled instances did not release their keys in time");
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn instance(
        &self,
        kind: WorkflowKind,
        event: &SyncEvent,
        pairs: &[CorrelationPair],
        existing: Option<InstanceRecord>,
    ) -> Result<InstanceRecord> {
        if let Some(instance) = existing {
            return Ok(instance);
        }
        Ok(InstanceRecord {
            id: Uuid::new_v4().to_string(),
            kind,
            event_json: serde_json::to_string(event)
                .map_err(|e| LeaveSyncError::Internal(format!("encode event: {e}")))?,
            correlation_json: serde_json::to_string(pairs)
                .map_err(|e| LeaveSyncError::Internal(format!("encode correlation: {e}")))?,
            wake_at: None,
            done: false,
            created_at: Utc::now().timestamp(),
        })
    }
}

impl Drop for SyncDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
