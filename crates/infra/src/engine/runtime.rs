//! Workflow runtime: instance registry, concurrency caps, retry scheduling
//!
//! One tokio task drives each workflow instance. The registry enforces the
//! at-most-one-per-key rule and holds the correlation pairs cancellation
//! events match against. Per-kind semaphores cap how many instances of each
//! workflow class execute at once; excess instances queue on the permit.
//! Permits are held only while a body is executing: a parked instance
//! releases its permit and re-acquires one on wake, so thousands of
//! suspended instances never starve runnable ones.
//!
//! Transient failures and durable sleeps park the task and re-enter the
//! whole body when the wake instant arrives; memoized steps short-circuit
//! on re-entry, so only unfinished work repeats. The wake instant is
//! persisted on the instance row and honored again after a restart. There
//! is no attempt cap.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use leavesync_core::{ExecutionLog, RetryPolicy, StepContext, WorkflowError, WorkflowOutcome};
use leavesync_domain::constants::{
    MAX_CONCURRENT_CREATE, MAX_CONCURRENT_DELETE, MAX_CONCURRENT_PURGE,
};
use leavesync_domain::{
    CorrelationPair, InstanceRecord, LeaveSyncError, Result, WorkflowKind,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Per-kind concurrency limits.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    pub max_concurrent_create: usize,
    pub max_concurrent_delete: usize,
    pub max_concurrent_purge: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_concurrent_create: MAX_CONCURRENT_CREATE,
            max_concurrent_delete: MAX_CONCURRENT_DELETE,
            max_concurrent_purge: MAX_CONCURRENT_PURGE,
        }
    }
}

struct InstanceHandle {
    cancel: CancellationToken,
    /// Set before `cancel` fires when the instance is superseded by a newer
    /// event. Distinguishes a targeted cancellation (instance is done, must
    /// not be recovered) from a process shutdown (instance stays live so
    /// `recover` can re-dispatch it).
    superseded: Arc<std::sync::atomic::AtomicBool>,
    correlation: Vec<CorrelationPair>,
}

/// Drives workflow instances to completion.
pub struct WorkflowRuntime {
    log: Arc<dyn ExecutionLog>,
    running: Arc<DashMap<String, InstanceHandle>>,
    semaphores: HashMap<WorkflowKind, Arc<Semaphore>>,
    retry: RetryPolicy,
    root: CancellationToken,
    tasks: TaskTracker,
}

impl WorkflowRuntime {
    pub fn new(log: Arc<dyn ExecutionLog>, limits: RuntimeLimits, retry: RetryPolicy) -> Self {
        let semaphores = HashMap::from([
            (WorkflowKind::CreateSync, Arc::new(Semaphore::new(limits.max_concurrent_create.max(1)))),
            (WorkflowKind::DeleteSync, Arc::new(Semaphore::new(limits.max_concurrent_delete.max(1)))),
            (
                WorkflowKind::PurgeIntegration,
                Arc::new(Semaphore::new(limits.max_concurrent_purge.max(1))),
            ),
        ]);
        Self {
            log,
            running: Arc::new(DashMap::new()),
            semaphores,
            retry,
            root: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.running.contains_key(key)
    }

    /// Cancel every running instance whose correlation pairs contain
    /// `(field, value)`. Returns how many instances were signalled.
    /// Cancellation is cooperative: each instance observes the token at its
    /// next step or suspension boundary and winds down without failing its
    /// record.
    pub fn cancel_matching(&self, field: &str, value: &str) -> usize {
        let mut signalled = 0;
        for entry in self.running.iter() {
            let matched = entry
                .value()
                .correlation
                .iter()
                .any(|pair| pair.field == field && pair.value == value);
            if matched {
                entry.value().superseded.store(true, std::sync::atomic::Ordering::SeqCst);
                entry.value().cancel.cancel();
                signalled += 1;
            }
        }
        if signalled > 0 {
            info!(field, value, signalled, "cancellation fanned out to running instances");
        }
        signalled
    }

    /// Persist and start an instance. Returns `false` without side effects
    /// when another instance is already running under `key`.
    pub async fn spawn<F, Fut>(&self, key: &str, instance: InstanceRecord, body: F) -> Result<bool>
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<WorkflowOutcome, WorkflowError>> + Send + 'static,
    {
        let correlation: Vec<CorrelationPair> = serde_json::from_str(&instance.correlation_json)
            .map_err(|e| {
                LeaveSyncError::InvalidInput(format!("corrupt correlation pairs: {e}"))
            })?;

        let cancel = self.root.child_token();
        let superseded = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            use dashmap::mapref::entry::Entry;
            match self.running.entry(key.to_string()) {
                Entry::Occupied(_) => {
                    debug!(key, "instance already running, event is a no-op");
                    return Ok(false);
                }
                Entry::Vacant(slot) => {
                    slot.insert(InstanceHandle {
                        cancel: cancel.clone(),
                        superseded: Arc::clone(&superseded),
                        correlation,
                    });
                }
            }
        }

        if let Err(err) = self.log.insert_instance(&instance).await {
            self.running.remove(key);
            return Err(err);
        }

        let semaphore = self
            .semaphores
            .get(&instance.kind)
            .cloned()
            .ok_or_else(|| LeaveSyncError::Internal(format!("no semaphore for {}", instance.kind)))?;

        let log = Arc::clone(&self.log);
        let running = Arc::clone(&self.running);
        let retry = self.retry;
        let key = key.to_string();
        let instance_id = instance.id.clone();
        let kind = instance.kind;
        // A recovered instance may carry the wake instant of the park it was
        // in when the process died; honor it before the first re-entry.
        let initial_wake = instance.wake_at.filter(|wake| *wake > Utc::now().timestamp());

        self.tasks.spawn(async move {
            let ctx = StepContext::new(instance_id.clone(), Arc::clone(&log), cancel.clone(), retry);

            if let Some(wake) = initial_wake {
                debug!(instance = %instance_id, %kind, wake_at = wake, "honoring persisted wake instant");
                if !park(&log, &cancel, &superseded, &instance_id, wake).await {
                    running.remove(&key);
                    return;
                }
            }

            loop {
                // The permit covers one pass through the body; a parked
                // instance holds no permit.
                let permit = tokio::select! {
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = cancel.cancelled() => {
                        debug!(instance = %instance_id, "instance canceled while queued");
                        if superseded.load(std::sync::atomic::Ordering::SeqCst) {
                            finish(&log, &instance_id).await;
                        }
                        break;
                    }
                };

                let result = body(ctx.clone()).await;
                drop(permit);

                match result {
                    Ok(outcome) => {
                        info!(instance = %instance_id, %kind, ?outcome, "instance completed");
                        finish(&log, &instance_id).await;
                        break;
                    }
                    Err(WorkflowError::Canceled) => {
                        if superseded.load(std::sync::atomic::Ordering::SeqCst) {
                            info!(instance = %instance_id, %kind, "instance canceled");
                            finish(&log, &instance_id).await;
                        } else {
                            // Shutdown: the instance stays live and is
                            // re-dispatched by recovery on the next start.
                            info!(instance = %instance_id, %kind, "instance suspended for shutdown");
                        }
                        break;
                    }
                    Err(WorkflowError::Fatal(message)) => {
                        warn!(instance = %instance_id, %kind, %message, "instance aborted");
                        finish(&log, &instance_id).await;
                        break;
                    }
                    Err(WorkflowError::RetryAfter { delay, reason }) => {
                        warn!(
                            instance = %instance_id,
                            %kind,
                            %reason,
                            retry_in_secs = delay.as_secs(),
                            "instance parked for retry"
                        );
                        let wake = Utc::now().timestamp().saturating_add(delay.as_secs() as i64);
                        if !park(&log, &cancel, &superseded, &instance_id, wake).await {
                            break;
                        }
                    }
                    Err(WorkflowError::Suspended { wake_at }) => {
                        debug!(instance = %instance_id, %kind, wake_at, "instance parked on durable timer");
                        if !park(&log, &cancel, &superseded, &instance_id, wake_at).await {
                            break;
                        }
                    }
                }
            }
            running.remove(&key);
        });

        Ok(true)
    }

    /// Cancel everything and wait for driver tasks to wind down.
    pub async fn shutdown(&self, timeout: Duration) {
        self.root.cancel();
        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "runtime shutdown timed out");
        }
    }
}

async fn finish(log: &Arc<dyn ExecutionLog>, instance_id: &str) {
    if let Err(err) = log.mark_done(instance_id).await {
        error!(instance = %instance_id, error = %err, "failed to mark instance done");
    }
}

/// Park the driver until `wake_at`, holding no execution permit. Returns
/// `false` when the park ended in a cancellation and the driver must stop;
/// the wake instant stays persisted in that case so recovery can honor it.
async fn park(
    log: &Arc<dyn ExecutionLog>,
    cancel: &CancellationToken,
    superseded: &Arc<std::sync::atomic::AtomicBool>,
    instance_id: &str,
    wake_at: i64,
) -> bool {
    if let Err(err) = log.set_wake_at(instance_id, Some(wake_at)).await {
        error!(instance = %instance_id, error = %err, "failed to persist wake_at");
    }

    let remaining = Duration::from_secs(wake_at.saturating_sub(Utc::now().timestamp()).max(0) as u64);
    tokio::select! {
        _ = cancel.cancelled() => {
            if superseded.load(std::sync::atomic::Ordering::SeqCst) {
                info!(instance = %instance_id, "instance canceled while parked");
                finish(log, instance_id).await;
            } else {
                info!(instance = %instance_id, "instance suspended for shutdown while parked");
            }
            return false;
        }
        _ = tokio::time::sleep(remaining) => {}
    }

    if let Err(err) = log.set_wake_at(instance_id, None).await {
        error!(instance = %instance_id, error = %err, "failed to clear wake_at");
    }
    true
}
