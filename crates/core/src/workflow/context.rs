//! Durable step-execution context
//!
//! `StepContext` is the runtime contract every workflow body is written
//! against. Step outcomes are memoized in the execution log keyed by
//! `(instance_id, step_name)`; sleeps persist their deadline so suspension
//! survives process restarts; cancellation is observed at every step and
//! suspension boundary.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leavesync_domain::constants::TRANSIENT_RETRY_DELAY;
use leavesync_domain::{LeaveSyncError, StepRecord, StoredOutcome};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ports::ExecutionLog;
use crate::workflow::{StepError, WorkflowError};

/// Delay applied when a step raises a retry signal.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { delay: TRANSIENT_RETRY_DELAY }
    }
}

/// Per-instance execution context handed to workflow bodies.
#[derive(Clone)]
pub struct StepContext {
    instance_id: String,
    log: Arc<dyn ExecutionLog>,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl StepContext {
    pub fn new(
        instance_id: impl Into<String>,
        log: Arc<dyn ExecutionLog>,
        cancel: CancellationToken,
        retry: RetryPolicy,
    ) -> Self {
        Self { instance_id: instance_id.into(), log, cancel, retry }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Execute `fut` at most once for this instance under the given step
    /// name. A memoized success is returned without re-executing; a memoized
    /// fatal failure is replayed as fatal. Retry signals are never memoized,
    /// so the step re-executes on the next entry.
    pub async fn run_step<T, Fut>(&self, name: &str, fut: Fut) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, StepError>>,
    {
        self.ensure_live()?;

        if let Some(record) = self
            .log
            .get_step(&self.instance_id, name)
            .await
            .map_err(|e| log_failure(name, &e))?
        {
            let stored: StoredOutcome = serde_json::from_str(&record.outcome_json)
                .map_err(|e| WorkflowError::Fatal(format!("corrupt step record '{name}': {e}")))?;
            return match stored {
                StoredOutcome::Ok(value) => {
                    debug!(instance = %self.instance_id, step = name, "step replayed from log");
                    serde_json::from_value(value).map_err(|e| {
                        WorkflowError::Fatal(format!("corrupt step value '{name}': {e}"))
                    })
                }
                StoredOutcome::Fatal(message) => Err(WorkflowError::Fatal(message)),
            };
        }

        match fut.await {
            Ok(value) => {
                let json = serde_json::to_value(&value).map_err(|e| {
                    WorkflowError::Fatal(format!("unserializable step value '{name}': {e}"))
                })?;
                self.record(name, &StoredOutcome::Ok(json)).await?;
                Ok(value)
            }
            Err(StepError::Retry { reason }) => {
                warn!(
                    instance = %self.instance_id,
                    step = name,
                    reason = %reason,
                    "step raised retry signal"
                );
                Err(WorkflowError::RetryAfter { delay: self.retry.delay, reason })
            }
            Err(StepError::Fatal(message)) => {
                self.record(name, &StoredOutcome::Fatal(message.clone())).await?;
                Err(WorkflowError::Fatal(message))
            }
        }
    }

    /// Suspend until a wall-clock instant. The deadline is memoized under
    /// `label` and persisted as the instance's wake instant; suspension
    /// surfaces as [`WorkflowError::Suspended`] so the runtime can release
    /// the instance's execution permit while it is parked. On re-entry the
    /// memoized deadline replays and an elapsed timer is a no-op.
    pub async fn sleep_until(
        &self,
        label: &str,
        at: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        self.sleep_deadline(label, at.timestamp()).await
    }

    /// Relative form of [`Self::sleep_until`]; the absolute deadline is
    /// fixed on first execution and stable across replays.
    pub async fn sleep(&self, label: &str, duration: Duration) -> Result<(), WorkflowError> {
        let deadline = Utc::now().timestamp().saturating_add(duration.as_secs() as i64);
        self.sleep_deadline(label, deadline).await
    }

    async fn sleep_deadline(&self, label: &str, deadline: i64) -> Result<(), WorkflowError> {
        self.ensure_live()?;

        let deadline = match self
            .log
            .get_step(&self.instance_id, label)
            .await
            .map_err(|e| log_failure(label, &e))?
        {
            Some(record) => {
                let stored: StoredOutcome =
                    serde_json::from_str(&record.outcome_json).map_err(|e| {
                        WorkflowError::Fatal(format!("corrupt timer record '{label}': {e}"))
                    })?;
                match stored {
                    StoredOutcome::Ok(value) => serde_json::from_value(value).map_err(|e| {
                        WorkflowError::Fatal(format!("corrupt timer deadline '{label}': {e}"))
                    })?,
                    StoredOutcome::Fatal(message) => return Err(WorkflowError::Fatal(message)),
                }
            }
            None => {
                self.record(label, &StoredOutcome::Ok(serde_json::json!(deadline))).await?;
                deadline
            }
        };

        let now = Utc::now().timestamp();
        if now >= deadline {
            return Ok(());
        }

        self.log
            .set_wake_at(&self.instance_id, Some(deadline))
            .await
            .map_err(|e| log_failure(label, &e))?;

        debug!(
            instance = %self.instance_id,
            timer = label,
            wake_at = deadline,
            "instance suspending on timer"
        );
        Err(WorkflowError::Suspended { wake_at: deadline })
    }

    fn ensure_live(&self) -> Result<(), WorkflowError> {
        if self.cancel.is_cancelled() {
            return Err(WorkflowError::Canceled);
        }
        Ok(())
    }

    async fn record(&self, name: &str, outcome: &StoredOutcome) -> Result<(), WorkflowError> {
        let record = StepRecord {
            instance_id: self.instance_id.clone(),
            step_name: name.to_string(),
            outcome_json: serde_json::to_string(outcome)
                .map_err(|e| WorkflowError::Fatal(format!("encode step '{name}': {e}")))?,
            recorded_at: Utc::now().timestamp(),
        };
        self.log.put_step(&record).await.map_err(|e| log_failure(name, &e))
    }
}

fn log_failure(step: &str, err: &LeaveSyncError) -> WorkflowError {
    WorkflowError::Fatal(format!("execution log failure at '{step}': {err}"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ports::ExecutionLog;
    use crate::testing::{sample_instance, InMemoryExecutionLog};

    fn context(log: Arc<InMemoryExecutionLog>, cancel: CancellationToken) -> StepContext {
        StepContext::new("inst-1", log, cancel, RetryPolicy::default())
    }

    #[tokio::test]
    async fn step_executes_once_and_replays_from_log() {
        let log = Arc::new(InMemoryExecutionLog::new());
        let ctx = context(log.clone(), CancellationToken::new());
        let calls = AtomicUsize::new(0);

        let first: String = ctx
            .run_step("create", async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StepError>("ext-1".to_string())
            })
            .await
            .unwrap();
        assert_eq!(first, "ext-1");

        // Fresh context, same instance id: simulates re-entry after a crash.
        let replay_ctx = context(log, CancellationToken::new());
        let second: String = replay_ctx
            .run_step("create", async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StepError>("ext-2".to_string())
            })
            .await
            .unwrap();

        assert_eq!(second, "ext-1", "replay must return the memoized value");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "side effect must not repeat");
    }

    #[tokio::test]
    async fn retry_signals_are_not_memoized() {
        let log = Arc::new(InMemoryExecutionLog::new());
        let ctx = context(log.clone(), CancellationToken::new());

        let err = ctx
            .run_step::<String, _>("flaky", async {
                Err(StepError::Retry { reason: "429".into() })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RetryAfter { .. }));

        // The step re-executes on the next entry and can now succeed.
        let value: String =
            ctx.run_step("flaky", async { Ok::<_, StepError>("done".to_string()) }).await.unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn fatal_step_outcomes_replay_as_fatal() {
        let log = Arc::new(InMemoryExecutionLog::new());
        let ctx = context(log.clone(), CancellationToken::new());

        let err = ctx
            .run_step::<String, _>("doomed", async { Err(StepError::Fatal("bad input".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Fatal(ref m) if m == "bad input"));

        let calls = AtomicUsize::new(0);
        let err = ctx
            .run_step::<String, _>("doomed", async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("never".to_string())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Fatal(ref m) if m == "bad input"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sleep_until_suspends_with_a_persisted_deadline() {
        let log = Arc::new(InMemoryExecutionLog::new());
        log.insert_instance(&sample_instance("inst-1")).await.unwrap();
        let ctx = context(log.clone(), CancellationToken::new());
        let at = Utc::now() + chrono::Duration::days(3);

        let err = ctx.sleep_until("wait-for-start", at).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Suspended { wake_at } if wake_at == at.timestamp()));
        assert_eq!(log.wake_at("inst-1").await, Some(at.timestamp()));
    }

    #[tokio::test]
    async fn sleep_deadlines_are_stable_across_re_entries() {
        let log = Arc::new(InMemoryExecutionLog::new());
        log.insert_instance(&sample_instance("inst-1")).await.unwrap();
        let ctx = context(log.clone(), CancellationToken::new());

        let first = ctx.sleep("grace", Duration::from_secs(3600)).await.unwrap_err();
        let WorkflowError::Suspended { wake_at: deadline } = first else {
            panic!("expected a suspension, got {first:?}");
        };

        // Re-entry with a different duration keeps the memoized deadline.
        let replay_ctx = context(log, CancellationToken::new());
        let second = replay_ctx.sleep("grace", Duration::from_secs(7200)).await.unwrap_err();
        assert!(matches!(second, WorkflowError::Suspended { wake_at } if wake_at == deadline));
    }

    #[tokio::test]
    async fn elapsed_sleep_is_skipped_on_replay() {
        let log = Arc::new(InMemoryExecutionLog::new());
        let ctx = context(log, CancellationToken::new());
        let past = Utc::now() - chrono::Duration::hours(1);
        ctx.sleep_until("wait-for-start", past).await.unwrap();
    }

    #[tokio::test]
    async fn canceled_instance_refuses_to_sleep() {
        let log = Arc::new(InMemoryExecutionLog::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = context(log, cancel);
        let at = Utc::now() + chrono::Duration::days(7);

        let result = ctx.sleep_until("wait-for-start", at).await;
        assert!(matches!(result, Err(WorkflowError::Canceled)));
    }

    #[tokio::test]
    async fn canceled_instance_refuses_new_steps() {
        let log = Arc::new(InMemoryExecutionLog::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = context(log, cancel);

        let err = ctx
            .run_step::<String, _>("late", async { Ok("value".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Canceled));
    }
}
