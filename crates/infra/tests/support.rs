//! Shared fixtures for infra integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::NaiveDate;
use leavesync_core::testing::{
    sample_record, sample_request, sample_setting, CapturingNotifier, InMemoryRequestReader,
    InMemorySettingStore, InMemorySyncRecordStore, ScriptedTracker,
};
use leavesync_core::{
    CreateSyncWorkflow, CredentialGate, DeleteIntegrationWorkflow, DeleteSyncWorkflow,
    ExecutionLog, RetryPolicy, SyncRecordWriter, TrackerClient,
};
use leavesync_domain::SyncStatus;
use leavesync_infra::{
    event_channel, DbManager, RuntimeLimits, SqliteExecutionLog, SyncDispatcher,
};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Install the test subscriber once per binary; honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Temporary execution-log database kept alive for the test's duration.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("engine.db");
        let manager = DbManager::new(&db_path, 4).expect("db manager should be created");
        manager.run_migrations().expect("migrations should run");
        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }

    pub fn execution_log(&self) -> Arc<SqliteExecutionLog> {
        Arc::new(SqliteExecutionLog::new(Arc::clone(&self.manager)))
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Business-side ports shared across a dispatcher "restart".
pub struct Stores {
    pub records: Arc<InMemorySyncRecordStore>,
    pub requests: Arc<InMemoryRequestReader>,
    pub settings: Arc<InMemorySettingStore>,
    pub notifier: Arc<CapturingNotifier>,
    pub tracker: Arc<ScriptedTracker>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            records: Arc::new(InMemorySyncRecordStore::new()),
            requests: Arc::new(InMemoryRequestReader::new()),
            settings: Arc::new(InMemorySettingStore::new()),
            notifier: Arc::new(CapturingNotifier::new()),
            tracker: ScriptedTracker::new(),
        }
    }

    /// Seed one pending record plus its setting and an approved request
    /// starting on `start`.
    pub async fn seed_pending(&self, start: NaiveDate) {
        self.records.insert(sample_record("log-1", SyncStatus::Pending)).await;
        self.settings.insert(sample_setting("int-1")).await;
        self.requests.insert(sample_request("req-1", start)).await;
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a started dispatcher over the given execution log and stores.
pub async fn start_engine(
    log: Arc<dyn ExecutionLog>,
    stores: &Stores,
    limits: RuntimeLimits,
    retry: RetryPolicy,
    grace: Duration,
) -> Arc<SyncDispatcher> {
    let runtime = leavesync_infra::WorkflowRuntime::new(Arc::clone(&log), limits, retry);
    let writer = SyncRecordWriter::new(stores.records.clone());
    let gate = CredentialGate::new(stores.settings.clone(), stores.notifier.clone());
    let tracker: Arc<dyn TrackerClient> = stores.tracker.clone();

    let (handle, events) = event_channel();
    let create = CreateSyncWorkflow::new(
        stores.requests.clone(),
        stores.records.clone(),
        stores.settings.clone(),
        tracker.clone(),
        writer.clone(),
        gate,
    );
    let delete = DeleteSyncWorkflow::new(stores.records.clone(), tracker, writer);
    let purge = DeleteIntegrationWorkflow::new(
        stores.settings.clone(),
        stores.records.clone(),
        Arc::new(handle),
    )
    .with_grace(grace);

    let dispatcher = SyncDispatcher::new(runtime, create, delete, purge, log);
    dispatcher.start(events).await;
    dispatcher
}

/// Poll `probe` until it returns true or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
