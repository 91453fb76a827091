//! In-memory port implementations for tests
//!
//! Shared by this crate's unit tests and by downstream integration tests
//! (feature `test-support`). These are deliberately simple: tokio-mutexed
//! maps plus scripted response queues for the tracker client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use leavesync_domain::{
    ApiCredential, ApprovalStatus, AuthOutcome, EntryPayload, InstanceRecord, IntegrationSetting,
    LeaveRequest, LeaveSyncError, OutboundEvent, Result, StepRecord, SyncEvent, SyncRecord,
    SyncStatus, TrackerError, WorkSchedule, WorkflowKind,
};
use tokio::sync::Mutex;

use crate::ports::{
    EventSink, ExecutionLog, NotificationSender, RequestReader, SettingStore, SyncRecordStore,
    TrackerClient,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A pending sync record bound to `int-1` / `ws-1`.
pub fn sample_record(id: &str, status: SyncStatus) -> SyncRecord {
    SyncRecord {
        id: id.to_string(),
        request_id: "req-1".into(),
        integration_id: "int-1".into(),
        external_item_id: None,
        status,
        last_error: None,
        credential: ApiCredential::new("key-1"),
        external_workspace_id: "ws-1".into(),
        external_user_id: Some("user-1".into()),
        created_at: Utc::now().timestamp(),
        updated_at: Utc::now().timestamp(),
    }
}

/// An integration setting without scope filters.
pub fn sample_setting(id: &str) -> IntegrationSetting {
    IntegrationSetting {
        id: id.to_string(),
        name: "Acme Tracker".into(),
        credential: ApiCredential::new("key-1"),
        workspace_id: "ws-1".into(),
        leave_type_ids: Vec::new(),
        department_ids: Vec::new(),
        deleted: false,
        invalid_credential_notified: false,
    }
}

/// A live create-sync instance row; tests that exercise timers need one in
/// the log before `set_wake_at` will accept the instance id.
pub fn sample_instance(id: &str) -> InstanceRecord {
    InstanceRecord {
        id: id.to_string(),
        kind: WorkflowKind::CreateSync,
        event_json: "{}".into(),
        correlation_json: "[]".into(),
        wake_at: None,
        done: false,
        created_at: Utc::now().timestamp(),
    }
}

/// An approved three-day request starting on the given date.
pub fn sample_request(id: &str, start: NaiveDate) -> LeaveRequest {
    LeaveRequest {
        id: id.to_string(),
        start_date: start,
        end_date: start + chrono::Duration::days(2),
        approval: ApprovalStatus::Approved,
        requester_timezone: "UTC".into(),
        schedule: WorkSchedule { workday_start_hour: 9 },
        leave_type_id: "vacation".into(),
        department_id: None,
        external_user_id: Some("user-1".into()),
        note: Some("out of office".into()),
    }
}

// ---------------------------------------------------------------------------
// Execution log
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryExecutionLog {
    instances: Mutex<HashMap<String, InstanceRecord>>,
    steps: Mutex<HashMap<(String, String), StepRecord>>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn wake_at(&self, instance_id: &str) -> Option<i64> {
        self.instances.lock().await.get(instance_id).and_then(|i| i.wake_at)
    }

    pub async fn step_count(&self, instance_id: &str) -> usize {
        self.steps.lock().await.keys().filter(|(id, _)| id == instance_id).count()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<()> {
        self.instances.lock().await.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn set_wake_at(&self, instance_id: &str, wake_at: Option<i64>) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| LeaveSyncError::NotFound(format!("workflow instance {instance_id}")))?;
        instance.wake_at = wake_at;
        Ok(())
    }

    async fn mark_done(&self, instance_id: &str) -> Result<()> {
        if let Some(instance) = self.instances.lock().await.get_mut(instance_id) {
            instance.done = true;
            instance.wake_at = None;
        }
        Ok(())
    }

    async fn live_instances(&self) -> Result<Vec<InstanceRecord>> {
        let mut live: Vec<_> =
            self.instances.lock().await.values().filter(|i| !i.done).cloned().collect();
        live.sort_by_key(|i| i.created_at);
        Ok(live)
    }

    async fn get_step(&self, instance_id: &str, step_name: &str) -> Result<Option<StepRecord>> {
        Ok(self
            .steps
            .lock()
            .await
            .get(&(instance_id.to_string(), step_name.to_string()))
            .cloned())
    }

    async fn put_step(&self, step: &StepRecord) -> Result<()> {
        self.steps
            .lock()
            .await
            .insert((step.instance_id.clone(), step.step_name.clone()), step.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Business stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryRequestReader {
    requests: Mutex<HashMap<String, LeaveRequest>>,
}

impl InMemoryRequestReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, request: LeaveRequest) {
        self.requests.lock().await.insert(request.id.clone(), request);
    }
}

#[async_trait]
impl RequestReader for InMemoryRequestReader {
    async fn request_for_sync(&self, request_id: &str) -> Result<Option<LeaveRequest>> {
        Ok(self.requests.lock().await.get(request_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemorySyncRecordStore {
    records: Mutex<HashMap<String, SyncRecord>>,
}

impl InMemorySyncRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: SyncRecord) {
        self.records.lock().await.insert(record.id.clone(), record);
    }

    pub async fn get_record(&self, id: &str) -> Option<SyncRecord> {
        self.records.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl SyncRecordStore for InMemorySyncRecordStore {
    async fn get(&self, sync_log_id: &str) -> Result<Option<SyncRecord>> {
        Ok(self.records.lock().await.get(sync_log_id).cloned())
    }

    async fn create(&self, record: &SyncRecord) -> Result<()> {
        self.records.lock().await.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &SyncRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        if !records.contains_key(&record.id) {
            return Err(LeaveSyncError::NotFound(format!("sync record {}", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_synced_for_integration(&self, integration_id: &str) -> Result<Vec<SyncRecord>> {
        let mut synced: Vec<_> = self
            .records
            .lock()
            .await
            .values()
            .filter(|r| r.integration_id == integration_id && r.status == SyncStatus::Synced)
            .cloned()
            .collect();
        synced.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(synced)
    }
}

#[derive(Default)]
pub struct InMemorySettingStore {
    settings: Mutex<HashMap<String, IntegrationSetting>>,
}

impl InMemorySettingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, setting: IntegrationSetting) {
        self.settings.lock().await.insert(setting.id.clone(), setting);
    }

    pub async fn get_setting(&self, id: &str) -> Option<IntegrationSetting> {
        self.settings.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl SettingStore for InMemorySettingStore {
    async fn get(&self, integration_id: &str) -> Result<Option<IntegrationSetting>> {
        Ok(self.settings.lock().await.get(integration_id).cloned())
    }

    async fn mark_deleted(&self, integration_id: &str) -> Result<()> {
        let mut settings = self.settings.lock().await;
        let setting = settings
            .get_mut(integration_id)
            .ok_or_else(|| LeaveSyncError::NotFound(format!("setting {integration_id}")))?;
        setting.deleted = true;
        Ok(())
    }

    async fn hard_delete(&self, integration_id: &str) -> Result<()> {
        self.settings.lock().await.remove(integration_id);
        Ok(())
    }

    async fn try_mark_credential_notified(&self, integration_id: &str) -> Result<bool> {
        let mut settings = self.settings.lock().await;
        let setting = settings
            .get_mut(integration_id)
            .ok_or_else(|| LeaveSyncError::NotFound(format!("setting {integration_id}")))?;
        if setting.invalid_credential_notified {
            return Ok(false);
        }
        setting.invalid_credential_notified = true;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Notification and event capture
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CapturingNotifier {
    sent: Mutex<Vec<OutboundEvent>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<OutboundEvent> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSender for CapturingNotifier {
    async fn send(&self, event: &OutboundEvent) -> Result<()> {
        self.sent.lock().await.push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct CapturingSink {
    published: Mutex<Vec<SyncEvent>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<SyncEvent> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for CapturingSink {
    async fn publish(&self, event: SyncEvent) -> Result<()> {
        self.published.lock().await.push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted tracker client
// ---------------------------------------------------------------------------

type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Tracker client driven by scripted response queues. When a queue is empty
/// the default succeeds: a valid credential on `ws-1`, membership true,
/// generated entry ids, successful deletes.
pub struct ScriptedTracker {
    workspaces: Vec<String>,
    auth_responses: Mutex<Vec<TrackerResult<AuthOutcome>>>,
    membership_responses: Mutex<Vec<TrackerResult<bool>>>,
    create_responses: Mutex<Vec<TrackerResult<String>>>,
    delete_responses: Mutex<Vec<TrackerResult<()>>>,
    auth_calls: AtomicUsize,
    membership_calls: AtomicUsize,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl ScriptedTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            workspaces: vec!["ws-1".into()],
            auth_responses: Mutex::new(Vec::new()),
            membership_responses: Mutex::new(Vec::new()),
            create_responses: Mutex::new(Vec::new()),
            delete_responses: Mutex::new(Vec::new()),
            auth_calls: AtomicUsize::new(0),
            membership_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        })
    }

    pub async fn push_auth(&self, response: TrackerResult<AuthOutcome>) {
        self.auth_responses.lock().await.push(response);
    }

    pub async fn push_membership(&self, response: TrackerResult<bool>) {
        self.membership_responses.lock().await.push(response);
    }

    pub async fn push_create(&self, response: TrackerResult<String>) {
        self.create_responses.lock().await.push(response);
    }

    pub async fn push_delete(&self, response: TrackerResult<()>) {
        self.delete_responses.lock().await.push(response);
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.auth_calls()
            + self.membership_calls.load(Ordering::SeqCst)
            + self.create_calls()
            + self.delete_calls()
    }

    async fn next<T>(queue: &Mutex<Vec<TrackerResult<T>>>) -> Option<TrackerResult<T>> {
        let mut queue = queue.lock().await;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}

#[async_trait]
impl TrackerClient for ScriptedTracker {
    async fn authenticate(&self, _credential: &ApiCredential) -> TrackerResult<AuthOutcome> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.auth_responses).await {
            Some(response) => response,
            None => Ok(AuthOutcome { valid: true, workspace_ids: self.workspaces.clone() }),
        }
    }

    async fn is_user_in_workspace(
        &self,
        _credential: &ApiCredential,
        _workspace_id: &str,
        _external_user_id: &str,
    ) -> TrackerResult<bool> {
        self.membership_calls.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.membership_responses).await {
            Some(response) => response,
            None => Ok(true),
        }
    }

    async fn create_entry(
        &self,
        _credential: &ApiCredential,
        _workspace_id: &str,
        _entry: &EntryPayload,
    ) -> TrackerResult<String> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.create_responses).await {
            Some(response) => response,
            None => Ok(format!("ext-{}", n + 1)),
        }
    }

    async fn delete_entry(
        &self,
        _credential: &ApiCredential,
        _workspace_id: &str,
        _external_item_id: &str,
    ) -> TrackerResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        match Self::next(&self.delete_responses).await {
            Some(response) => response,
            None => Ok(()),
        }
    }
}
