//! Sync record writer enforcing the status state machine
//!
//! All status writes go through this one helper so the transition rules of
//! the state machine live in a single place instead of being re-derived at
//! every call site.

use std::sync::Arc;

use chrono::Utc;
use leavesync_domain::{LeaveSyncError, Result, SyncRecord, SyncStatus};
use tracing::{debug, warn};

use crate::ports::SyncRecordStore;

/// Validated writer over the sync record store.
#[derive(Clone)]
pub struct SyncRecordWriter {
    store: Arc<dyn SyncRecordStore>,
}

impl SyncRecordWriter {
    pub fn new(store: Arc<dyn SyncRecordStore>) -> Self {
        Self { store }
    }

    /// Record a terminal failure. Refuses transitions the state machine
    /// does not allow.
    pub async fn fail(
        &self,
        record: &mut SyncRecord,
        status: SyncStatus,
        error: &str,
    ) -> Result<()> {
        self.transition(record, status)?;
        record.last_error = Some(error.to_string());
        self.persist(record).await
    }

    /// Record the last error of a transient failure without leaving Pending;
    /// the instance retries later.
    pub async fn note_retry(&self, record: &mut SyncRecord, error: &str) -> Result<()> {
        record.last_error = Some(error.to_string());
        debug!(
            sync_log_id = %record.id,
            error = %error,
            "transient failure noted, status unchanged"
        );
        self.persist(record).await
    }

    /// External creation succeeded.
    pub async fn mark_synced(&self, record: &mut SyncRecord, external_id: &str) -> Result<()> {
        self.transition(record, SyncStatus::Synced)?;
        record.external_item_id = Some(external_id.to_string());
        record.last_error = None;
        self.persist(record).await
    }

    /// External deletion succeeded.
    pub async fn mark_removed(&self, record: &mut SyncRecord) -> Result<()> {
        self.transition(record, SyncStatus::Removed)?;
        record.last_error = None;
        self.persist(record).await
    }

    fn transition(&self, record: &mut SyncRecord, next: SyncStatus) -> Result<()> {
        if !record.status.can_transition(next) {
            warn!(
                sync_log_id = %record.id,
                from = %record.status,
                to = %next,
                "refusing illegal status transition"
            );
            return Err(LeaveSyncError::InvalidInput(format!(
                "illegal sync status transition {} -> {} on record {}",
                record.status, next, record.id
            )));
        }
        record.status = next;
        Ok(())
    }

    async fn persist(&self, record: &mut SyncRecord) -> Result<()> {
        record.updated_at = Utc::now().timestamp();
        self.store.update(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, InMemorySyncRecordStore};

    #[tokio::test]
    async fn failing_a_pending_record_persists_status_and_error() {
        let store = Arc::new(InMemorySyncRecordStore::new());
        let mut record = sample_record("log-1", SyncStatus::Pending);
        store.insert(record.clone()).await;

        let writer = SyncRecordWriter::new(store.clone());
        writer.fail(&mut record, SyncStatus::Failed, "boom").await.unwrap();

        let stored = store.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn synced_records_cannot_regress_to_pending() {
        let store = Arc::new(InMemorySyncRecordStore::new());
        let mut record = sample_record("log-1", SyncStatus::Synced);
        store.insert(record.clone()).await;

        let writer = SyncRecordWriter::new(store.clone());
        let err = writer.fail(&mut record, SyncStatus::Pending, "nope").await.unwrap_err();
        assert!(matches!(err, LeaveSyncError::InvalidInput(_)));

        let stored = store.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Synced, "store must be untouched");
    }

    #[tokio::test]
    async fn retry_notes_keep_the_record_pending() {
        let store = Arc::new(InMemorySyncRecordStore::new());
        let mut record = sample_record("log-1", SyncStatus::Pending);
        store.insert(record.clone()).await;

        let writer = SyncRecordWriter::new(store.clone());
        writer.note_retry(&mut record, "429 Too Many Requests").await.unwrap();

        let stored = store.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Pending);
        assert_eq!(stored.last_error.as_deref(), Some("429 Too Many Requests"));
    }

    #[tokio::test]
    async fn marking_synced_sets_the_external_id_and_clears_errors() {
        let store = Arc::new(InMemorySyncRecordStore::new());
        let mut record = sample_record("log-1", SyncStatus::Pending);
        record.last_error = Some("old".into());
        store.insert(record.clone()).await;

        let writer = SyncRecordWriter::new(store.clone());
        writer.mark_synced(&mut record, "ext-9").await.unwrap();

        let stored = store.get_record("log-1").await.unwrap();
        assert_eq!(stored.status, SyncStatus::Synced);
        assert_eq!(stored.external_item_id.as_deref(), Some("ext-9"));
        assert_eq!(stored.last_error, None);
    }
}
