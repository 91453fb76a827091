//! SQLite-backed implementation of the execution log port.
//!
//! All statements run on `spawn_blocking` so the pool's synchronous rusqlite
//! calls never block a runtime worker. Step rows are written with
//! `INSERT OR REPLACE`: memoization keys are unique per instance and a
//! rewrite only ever carries the identical outcome.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use leavesync_core::ExecutionLog;
use leavesync_domain::{
    InstanceRecord, LeaveSyncError, Result, StepRecord, WorkflowKind,
};
use rusqlite::{params, Row};
use tokio::task;

use super::manager::{DbConnection, DbManager};
use crate::errors::InfraError;

/// Execution log repository backed by the shared [`DbManager`].
pub struct SqliteExecutionLog {
    db: Arc<DbManager>,
}

impl SqliteExecutionLog {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    fn insert(conn: &DbConnection, instance: &InstanceRecord) -> Result<()> {
        conn.execute(
            INSTANCE_INSERT_SQL,
            params![
                instance.id,
                instance.kind.to_string(),
                instance.event_json,
                instance.correlation_json,
                instance.wake_at,
                instance.done,
                instance.created_at,
            ],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }

    fn fetch_live(conn: &DbConnection) -> Result<Vec<InstanceRecord>> {
        let mut stmt = conn.prepare(INSTANCE_LIVE_SQL).map_err(InfraError::from)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(InfraError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(InfraError::from)?;

        rows.into_iter()
            .map(|(id, kind, event_json, correlation_json, wake_at, done, created_at)| {
                let kind = WorkflowKind::from_str(&kind).map_err(LeaveSyncError::Database)?;
                Ok(InstanceRecord {
                    id,
                    kind,
                    event_json,
                    correlation_json,
                    wake_at,
                    done,
                    created_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ExecutionLog for SqliteExecutionLog {
    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        let instance = instance.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            Self::insert(&conn, &instance)
        })
        .await
        .map_err(InfraError::from)?
    }

    async fn set_wake_at(&self, instance_id: &str, wake_at: Option<i64>) -> Result<()> {
        let db = Arc::clone(&self.db);
        let instance_id = instance_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE workflow_instances SET wake_at = ?2 WHERE id = ?1",
                params![instance_id, wake_at],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await
        .map_err(InfraError::from)?
    }

    async fn mark_done(&self, instance_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let instance_id = instance_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE workflow_instances SET done = 1, wake_at = NULL WHERE id = ?1",
                params![instance_id],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await
        .map_err(InfraError::from)?
    }

    async fn live_instances(&self) -> Result<Vec<InstanceRecord>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<InstanceRecord>> {
            let conn = db.get_connection()?;
            Self::fetch_live(&conn)
        })
        .await
        .map_err(InfraError::from)?
    }

    async fn get_step(&self, instance_id: &str, step_name: &str) -> Result<Option<StepRecord>> {
        let db = Arc::clone(&self.db);
        let instance_id = instance_id.to_string();
        let step_name = step_name.to_string();
        task::spawn_blocking(move || -> Result<Option<StepRecord>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(STEP_GET_SQL).map_err(InfraError::from)?;
            let mut rows = stmt
                .query_map(params![instance_id, step_name], map_step_row)
                .map_err(InfraError::from)?;
            match rows.next() {
                Some(row) => Ok(Some(row.map_err(InfraError::from)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(InfraError::from)?
    }

    async fn put_step(&self, step: &StepRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        let step = step.clone();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                STEP_UPSERT_SQL,
                params![step.instance_id, step.step_name, step.outcome_json, step.recorded_at],
            )
            .map_err(InfraError::from)?;
            Ok(())
        })
        .await
        .map_err(InfraError::from)?
    }
}

const INSTANCE_INSERT_SQL: &str = "INSERT OR REPLACE INTO workflow_instances (
        id, kind, event_json, correlation_json, wake_at, done, created_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const INSTANCE_LIVE_SQL: &str = "SELECT
        id, kind, event_json, correlation_json, wake_at, done, created_at
    FROM workflow_instances
    WHERE done = 0
    ORDER BY created_at ASC";

const STEP_GET_SQL: &str = "SELECT instance_id, step_name, outcome_json, recorded_at
    FROM workflow_steps
    WHERE instance_id = ?1 AND step_name = ?2";

const STEP_UPSERT_SQL: &str = "INSERT OR REPLACE INTO workflow_steps (
        instance_id, step_name, outcome_json, recorded_at
    ) VALUES (?1, ?2, ?3, ?4)";

fn map_step_row(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    Ok(StepRecord {
        instance_id: row.get(0)?,
        step_name: row.get(1)?,
        outcome_json: row.get(2)?,
        recorded_at: row.get(3)?,
    })
}
