//! Durable execution log persistence (SQLite).

pub mod execution_log;
pub mod manager;

pub use execution_log::SqliteExecutionLog;
pub use manager::{DbConnection, DbManager};
