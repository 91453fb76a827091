//! Infrastructure error wrappers
//!
//! Adapter code converts library failures into [`InfraError`] with `?` and
//! the `From` below folds them into the shared domain error at the port
//! boundary.

use leavesync_domain::LeaveSyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<InfraError> for LeaveSyncError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Sqlite(e) => LeaveSyncError::Database(e.to_string()),
            InfraError::Pool(e) => LeaveSyncError::Database(e.to_string()),
            InfraError::Http(e) => LeaveSyncError::Network(e.to_string()),
            InfraError::Join(e) => LeaveSyncError::Internal(e.to_string()),
        }
    }
}
