use thiserror::Error;

use crate::store::StoreError;

/// Failures that leave a task undone. Fetch and store errors end up here and
/// are retried by whoever feeds the queue; terminal report problems do not,
/// they are a [`super::TaskOutcome::Failed`].
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("bad task message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("worker panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}
