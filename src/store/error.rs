use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not found `{0}`")]
    NotFound(String),
    #[error("invalid key `{0}`")]
    InvalidKey(String),
    #[error("lock poisoned")]
    Poisoned,
    #[error("queue unavailable: {0}")]
    Queue(String),
}
