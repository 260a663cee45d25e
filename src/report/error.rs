use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParseError {
    #[error("unsupported report format `{0}`")]
    UnsupportedFormat(u8),
    #[error("malformed report: {0}")]
    Malformed(String),
    #[error("found {extra} bytes after the footer (declared length {declared}, buffer {actual})")]
    TrailingData {
        declared: usize,
        actual: usize,
        extra: usize,
    },
    #[error("expected {expected} readings but only {found} are present")]
    CountMismatch { expected: usize, found: usize },
    #[error("counter range is inconsistent: lowest_id {lowest_id} > highest_id {highest_id}")]
    CounterRange { lowest_id: u32, highest_id: u32 },
    #[error("report digest does not match its signature")]
    DigestMismatch,
}

impl ParseError {
    /// Short machine-readable tag, used in operator alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Malformed(_) => "malformed",
            Self::TrailingData { .. } => "trailing_data",
            Self::CountMismatch { .. } => "count_mismatch",
            Self::CounterRange { .. } => "counter_range",
            Self::DigestMismatch => "digest_mismatch",
        }
    }
}
