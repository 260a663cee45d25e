use serde::Serialize;
use thiserror::Error;

use crate::{clock::ClockError, report::error::ParseError};

/// Why a report was given up on. Every variant is terminal and goes to the operators.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum FailureReason {
    #[error("parse error `{0}`")]
    Parse(ParseError),
    #[error("clock error `{0}`")]
    Clock(ClockError),
    #[error("range {start_id}..={end_id} of `{device_slug}` still not ready after {attempts} attempts")]
    RetriesExhausted {
        device_slug: String,
        start_id: u32,
        end_id: u32,
        attempts: u32,
    },
    #[error("streamer `{0}` stayed busy after {1} attempts")]
    ThrottleExhausted(String, u32),
}

impl From<ParseError> for FailureReason {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<ClockError> for FailureReason {
    fn from(value: ClockError) -> Self {
        Self::Clock(value)
    }
}
