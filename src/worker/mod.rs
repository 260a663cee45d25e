//! Task messages and the context every handler runs against.
//!
//! Tasks travel as JSON, `{"task": "ProcessReport", "arguments": {...}}`.
//! The tag picks the handler in [`Task::run`]; there is no runtime lookup.

use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::{
    config::IngestConfig,
    ids::StreamerKey,
    ingest::{FailureReason, IngestStateMachine},
    report::parser::ReportParser,
    retry::{RetryScheduler, StreamerThrottle},
    store::{BlobStore, Clock, CounterStore, CursorStore, Notifier, PointStore, TaskQueue},
};

pub mod error;
pub mod pipeline;
pub mod pool;
pub mod queue;

pub use error::WorkerError;

/// Where the raw upload lives and when the gateway got it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRef {
    pub bucket: String,
    pub key: String,
    pub received: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReportArgs {
    pub device_slug: String,
    pub report: ReportRef,
    /// counter range of an earlier deferred attempt
    #[serde(default)]
    pub start_id: Option<u32>,
    #[serde(default)]
    pub end_id: Option<u32>,
}

impl ProcessReportArgs {
    /// Range this task was deferred with, if any
    pub fn pending_range(&self) -> Option<(u32, u32)> {
        self.start_id.zip(self.end_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "arguments")]
pub enum Task {
    ProcessReport(ProcessReportArgs),
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessReport(_) => "ProcessReport",
        }
    }

    pub fn from_json(s: &str) -> Result<Self, WorkerError> {
        Ok(serde_json::from_str(s)?)
    }

    pub async fn run(self, ctx: Arc<IngestContext>) -> Result<TaskOutcome, WorkerError> {
        match self {
            Self::ProcessReport(args) => pipeline::process_report(ctx, args).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TaskOutcome {
    Ingested {
        streamer: StreamerKey,
        points: usize,
        dirty: usize,
        reboots: usize,
        unverified: bool,
    },
    Deferred {
        attempt: u32,
        delay: SignedDuration,
    },
    Busy {
        collisions: u32,
    },
    Failed(FailureReason),
}

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub points: Arc<dyn PointStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub counters: Arc<dyn CounterStore>,
    pub notifier: Arc<dyn Notifier>,
    pub queue: Arc<dyn TaskQueue>,
    pub clock: Arc<dyn Clock>,
}

/// Shared by all workers. Holds no mutable state of its own.
pub struct IngestContext {
    pub config: IngestConfig,
    pub parser: ReportParser,
    pub machine: IngestStateMachine,
    pub retry: RetryScheduler,
    pub throttle: StreamerThrottle,
    pub store: Collaborators,
}

impl IngestContext {
    pub fn new(config: IngestConfig, store: Collaborators) -> Self {
        Self {
            parser: ReportParser::new(config.max_report_length),
            machine: IngestStateMachine::new(config.digest_policy),
            retry: RetryScheduler::new(store.counters.clone(), config.retry),
            throttle: StreamerThrottle::new(store.counters.clone(), config.throttle),
            config,
            store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_json() {
        let json = r#"{
            "task": "ProcessReport",
            "arguments": {
                "device_slug": "d--0000-0000-0000-000a",
                "report": {"bucket": "reports", "key": "a.bin", "received": "2024-05-01T12:00:00Z"}
            }
        }"#;
        let task = Task::from_json(json).unwrap();
        let Task::ProcessReport(args) = &task;
        assert_eq!(args.device_slug, "d--0000-0000-0000-000a");
        assert_eq!(args.start_id, None);
        assert_eq!(args.pending_range(), None);
        assert_eq!(task.name(), "ProcessReport");

        let back = Task::from_json(&serde_json::to_string(&task).unwrap()).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_unknown_task() {
        assert!(Task::from_json(r#"{"task": "DeleteEverything", "arguments": {}}"#).is_err());
    }
}
