use serde::Serialize;
use tracing::error;

use crate::{ingest::FailureReason, worker::ReportRef};

use super::{Notifier, StoreError};

/// Operator-facing incident. Carries the raw report reference when there is one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub report: Option<ReportRef>,
}

impl Alert {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            report: None,
        }
    }

    pub fn failure(reason: &FailureReason, report: Option<ReportRef>) -> Self {
        let subject = match reason {
            FailureReason::Parse(e) => format!("report rejected ({})", e.kind()),
            FailureReason::Clock(_) => "report timestamps out of range".to_string(),
            FailureReason::RetriesExhausted { .. } => "report range never became ready".to_string(),
            FailureReason::ThrottleExhausted(..) => "streamer stuck".to_string(),
        };
        Self {
            subject,
            body: reason.to_string(),
            report,
        }
    }

    pub fn with_report(mut self, report: ReportRef) -> Self {
        self.report = Some(report);
        self
    }
}

/// Emits alerts as `error` events with the JSON payload attached
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, alert: &Alert) -> Result<(), StoreError> {
        let payload = serde_json::to_string(alert)?;
        error!(subject = %alert.subject, "{payload}");
        Ok(())
    }
}
