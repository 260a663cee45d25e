//! Decides what happens to one parsed report: reconcile now, reconcile across
//! a reboot, wait for a system sibling, or give up.
//!
//! Evaluation is pure. It reads the cursors of every streamer of the device
//! and returns an [`IngestOutcome`]; persisting anything is left to the worker.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, error, info, span, warn};

use crate::{
    clock,
    ids::StreamerKey,
    report::{Integrity, ParsedReport, Reading, error::ParseError, selector::StreamerSelector},
    retry,
};

pub mod anomaly;
pub mod cursor;
pub mod error;
pub mod gate;
pub mod reboot;

pub use anomaly::Anomaly;
pub use cursor::{DeviceSnapshot, SiblingCursor, StreamerCursor};
pub use error::FailureReason;

/// What to do with a report whose signature does not match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestPolicy {
    #[default]
    WarnAndIngest,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimedReading {
    pub reading: Reading,
    pub timestamp: Timestamp,
    pub dirty: bool,
}

/// Everything needed to turn a report into points
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcilePlan {
    pub streamer: StreamerKey,
    pub selector: StreamerSelector,
    pub readings: Vec<TimedReading>,
    pub boundaries: Vec<reboot::Boundary>,
    pub segments: Vec<reboot::Segment>,
    /// base of the last (clean) segment
    pub base: Timestamp,
    pub integrity: Integrity,
    pub anomalies: Vec<Anomaly>,
}

impl ReconcilePlan {
    pub fn unverified(&self) -> bool {
        !self.integrity.is_verified()
    }

    pub fn reboots(&self) -> usize {
        self.boundaries.len()
    }
}

/// A counter range that cannot be reconciled until its system siblings catch up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRange {
    pub streamer: StreamerKey,
    pub start_id: u32,
    pub end_id: u32,
    pub waiting_on: Vec<StreamerKey>,
}

impl PendingRange {
    pub fn device_slug(&self) -> String {
        self.streamer.device_slug()
    }

    pub fn retry_key(&self) -> String {
        retry::range_key(&self.device_slug(), self.start_id, self.end_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestState {
    Ready,
    AwaitingSibling,
    RebootDetected,
    Failed,
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::AwaitingSibling => "awaiting sibling",
            Self::RebootDetected => "reboot detected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IngestOutcome {
    Ready(ReconcilePlan),
    RebootDetected(ReconcilePlan),
    AwaitingSibling(PendingRange),
    Failed(FailureReason),
}

impl IngestOutcome {
    pub fn state(&self) -> IngestState {
        match self {
            Self::Ready(_) => IngestState::Ready,
            Self::RebootDetected(_) => IngestState::RebootDetected,
            Self::AwaitingSibling(_) => IngestState::AwaitingSibling,
            Self::Failed(_) => IngestState::Failed,
        }
    }

    pub fn plan(&self) -> Option<&ReconcilePlan> {
        match self {
            Self::Ready(plan) | Self::RebootDetected(plan) => Some(plan),
            _ => None,
        }
    }
}

/// When the report reached the gateway, and the wall clock at evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportContext {
    pub received: Timestamp,
    pub now: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct IngestStateMachine {
    digest_policy: DigestPolicy,
}

impl IngestStateMachine {
    pub fn new(digest_policy: DigestPolicy) -> Self {
        Self { digest_policy }
    }

    pub fn evaluate(
        &self,
        report: &ParsedReport,
        ctx: &ReportContext,
        snapshot: &DeviceSnapshot,
    ) -> IngestOutcome {
        let streamer = StreamerKey::new(report.header.device_id, report.header.streamer_index);
        let span = span!(Level::INFO, "Evaluate", streamer = %streamer, report = report.header.report_id);
        let _enter = span.enter();

        match self.try_evaluate(streamer, report, ctx, snapshot) {
            Ok(outcome) => {
                info!("{}", outcome.state());
                outcome
            }
            Err(reason) => {
                error!("{reason}");
                IngestOutcome::Failed(reason)
            }
        }
    }

    fn try_evaluate(
        &self,
        streamer: StreamerKey,
        report: &ParsedReport,
        ctx: &ReportContext,
        snapshot: &DeviceSnapshot,
    ) -> Result<IngestOutcome, FailureReason> {
        let footer = &report.footer;
        if footer.lowest_id > footer.highest_id {
            return Err(ParseError::CounterRange {
                lowest_id: footer.lowest_id,
                highest_id: footer.highest_id,
            }
            .into());
        }

        match report.integrity {
            Integrity::Mismatch if self.digest_policy == DigestPolicy::Reject => {
                return Err(ParseError::DigestMismatch.into());
            }
            Integrity::Mismatch => warn!("digest mismatch, ingesting as unverified"),
            Integrity::Unverified { signature_flags } => {
                debug!("signature flags {signature_flags:#04x}, digest not checked")
            }
            Integrity::Verified => {}
        }

        let selector = report.selector();
        let cursor = snapshot
            .cursor(streamer)
            .cloned()
            .unwrap_or_else(|| StreamerCursor::new(streamer, selector));

        // nothing new means nothing to protect
        if report.readings.iter().any(|r| r.id > cursor.last_processed_id) {
            let waiting_on = gate::waiting_on(streamer, selector, footer.lowest_id, snapshot);
            if !waiting_on.is_empty() {
                debug!("waiting on {} system sibling(s)", waiting_on.len());
                return Ok(IngestOutcome::AwaitingSibling(PendingRange {
                    streamer,
                    start_id: footer.lowest_id,
                    end_id: footer.highest_id,
                    waiting_on,
                }));
            }
        }

        let nominal = clock::base_time(ctx.received, report.header.sent_timestamp)?;
        // system streamers carry their own reboot readings
        let stored_reboots = if selector.is_system() {
            &[][..]
        } else {
            &snapshot.reboots[..]
        };
        let (boundaries, mut anomalies) =
            reboot::detect(&report.readings, cursor.last_processed_id, stored_reboots);
        let segments = reboot::segments(&report.readings, &boundaries, nominal, cursor.last_base)?;
        let readings = reboot::apply(&report.readings, &segments)?;

        anomalies.extend(anomaly::out_of_range(&readings, footer));
        anomalies.extend(anomaly::in_future(&readings, ctx.now));
        for anomaly in &anomalies {
            warn!("{anomaly}");
        }

        let base = segments.last().map(|s| s.base).unwrap_or(nominal);
        let plan = ReconcilePlan {
            streamer,
            selector,
            readings,
            boundaries,
            segments,
            base,
            integrity: report.integrity,
            anomalies,
        };

        Ok(if plan.boundaries.is_empty() {
            IngestOutcome::Ready(plan)
        } else {
            IngestOutcome::RebootDetected(plan)
        })
    }
}
