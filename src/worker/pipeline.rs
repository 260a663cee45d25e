//! Fetch, parse, evaluate, and commit one report.
//!
//! Only [`commit`] writes, points first and then the cursor. A crash in
//! between leads to a replay of the report; the point store keeps the first
//! copy of every counter, so the replay only moves the cursor.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{Level, Span, debug, error, info, span, warn};

use crate::{
    dedup,
    ids::{self, COMPLETE_REPORT_VID, REBOOT_VID, StreamerKey},
    ingest::{
        DeviceSnapshot, FailureReason, IngestOutcome, PendingRange, ReconcilePlan, ReportContext,
        SiblingCursor, StreamerCursor, reboot::SystemReboot,
    },
    report::{ParsedReport, ReportFooter},
    retry::{self, RetryDecision, ThrottleDecision},
    store::{Alert, StoreError},
};

use super::{IngestContext, ProcessReportArgs, ReportRef, Task, TaskOutcome, WorkerError};

/// Runs on the blocking pool, every collaborator is synchronous
pub async fn process_report(
    ctx: Arc<IngestContext>,
    args: ProcessReportArgs,
) -> Result<TaskOutcome, WorkerError> {
    let span = Span::current();
    tokio::task::spawn_blocking(move || {
        let _enter = span.enter();
        let data = ctx.store.blobs.fetch(&args.report.bucket, &args.report.key)?;
        ingest(&ctx, args, data)
    })
    .await?
}

/// Everything after the fetch
pub fn ingest(
    ctx: &IngestContext,
    args: ProcessReportArgs,
    data: Bytes,
) -> Result<TaskOutcome, WorkerError> {
    let span = span!(Level::INFO, "ProcessReport", device = %args.device_slug, key = %args.report.key);
    let _enter = span.enter();

    let report = match ctx.parser.parse(&data) {
        Ok(report) => report,
        Err(e) => return fail(ctx, e.into(), &args.report),
    };

    if ids::parse_device_slug(&args.device_slug) != Some(report.header.device_id) {
        warn!(
            "task is for {} but report came from {}",
            args.device_slug,
            ids::device_slug(report.header.device_id)
        );
    }

    let streamer = StreamerKey::new(report.header.device_id, report.header.streamer_index);
    match ctx.throttle.acquire(streamer)? {
        ThrottleDecision::Acquired => {}
        ThrottleDecision::Busy {
            collisions,
            delay,
            notify,
        } => {
            debug!("{streamer} busy ({collisions}), rescheduling in {delay:#}");
            if notify {
                let alert = Alert::new(
                    "streamer busy",
                    format!("{streamer} still being processed after {collisions} attempts"),
                )
                .with_report(args.report.clone());
                ctx.store.notifier.notify(&alert)?;
            }
            ctx.store.queue.enqueue(Task::ProcessReport(args), delay)?;
            return Ok(TaskOutcome::Busy { collisions });
        }
        ThrottleDecision::GiveUp { collisions } => {
            let reason = FailureReason::ThrottleExhausted(streamer.to_string(), collisions);
            return fail(ctx, reason, &args.report);
        }
    }

    let result = evaluate_and_commit(ctx, streamer, &report, args);
    if let Err(e) = ctx.throttle.release(streamer) {
        error!("could not release {streamer}, it stays busy until the counter expires: {e}");
    }
    result
}

/// Key of the retry counter. A resumed task keeps counting on the range it
/// was deferred with.
fn retry_key(args: &ProcessReportArgs, streamer: StreamerKey, footer: &ReportFooter) -> String {
    let (start_id, end_id) = match args.pending_range() {
        Some((start_id, end_id)) => {
            if !footer.contains(start_id) || !footer.contains(end_id) {
                warn!(
                    "resuming range {start_id}..={end_id} but report covers {}..={}",
                    footer.lowest_id, footer.highest_id
                );
            }
            (start_id, end_id)
        }
        None => (footer.lowest_id, footer.highest_id),
    };
    retry::range_key(&streamer.device_slug(), start_id, end_id)
}

fn evaluate_and_commit(
    ctx: &IngestContext,
    streamer: StreamerKey,
    report: &ParsedReport,
    args: ProcessReportArgs,
) -> Result<TaskOutcome, WorkerError> {
    let snapshot = snapshot(ctx, report)?;
    let report_ctx = ReportContext {
        received: args.report.received,
        now: ctx.store.clock.now(),
    };
    let key = retry_key(&args, streamer, &report.footer);

    match ctx.machine.evaluate(report, &report_ctx, &snapshot) {
        IngestOutcome::Failed(reason) => fail(ctx, reason, &args.report),
        IngestOutcome::AwaitingSibling(pending) => defer(ctx, &key, pending, args),
        IngestOutcome::Ready(plan) | IngestOutcome::RebootDetected(plan) => {
            let cursor = snapshot
                .cursor(streamer)
                .cloned()
                .unwrap_or_else(|| StreamerCursor::new(streamer, plan.selector));
            let outcome = commit(ctx, &plan, &cursor, &args.report)?;
            ctx.retry.clear(&key)?;
            Ok(outcome)
        }
    }
}

/// Cursors of every streamer of the device with the counter of their latest
/// completeness marker, and for non-system reports the reboots stored above
/// the report's own cursor.
pub fn snapshot(ctx: &IngestContext, report: &ParsedReport) -> Result<DeviceSnapshot, StoreError> {
    let device_id = report.header.device_id;
    let markers = ids::stream_slug(device_id, COMPLETE_REPORT_VID);

    let mut streamers = Vec::new();
    for cursor in ctx.store.cursors.device_cursors(device_id)? {
        let certified_through = if cursor.certifies_completeness() {
            ctx.store
                .points
                .last_with_value(&markers, cursor.streamer.index as u32)?
                .map(|marker| marker.counter)
        } else {
            None
        };
        streamers.push(SiblingCursor {
            cursor,
            certified_through,
        });
    }

    let reboots = if report.selector().is_system() {
        Vec::new()
    } else {
        let streamer = StreamerKey::new(device_id, report.header.streamer_index);
        let after = streamers
            .iter()
            .find(|s| s.cursor.streamer == streamer)
            .map_or(0, |s| s.cursor.last_processed_id);
        ctx.store
            .points
            .range(&ids::stream_slug(device_id, REBOOT_VID), after, report.footer.highest_id)?
            .into_iter()
            .map(|point| SystemReboot {
                id: point.counter,
                at: point.timestamp,
            })
            .collect()
    };

    Ok(DeviceSnapshot { streamers, reboots })
}

fn commit(
    ctx: &IngestContext,
    plan: &ReconcilePlan,
    cursor: &StreamerCursor,
    report: &ReportRef,
) -> Result<TaskOutcome, WorkerError> {
    let reconciled = dedup::reconcile_plan(plan, cursor);
    let count = reconciled.points.len();
    let dirty = reconciled.points.iter().filter(|p| p.dirty).count();

    if count > 0 {
        let mut points = reconciled.points;
        points.push(dedup::completeness_marker(&reconciled.cursor, report.received));
        let stored = ctx.store.points.bulk_insert(&points)?;
        if stored < points.len() {
            info!("{} point(s) were already stored", points.len() - stored);
        }
        ctx.store.cursors.save(&reconciled.cursor)?;
    }

    info!(
        "ingested {count} point(s) ({dirty} dirty, {} reboot(s)), cursor at {}",
        plan.reboots(),
        reconciled.cursor.last_processed_id
    );

    Ok(TaskOutcome::Ingested {
        streamer: plan.streamer,
        points: count,
        dirty,
        reboots: plan.reboots(),
        unverified: plan.unverified(),
    })
}

fn defer(
    ctx: &IngestContext,
    key: &str,
    pending: PendingRange,
    mut args: ProcessReportArgs,
) -> Result<TaskOutcome, WorkerError> {
    match ctx.retry.decide(key)? {
        RetryDecision::Retry { attempt, delay } => {
            info!(
                "range {}..={} waiting on {} sibling(s), attempt {attempt}, retrying in {delay:#}",
                pending.start_id,
                pending.end_id,
                pending.waiting_on.len()
            );
            if args.pending_range().is_none() {
                args.start_id = Some(pending.start_id);
                args.end_id = Some(pending.end_id);
            }
            ctx.store.queue.enqueue(Task::ProcessReport(args), delay)?;
            Ok(TaskOutcome::Deferred { attempt, delay })
        }
        RetryDecision::Exhausted { attempts } => {
            let (start_id, end_id) = args
                .pending_range()
                .unwrap_or((pending.start_id, pending.end_id));
            let reason = FailureReason::RetriesExhausted {
                device_slug: pending.device_slug(),
                start_id,
                end_id,
                attempts,
            };
            fail(ctx, reason, &args.report)
        }
    }
}

fn fail(
    ctx: &IngestContext,
    reason: FailureReason,
    report: &ReportRef,
) -> Result<TaskOutcome, WorkerError> {
    error!("{reason} ({}/{})", report.bucket, report.key);
    ctx.store
        .notifier
        .notify(&Alert::failure(&reason, Some(report.clone())))?;
    Ok(TaskOutcome::Failed(reason))
}
