//! Turns timed readings into points, at most once per counter.

use std::collections::HashSet;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    ids::{self, COMPLETE_REPORT_VID},
    ingest::{ReconcilePlan, StreamerCursor, TimedReading},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledPoint {
    pub stream_slug: String,
    pub counter: u32,
    pub timestamp: Timestamp,
    /// raw timestamp as sent by the device
    pub device_timestamp: u32,
    pub value: u32,
    pub dirty: bool,
    pub unverified: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub points: Vec<ReconciledPoint>,
    pub cursor: StreamerCursor,
    pub already_processed: usize,
    pub duplicates: usize,
}

/// Drops readings at or below the cursor and repeated counters (first wins),
/// then advances the cursor to the highest counter seen.
pub fn reconcile(readings: &[TimedReading], cursor: &StreamerCursor, unverified: bool) -> Reconciled {
    let device_id = cursor.streamer.device_id;
    let mut seen = HashSet::new();
    let mut points = Vec::with_capacity(readings.len());
    let mut already_processed = 0;
    let mut duplicates = 0;

    for timed in readings {
        let reading = &timed.reading;
        if reading.id <= cursor.last_processed_id {
            already_processed += 1;
            continue;
        }
        if !seen.insert(reading.id) {
            duplicates += 1;
            continue;
        }

        points.push(ReconciledPoint {
            stream_slug: ids::stream_slug(device_id, reading.stream),
            counter: reading.id,
            timestamp: timed.timestamp,
            device_timestamp: reading.timestamp,
            value: reading.value,
            dirty: timed.dirty,
            unverified,
        });
    }

    let mut next = cursor.clone();
    if let Some(highest) = points.iter().map(|p| p.counter).max() {
        next.advance_to(highest);
    }

    debug!(
        "{} new point(s), {already_processed} already processed, {duplicates} duplicate(s)",
        points.len()
    );

    Reconciled {
        points,
        cursor: next,
        already_processed,
        duplicates,
    }
}

/// [`reconcile`] plus the cursor bookkeeping a plan carries (clean base, reboots)
pub fn reconcile_plan(plan: &ReconcilePlan, cursor: &StreamerCursor) -> Reconciled {
    let mut reconciled = reconcile(&plan.readings, cursor, plan.unverified());
    if !reconciled.points.is_empty() {
        let reboots = plan
            .boundaries
            .iter()
            .filter(|b| b.id > cursor.last_processed_id)
            .count();
        reconciled.cursor.last_base = Some(plan.base);
        reconciled.cursor.reboot_count += reboots as u32;
    }
    reconciled
}

/// Point certifying that `cursor` has been reconciled up to its `last_processed_id`
pub fn completeness_marker(cursor: &StreamerCursor, timestamp: Timestamp) -> ReconciledPoint {
    ReconciledPoint {
        stream_slug: ids::stream_slug(cursor.streamer.device_id, COMPLETE_REPORT_VID),
        counter: cursor.last_processed_id,
        timestamp,
        device_timestamp: 0,
        value: cursor.streamer.index as u32,
        dirty: false,
        unverified: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ids::StreamerKey, report::Reading, report::selector::StreamerSelector};

    fn timed(id: u32, value: u32) -> TimedReading {
        TimedReading {
            reading: Reading {
                stream: 0x5001,
                reserved: 0,
                id,
                timestamp: id * 10,
                value,
            },
            timestamp: Timestamp::from_second(1_700_000_000 + id as i64).unwrap(),
            dirty: false,
        }
    }

    fn cursor(last: u32) -> StreamerCursor {
        let mut cursor = StreamerCursor::new(StreamerKey::new(0xa, 0), StreamerSelector::System);
        cursor.last_processed_id = last;
        cursor
    }

    #[test]
    fn test_scenario_counts() {
        let readings = vec![timed(10, 1), timed(11, 2), timed(12, 3)];

        let fresh = reconcile(&readings, &cursor(9), false);
        assert_eq!(fresh.points.len(), 3);
        assert_eq!(fresh.cursor.last_processed_id, 12);
        assert_eq!(fresh.points[0].stream_slug, "s--0000-0000-0000-000a--5001");

        let replay = reconcile(&readings, &cursor(12), false);
        assert!(replay.points.is_empty());
        assert_eq!(replay.already_processed, 3);
        assert_eq!(replay.cursor.last_processed_id, 12);
    }

    #[test]
    fn test_idempotent() {
        let readings = vec![timed(3, 1), timed(4, 2)];
        let first = reconcile(&readings, &cursor(0), false);
        let second = reconcile(&readings, &first.cursor, false);
        assert!(second.points.is_empty());
        assert_eq!(second.cursor, first.cursor);
    }

    #[test]
    fn test_first_duplicate_wins() {
        let readings = vec![timed(5, 1), timed(5, 2), timed(6, 3)];
        let reconciled = reconcile(&readings, &cursor(0), true);
        assert_eq!(reconciled.duplicates, 1);
        assert_eq!(reconciled.points[0].value, 1);
        assert!(reconciled.points.iter().all(|p| p.unverified));
    }

    #[test]
    fn test_cursor_never_decreases() {
        let readings = vec![timed(2, 1)];
        let reconciled = reconcile(&readings, &cursor(50), false);
        assert_eq!(reconciled.cursor.last_processed_id, 50);
    }

    #[test]
    fn test_marker() {
        let mut cursor = cursor(12);
        cursor.streamer.index = 1;
        let marker = completeness_marker(&cursor, Timestamp::UNIX_EPOCH);
        assert_eq!(marker.stream_slug, "s--0000-0000-0000-000a--5a05");
        assert_eq!(marker.counter, 12);
        assert_eq!(marker.value, 1);
    }
}
