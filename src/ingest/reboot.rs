//! Splits a report's readings at device reboots and gives every segment a time base.
//!
//! A boundary sits at reading `i` when its timestamp went backwards
//! (both relative), when it is a reboot event not yet processed, or when it
//! is the first reading counted after a reboot the system streamer stored.
//! The segment after the last boundary is anchored at the report's own time
//! base and is clean. Earlier segments are anchored backwards from the
//! segment that follows them and are dirty, except the first one, which
//! reuses the streamer's last known base when there is one.

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use tracing::debug;

use crate::{
    clock::{self, ClockError},
    report::Reading,
};

use super::{TimedReading, anomaly::Anomaly};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Boundary {
    /// index of the first reading after the reboot
    pub index: usize,
    pub id: u32,
    pub marker: bool,
    pub clock_reset: bool,
    /// when the system streamer saw the reboot happen
    pub at: Option<Timestamp>,
}

/// Reboot event already reconciled on the device's system streamer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemReboot {
    pub id: u32,
    pub at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub base: Timestamp,
    pub dirty: bool,
}

/// Latest stored reboot preceding each reading that directly follows one
fn recorded_reboots<'a>(
    readings: &[Reading],
    last_processed_id: u32,
    system: &'a [SystemReboot],
) -> Vec<Option<&'a SystemReboot>> {
    let mut recorded: Vec<Option<&SystemReboot>> = vec![None; readings.len()];
    for reboot in system.iter().filter(|r| r.id > last_processed_id) {
        let Some(index) = readings.iter().position(|r| r.id > reboot.id) else {
            continue;
        };
        if recorded[index].is_none_or(|r| r.id < reboot.id) {
            recorded[index] = Some(reboot);
        }
    }
    recorded
}

/// `system` holds reboots stored by the system streamer; they mark the
/// first reading counted after them just like a reboot reading would.
pub fn detect(
    readings: &[Reading],
    last_processed_id: u32,
    system: &[SystemReboot],
) -> (Vec<Boundary>, Vec<Anomaly>) {
    let recorded = recorded_reboots(readings, last_processed_id, system);
    let mut boundaries = Vec::new();
    let mut anomalies = Vec::new();

    for (index, reading) in readings.iter().enumerate() {
        let stored = recorded[index];
        let marker = (reading.is_reboot() && reading.id > last_processed_id) || stored.is_some();
        let clock_reset = index > 0 && {
            let prev = readings[index - 1].timestamp;
            !clock::is_rtc(prev) && !clock::is_rtc(reading.timestamp) && reading.timestamp < prev
        };

        if !marker && !clock_reset {
            continue;
        }

        if index > 0 && marker != clock_reset {
            anomalies.push(Anomaly::RebootSignalMismatch {
                id: reading.id,
                marker,
                clock_reset,
            });
        }

        debug!("reboot before reading {} (marker={marker}, clock_reset={clock_reset})", reading.id);
        boundaries.push(Boundary {
            index,
            id: reading.id,
            marker,
            clock_reset,
            at: stored.map(|r| r.at),
        });
    }

    (boundaries, anomalies)
}

/// Largest elapsed-seconds timestamp in a run of readings
fn max_elapsed(readings: &[Reading]) -> u32 {
    readings
        .iter()
        .map(|r| r.timestamp)
        .filter(|ts| !clock::is_rtc(*ts))
        .max()
        .unwrap_or(0)
}

/// Base that makes `readings` end one second before `next_start`
fn backwards_base(readings: &[Reading], next_start: Timestamp) -> Result<Timestamp, ClockError> {
    let end = next_start.checked_sub(SignedDuration::from_secs(1))?;
    Ok(end.checked_sub(SignedDuration::from_secs(max_elapsed(readings) as i64))?)
}

pub fn segments(
    readings: &[Reading],
    boundaries: &[Boundary],
    nominal_base: Timestamp,
    previous_base: Option<Timestamp>,
) -> Result<Vec<Segment>, ClockError> {
    let mut starts: Vec<usize> = boundaries.iter().map(|b| b.index).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    let first_is_reboot = boundaries.first().is_some_and(|b| b.index == 0);

    let mut segments = Vec::with_capacity(starts.len());
    // utc time of the first reading of the segment after the current one
    let mut next_start: Option<Timestamp> = None;

    for (n, &start) in starts.iter().enumerate().rev() {
        let end = starts.get(n + 1).copied().unwrap_or(readings.len());
        let run = &readings[start..end];
        let Some(first) = run.first() else {
            continue;
        };

        // readings before a reboot end before it happened
        let reboot_at = starts
            .get(n + 1)
            .and_then(|next| boundaries.iter().find(|b| b.index == *next))
            .and_then(|b| b.at);
        let anchor = |next: Timestamp| reboot_at.map_or(next, |at| at.min(next));

        let opens_with_reboot = n > 0 || first_is_reboot;
        let (base, dirty) = match next_start {
            None => (nominal_base, false),
            Some(_) if clock::is_rtc(first.timestamp) && opens_with_reboot => {
                let anchor = clock::resolve_timestamp(nominal_base, first.timestamp)?;
                (clock::rebase(anchor, first.timestamp)?, false)
            }
            Some(next) if !opens_with_reboot => match previous_base {
                Some(previous) => (previous, true),
                None => (backwards_base(run, anchor(next))?, true),
            },
            Some(next) => (backwards_base(run, anchor(next))?, true),
        };

        next_start = Some(clock::resolve_timestamp(base, first.timestamp)?);
        segments.push(Segment {
            start,
            end,
            base,
            dirty,
        });
    }

    segments.reverse();
    Ok(segments)
}

pub fn apply(readings: &[Reading], segments: &[Segment]) -> Result<Vec<TimedReading>, ClockError> {
    let mut timed = Vec::with_capacity(readings.len());
    for segment in segments {
        for reading in &readings[segment.start..segment.end] {
            timed.push(TimedReading {
                reading: *reading,
                timestamp: clock::resolve_timestamp(segment.base, reading.timestamp)?,
                dirty: segment.dirty && !clock::is_rtc(reading.timestamp),
            });
        }
    }
    Ok(timed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::RTC_FLAG, ids::REBOOT_VID};

    fn reading(stream: u16, id: u32, timestamp: u32) -> Reading {
        Reading {
            stream,
            reserved: 0,
            id,
            timestamp,
            value: 0,
        }
    }

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn test_no_reboot() {
        let readings = vec![reading(0x5001, 1, 10), reading(0x5001, 2, 20)];
        let (boundaries, anomalies) = detect(&readings, 0, &[]);
        assert!(boundaries.is_empty());
        assert!(anomalies.is_empty());

        let base = ts("2024-05-01T00:00:00Z");
        let segments = segments(&readings, &boundaries, base, None).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].dirty);
        assert_eq!(segments[0].base, base);
    }

    #[test]
    fn test_marker_and_clock_reset_agree() {
        let readings = vec![
            reading(0x5001, 1, 500),
            reading(REBOOT_VID, 2, 0),
            reading(0x5001, 3, 10),
        ];
        let (boundaries, anomalies) = detect(&readings, 0, &[]);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].index, 1);
        assert!(boundaries[0].marker && boundaries[0].clock_reset);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_processed_marker_is_ignored() {
        let readings = vec![reading(REBOOT_VID, 5, 0), reading(0x5001, 6, 10)];
        let (boundaries, _) = detect(&readings, 5, &[]);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn test_clock_reset_without_marker() {
        let readings = vec![reading(0x5001, 1, 500), reading(0x5001, 2, 3)];
        let (boundaries, anomalies) = detect(&readings, 0, &[]);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(
            anomalies,
            vec![Anomaly::RebootSignalMismatch {
                id: 2,
                marker: false,
                clock_reset: true
            }]
        );
    }

    #[test]
    fn test_rtc_never_resets() {
        let readings = vec![reading(0x5001, 1, RTC_FLAG | 500), reading(0x5001, 2, 3)];
        let (boundaries, _) = detect(&readings, 0, &[]);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn test_first_segment_uses_previous_base() {
        let readings = vec![
            reading(0x5001, 1, 100),
            reading(REBOOT_VID, 2, 0),
            reading(0x5001, 3, 10),
        ];
        let (boundaries, _) = detect(&readings, 0, &[]);
        let nominal = ts("2024-05-01T12:00:00Z");
        let previous = ts("2024-05-01T08:00:00Z");

        let segments = segments(&readings, &boundaries, nominal, Some(previous)).unwrap();
        let timed = apply(&readings, &segments).unwrap();

        assert_eq!(timed[0].timestamp, ts("2024-05-01T08:01:40Z"));
        assert!(timed[0].dirty);
        assert_eq!(timed[1].timestamp, nominal);
        assert!(!timed[1].dirty);
        assert_eq!(timed[2].timestamp, ts("2024-05-01T12:00:10Z"));
        assert!(!timed[2].dirty);
    }

    #[test]
    fn test_first_segment_backwards_without_previous_base() {
        let readings = vec![
            reading(0x5001, 1, 100),
            reading(0x5001, 2, 200),
            reading(REBOOT_VID, 3, 0),
        ];
        let (boundaries, _) = detect(&readings, 0, &[]);
        let nominal = ts("2024-05-01T12:00:00Z");

        let segments = segments(&readings, &boundaries, nominal, None).unwrap();
        let timed = apply(&readings, &segments).unwrap();

        assert_eq!(timed[1].timestamp, ts("2024-05-01T11:59:59Z"));
        assert_eq!(timed[0].timestamp, ts("2024-05-01T11:58:19Z"));
        assert!(timed[0].dirty && timed[1].dirty);
        assert!(!timed[2].dirty);
    }

    #[test]
    fn test_two_reboots() {
        let readings = vec![
            reading(0x5001, 1, 50),
            reading(REBOOT_VID, 2, 0),
            reading(0x5001, 3, 30),
            reading(REBOOT_VID, 4, 0),
            reading(0x5001, 5, 5),
        ];
        let (boundaries, _) = detect(&readings, 0, &[]);
        assert_eq!(boundaries.len(), 2);

        let nominal = ts("2024-05-01T12:00:00Z");
        let segments = segments(&readings, &boundaries, nominal, None).unwrap();
        assert_eq!(segments.len(), 3);
        let timed = apply(&readings, &segments).unwrap();

        // middle segment ends one second before the last reboot
        assert_eq!(timed[2].timestamp, ts("2024-05-01T11:59:59Z"));
        assert_eq!(timed[1].timestamp, ts("2024-05-01T11:59:29Z"));
        assert!(timed[1].dirty && timed[2].dirty);
        assert_eq!(timed[0].timestamp, ts("2024-05-01T11:59:28Z"));
        assert_eq!(timed[4].timestamp, ts("2024-05-01T12:00:05Z"));
        assert!(!timed[4].dirty);
    }

    #[test]
    fn test_reboot_at_start_is_clean() {
        let readings = vec![reading(REBOOT_VID, 7, 0), reading(0x5001, 8, 10)];
        let (boundaries, anomalies) = detect(&readings, 6, &[]);
        assert_eq!(boundaries.len(), 1);
        assert!(anomalies.is_empty());

        let nominal = ts("2024-05-01T12:00:00Z");
        let segments = segments(&readings, &boundaries, nominal, None).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].dirty);
    }

    #[test]
    fn test_stored_reboot_splits_readings() {
        let readings = vec![reading(0x5002, 2, 100), reading(0x5002, 4, 200)];
        let reboot = SystemReboot {
            id: 3,
            at: ts("2024-05-01T11:55:00Z"),
        };
        let (boundaries, anomalies) = detect(&readings, 0, &[reboot]);
        assert_eq!(
            boundaries,
            vec![Boundary {
                index: 1,
                id: 4,
                marker: true,
                clock_reset: false,
                at: Some(reboot.at),
            }]
        );
        // elapsed time kept growing across the reboot
        assert_eq!(anomalies.len(), 1);

        let nominal = ts("2024-05-01T11:55:00Z");
        let segments = segments(&readings, &boundaries, nominal, None).unwrap();
        let timed = apply(&readings, &segments).unwrap();

        assert_eq!(timed[0].timestamp, ts("2024-05-01T11:54:59Z"));
        assert!(timed[0].dirty);
        assert_eq!(timed[1].timestamp, ts("2024-05-01T11:58:20Z"));
        assert!(!timed[1].dirty);
    }

    #[test]
    fn test_stored_reboot_below_cursor_is_ignored() {
        let readings = vec![reading(0x5002, 6, 100), reading(0x5002, 8, 200)];
        let reboot = SystemReboot {
            id: 7,
            at: ts("2024-05-01T11:55:00Z"),
        };
        let (boundaries, _) = detect(&readings, 7, &[reboot]);
        assert!(boundaries.is_empty());

        // after every reading of the report
        let reboot = SystemReboot { id: 9, ..reboot };
        let (boundaries, _) = detect(&readings, 0, &[reboot]);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn test_stored_reboot_agrees_with_clock_reset() {
        let readings = vec![reading(0x5002, 2, 500), reading(0x5002, 4, 10)];
        let reboot = SystemReboot {
            id: 3,
            at: ts("2024-05-01T11:55:00Z"),
        };
        let (boundaries, anomalies) = detect(&readings, 0, &[reboot]);
        assert_eq!(boundaries.len(), 1);
        assert!(boundaries[0].marker && boundaries[0].clock_reset);
        assert!(anomalies.is_empty());
    }
}
