use std::fmt;

use jiff::Timestamp;
use serde::Serialize;

use crate::report::ReportFooter;

use super::TimedReading;

/// Tolerated firmware oddities. Logged against the reading, never blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Anomaly {
    CounterOutOfRange {
        id: u32,
        lowest_id: u32,
        highest_id: u32,
    },
    FutureTimestamp {
        id: u32,
        timestamp: Timestamp,
        now: Timestamp,
    },
    /// Only one of the two reboot signals fired
    RebootSignalMismatch {
        id: u32,
        marker: bool,
        clock_reset: bool,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CounterOutOfRange {
                id,
                lowest_id,
                highest_id,
            } => write!(
                f,
                "reading {id} outside declared range {lowest_id}..={highest_id}"
            ),
            Self::FutureTimestamp { id, timestamp, now } => {
                write!(f, "reading {id} in the future: {timestamp} > {now}")
            }
            Self::RebootSignalMismatch {
                id,
                marker,
                clock_reset,
            } => write!(
                f,
                "reading {id} reboot signals disagree (marker={marker}, clock_reset={clock_reset})"
            ),
        }
    }
}

pub fn out_of_range(readings: &[TimedReading], footer: &ReportFooter) -> Vec<Anomaly> {
    readings
        .iter()
        .filter(|r| !footer.contains(r.reading.id))
        .map(|r| Anomaly::CounterOutOfRange {
            id: r.reading.id,
            lowest_id: footer.lowest_id,
            highest_id: footer.highest_id,
        })
        .collect()
}

pub fn in_future(readings: &[TimedReading], now: Timestamp) -> Vec<Anomaly> {
    readings
        .iter()
        .filter(|r| r.timestamp > now)
        .map(|r| Anomaly::FutureTimestamp {
            id: r.reading.id,
            timestamp: r.timestamp,
            now,
        })
        .collect()
}
