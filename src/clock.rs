//! Device clock to UTC conversion.
//!
//! A reading timestamp is either seconds elapsed since the device's time base
//! (its last reboot), or, when bit 31 is set, seconds since 2000-01-01T00:00:00Z
//! from a real-time clock.

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use thiserror::Error;

pub const RTC_FLAG: u32 = 1 << 31;
pub const Y2K_UNIX_SECONDS: i64 = 946_684_800;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClockError {
    #[error("timestamp out of range `{0}`")]
    OutOfRange(String),
}

impl From<jiff::Error> for ClockError {
    fn from(value: jiff::Error) -> Self {
        Self::OutOfRange(value.to_string())
    }
}

pub fn y2k() -> Timestamp {
    Timestamp::constant(Y2K_UNIX_SECONDS, 0)
}

pub fn is_rtc(device_ts: u32) -> bool {
    device_ts & RTC_FLAG != 0
}

/// Device time zero for a report: received time minus the seconds the
/// device says elapsed before it sent the report.
pub fn base_time(received: Timestamp, sent_timestamp: u32) -> Result<Timestamp, ClockError> {
    Ok(received.checked_sub(SignedDuration::from_secs(sent_timestamp as i64))?)
}

pub fn resolve_timestamp(base: Timestamp, device_ts: u32) -> Result<Timestamp, ClockError> {
    if is_rtc(device_ts) {
        let seconds = (device_ts & !RTC_FLAG) as i64;
        return Ok(y2k().checked_add(SignedDuration::from_secs(seconds))?);
    }
    Ok(base.checked_add(SignedDuration::from_secs(device_ts as i64))?)
}

/// Time base that places a reading with `device_ts` at `anchor`.
/// RTC readings carry no elapsed time, so they are treated as time zero.
pub fn rebase(anchor: Timestamp, device_ts: u32) -> Result<Timestamp, ClockError> {
    if is_rtc(device_ts) {
        return Ok(anchor);
    }
    Ok(anchor.checked_sub(SignedDuration::from_secs(device_ts as i64))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn test_relative() {
        let base = base_time(ts("2024-05-01T12:00:00Z"), 3600).unwrap();
        assert_eq!(base, ts("2024-05-01T11:00:00Z"));
        assert_eq!(
            resolve_timestamp(base, 60).unwrap(),
            ts("2024-05-01T11:01:00Z")
        );
    }

    #[test]
    fn test_rtc_ignores_base() {
        let base = ts("2024-05-01T12:00:00Z");
        assert_eq!(resolve_timestamp(base, RTC_FLAG).unwrap(), y2k());
        assert_eq!(
            resolve_timestamp(base, RTC_FLAG | 86_400).unwrap(),
            ts("2000-01-02T00:00:00Z")
        );
    }

    #[test]
    fn test_rebase() {
        let anchor = ts("2024-05-01T12:00:00Z");
        let base = rebase(anchor, 30).unwrap();
        assert_eq!(resolve_timestamp(base, 30).unwrap(), anchor);
        assert_eq!(rebase(anchor, RTC_FLAG | 5).unwrap(), anchor);
    }
}
