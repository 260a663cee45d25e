use crate::{ids::StreamerKey, report::selector::StreamerSelector};

use super::cursor::DeviceSnapshot;

/// System siblings that still have to certify the block starting at `start_id`
/// before `streamer` may be reconciled. Empty means the gate is open.
pub fn waiting_on(
    streamer: StreamerKey,
    selector: StreamerSelector,
    start_id: u32,
    snapshot: &DeviceSnapshot,
) -> Vec<StreamerKey> {
    if selector.is_system() {
        return Vec::new();
    }

    snapshot
        .siblings(streamer)
        .filter(|s| s.cursor.certifies_completeness())
        .filter(|s| !s.covers(start_id))
        .map(|s| s.cursor.streamer)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::cursor::{SiblingCursor, StreamerCursor};

    fn sibling(index: u8, selector: StreamerSelector, last: u32, marker: Option<u32>) -> SiblingCursor {
        let mut cursor = StreamerCursor::new(StreamerKey::new(0xa, index), selector);
        cursor.last_processed_id = last;
        SiblingCursor {
            cursor,
            certified_through: marker,
        }
    }

    #[test]
    fn test_system_is_never_gated() {
        let snapshot = DeviceSnapshot::default();
        let key = StreamerKey::new(0xa, 0);
        assert!(waiting_on(key, StreamerSelector::System, 100, &snapshot).is_empty());
    }

    #[test]
    fn test_no_system_sibling() {
        let snapshot = DeviceSnapshot {
            streamers: vec![sibling(2, StreamerSelector::User, 0, None)],
            ..DeviceSnapshot::default()
        };
        let key = StreamerKey::new(0xa, 1);
        assert!(waiting_on(key, StreamerSelector::User, 100, &snapshot).is_empty());
    }

    #[test]
    fn test_waits_for_lagging_system_sibling() {
        let snapshot = DeviceSnapshot {
            streamers: vec![sibling(0, StreamerSelector::System, 50, Some(50))],
            ..DeviceSnapshot::default()
        };
        let key = StreamerKey::new(0xa, 1);
        assert_eq!(
            waiting_on(key, StreamerSelector::User, 100, &snapshot),
            vec![StreamerKey::new(0xa, 0)]
        );
        assert!(waiting_on(key, StreamerSelector::User, 50, &snapshot).is_empty());
    }

    #[test]
    fn test_waits_for_missing_marker() {
        let snapshot = DeviceSnapshot {
            streamers: vec![sibling(0, StreamerSelector::System, 500, None)],
            ..DeviceSnapshot::default()
        };
        let key = StreamerKey::new(0xa, 1);
        assert_eq!(waiting_on(key, StreamerSelector::User, 100, &snapshot).len(), 1);
    }

    #[test]
    fn test_marker_behind_range_start() {
        // cursor moved on, but the last marker only certifies up to 80
        let snapshot = DeviceSnapshot {
            streamers: vec![sibling(0, StreamerSelector::System, 500, Some(80))],
            ..DeviceSnapshot::default()
        };
        let key = StreamerKey::new(0xa, 1);
        assert_eq!(
            waiting_on(key, StreamerSelector::User, 100, &snapshot),
            vec![StreamerKey::new(0xa, 0)]
        );
        assert!(waiting_on(key, StreamerSelector::User, 80, &snapshot).is_empty());
    }
}
