use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{ids::StreamerKey, report::selector::StreamerSelector};

use super::reboot::SystemReboot;

/// Persisted per device streamer. `last_processed_id` is the only ordering
/// checkpoint and never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerCursor {
    pub streamer: StreamerKey,
    pub selector: StreamerSelector,
    pub last_processed_id: u32,
    /// device time zero of the last clean segment
    pub last_base: Option<Timestamp>,
    pub reboot_count: u32,
}

impl StreamerCursor {
    pub fn new(streamer: StreamerKey, selector: StreamerSelector) -> Self {
        Self {
            streamer,
            selector,
            last_processed_id: 0,
            last_base: None,
            reboot_count: 0,
        }
    }

    /// System streamers vouch for the counter ranges of their siblings
    pub fn certifies_completeness(&self) -> bool {
        self.selector.is_system()
    }

    pub fn advance_to(&mut self, id: u32) {
        self.last_processed_id = self.last_processed_id.max(id);
    }
}

/// Cursor of one streamer as seen by a sibling, plus the counter of its
/// latest completeness marker.
///
/// Markers are written with the points, ahead of the cursor, so after a
/// normal commit `certified_through` equals `last_processed_id`. It trails
/// the cursor only when the point store lost or never got a batch the
/// cursor store has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingCursor {
    pub cursor: StreamerCursor,
    pub certified_through: Option<u32>,
}

impl SiblingCursor {
    /// Whether this streamer has processed and certified counters up to `id`
    pub fn covers(&self, id: u32) -> bool {
        self.cursor.last_processed_id >= id && self.certified_through.is_some_and(|c| c >= id)
    }
}

/// Every known streamer cursor of one device
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub streamers: Vec<SiblingCursor>,
    /// reboots stored by the system streamers above the evaluated streamer's
    /// cursor, ordered by counter
    pub reboots: Vec<SystemReboot>,
}

impl DeviceSnapshot {
    pub fn cursor(&self, key: StreamerKey) -> Option<&StreamerCursor> {
        self.streamers
            .iter()
            .map(|s| &s.cursor)
            .find(|c| c.streamer == key)
    }

    pub fn siblings(&self, key: StreamerKey) -> impl Iterator<Item = &SiblingCursor> {
        self.streamers.iter().filter(move |s| s.cursor.streamer != key)
    }
}
