//! In-process collaborators for tests and single-node runs.

use std::{
    collections::{HashMap, btree_map::Entry},
    sync::{Arc, Mutex},
};

use jiff::{SignedDuration, Timestamp};
use tracing::warn;

use crate::{dedup::ReconciledPoint, ids::StreamerKey, ingest::StreamerCursor, worker::Task};

use super::{
    Alert, Clock, CounterStore, CursorStore, Notifier, PointStore, Series, StoreError, TaskQueue,
    lock, series_last_with_value, series_range,
};

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: SignedDuration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add(by).unwrap_or(Timestamp::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPointStore {
    streams: Mutex<HashMap<String, Series>>,
}

impl MemoryPointStore {
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.streams)?.values().map(Series::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl PointStore for MemoryPointStore {
    fn bulk_insert(&self, points: &[ReconciledPoint]) -> Result<usize, StoreError> {
        let mut streams = lock(&self.streams)?;
        let mut stored = 0;
        for point in points {
            let series = streams.entry(point.stream_slug.clone()).or_default();
            if let Entry::Vacant(slot) = series.entry(point.counter) {
                slot.insert(point.clone());
                stored += 1;
            }
        }
        Ok(stored)
    }

    fn points(&self, stream_slug: &str) -> Result<Vec<ReconciledPoint>, StoreError> {
        Ok(lock(&self.streams)?
            .get(stream_slug)
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default())
    }

    fn range(
        &self,
        stream_slug: &str,
        after: u32,
        through: u32,
    ) -> Result<Vec<ReconciledPoint>, StoreError> {
        Ok(series_range(lock(&self.streams)?.get(stream_slug), after, through))
    }

    fn last_with_value(
        &self,
        stream_slug: &str,
        value: u32,
    ) -> Result<Option<ReconciledPoint>, StoreError> {
        Ok(series_last_with_value(lock(&self.streams)?.get(stream_slug), value))
    }
}

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<StreamerKey, StreamerCursor>>,
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, key: StreamerKey) -> Result<Option<StreamerCursor>, StoreError> {
        Ok(lock(&self.cursors)?.get(&key).cloned())
    }

    fn device_cursors(&self, device_id: u32) -> Result<Vec<StreamerCursor>, StoreError> {
        let mut cursors: Vec<_> = lock(&self.cursors)?
            .values()
            .filter(|c| c.streamer.device_id == device_id)
            .cloned()
            .collect();
        cursors.sort_by_key(|c| c.streamer.index);
        Ok(cursors)
    }

    fn save(&self, cursor: &StreamerCursor) -> Result<(), StoreError> {
        let mut cursors = lock(&self.cursors)?;
        let mut next = cursor.clone();
        if let Some(current) = cursors.get(&cursor.streamer) {
            if current.last_processed_id > next.last_processed_id {
                warn!(
                    "cursor {} already at {}, not rewinding to {}",
                    cursor.streamer, current.last_processed_id, next.last_processed_id
                );
                next.last_processed_id = current.last_processed_id;
            }
        }
        cursors.insert(next.streamer, next);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires: Timestamp,
}

pub struct MemoryCounterStore {
    clock: Arc<dyn Clock>,
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self, counters: &mut HashMap<String, Counter>, key: &str) -> Option<Counter> {
        let now = self.clock.now();
        match counters.get(key) {
            Some(counter) if counter.expires > now => Some(*counter),
            Some(_) => {
                counters.remove(key);
                None
            }
            None => None,
        }
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut counters = lock(&self.counters)?;
        Ok(self.live(&mut counters, key).map(|c| c.value))
    }

    fn add(&self, key: &str, value: u64, ttl: SignedDuration) -> Result<bool, StoreError> {
        let mut counters = lock(&self.counters)?;
        if self.live(&mut counters, key).is_some() {
            return Ok(false);
        }
        let expires = self.clock.now().checked_add(ttl).unwrap_or(Timestamp::MAX);
        counters.insert(key.to_string(), Counter { value, expires });
        Ok(true)
    }

    fn incr(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut counters = lock(&self.counters)?;
        if self.live(&mut counters, key).is_none() {
            return Ok(None);
        }
        Ok(counters.get_mut(key).map(|c| {
            c.value += 1;
            c.value
        }))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.counters)?.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryNotifier {
    pub fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(lock(&self.alerts)?.clone())
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, alert: &Alert) -> Result<(), StoreError> {
        lock(&self.alerts)?.push(alert.clone());
        Ok(())
    }
}

/// Keeps enqueued tasks instead of running them
#[derive(Debug, Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<(Task, SignedDuration)>>,
}

impl RecordingQueue {
    pub fn take(&self) -> Result<Vec<(Task, SignedDuration)>, StoreError> {
        Ok(std::mem::take(&mut *lock(&self.tasks)?))
    }
}

impl TaskQueue for RecordingQueue {
    fn enqueue(&self, task: Task, delay: SignedDuration) -> Result<(), StoreError> {
        lock(&self.tasks)?.push((task, delay));
        Ok(())
    }
}
