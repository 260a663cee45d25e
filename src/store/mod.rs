//! Side-effecting collaborators of the pipeline.
//!
//! Everything the worker touches outside of the pure ingest core goes through
//! one of these traits: raw report blobs, reconciled points, streamer cursors,
//! shared counters, operator alerts, the task queue, and the wall clock.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use bytes::Bytes;
use jiff::{SignedDuration, Timestamp};

use crate::{dedup::ReconciledPoint, ids::StreamerKey, ingest::StreamerCursor, worker::Task};

pub mod error;
pub mod fs;
pub mod memory;
pub mod notify;

pub use error::StoreError;
pub use notify::{Alert, TracingNotifier};

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Object store holding raw report uploads
pub trait BlobStore: Send + Sync {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Time series sink, keyed by stream slug and counter
pub trait PointStore: Send + Sync {
    /// Stores the points whose `(stream_slug, counter)` is not stored yet, the
    /// first one winning within the batch, and returns how many were stored.
    /// Implementations validate the whole batch before writing any of it.
    fn bulk_insert(&self, points: &[ReconciledPoint]) -> Result<usize, StoreError>;
    /// Ordered by counter
    fn points(&self, stream_slug: &str) -> Result<Vec<ReconciledPoint>, StoreError>;
    /// Points with `after < counter <= through`, ordered by counter
    fn range(
        &self,
        stream_slug: &str,
        after: u32,
        through: u32,
    ) -> Result<Vec<ReconciledPoint>, StoreError>;
    /// Highest-counter point of the stream whose value is `value`
    fn last_with_value(
        &self,
        stream_slug: &str,
        value: u32,
    ) -> Result<Option<ReconciledPoint>, StoreError>;
}

/// Points of one stream by counter
pub(crate) type Series = BTreeMap<u32, ReconciledPoint>;

pub(crate) fn series_range(series: Option<&Series>, after: u32, through: u32) -> Vec<ReconciledPoint> {
    match series {
        Some(series) if after < through => series
            .range(after + 1..=through)
            .map(|(_, point)| point.clone())
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn series_last_with_value(series: Option<&Series>, value: u32) -> Option<ReconciledPoint> {
    series?.values().rev().find(|p| p.value == value).cloned()
}

pub trait CursorStore: Send + Sync {
    fn load(&self, key: StreamerKey) -> Result<Option<StreamerCursor>, StoreError>;
    /// All cursors of a device, ordered by streamer index
    fn device_cursors(&self, device_id: u32) -> Result<Vec<StreamerCursor>, StoreError>;
    /// Never moves `last_processed_id` backwards
    fn save(&self, cursor: &StreamerCursor) -> Result<(), StoreError>;
}

/// Shared expiring counters
pub trait CounterStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;
    /// Sets `key` only if absent. Returns whether it was set.
    fn add(&self, key: &str, value: u64, ttl: SignedDuration) -> Result<bool, StoreError>;
    /// Increments an existing key, keeping its expiry. `None` if absent.
    fn incr(&self, key: &str) -> Result<Option<u64>, StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Operator notification channel
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert) -> Result<(), StoreError>;
}

pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, task: Task, delay: SignedDuration) -> Result<(), StoreError>;
}

/// Maps lock poisoning to [`StoreError::Poisoned`]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Poisoned)
}
