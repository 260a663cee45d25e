//! Bounded retries for deferred ranges, and the per-streamer busy counter.
//!
//! Both live in the shared [`CounterStore`] so that every worker sees the
//! same attempt counts. Counters expire on their own; abandoned ranges are
//! forgotten even if nobody clears them.

use std::sync::Arc;

use jiff::SignedDuration;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::{RetryConfig, StreamerThrottleConfig},
    ids::StreamerKey,
    store::{CounterStore, StoreError},
};

pub fn range_key(device_slug: &str, start_id: u32, end_id: u32) -> String {
    format!("delay-process:{device_slug}:{start_id}:{end_id}")
}

pub fn throttle_key(streamer: StreamerKey) -> String {
    format!("streamer-processing-attempt:{streamer}")
}

/// Sets `key` to 1 if absent, otherwise increments it
fn bump(counters: &dyn CounterStore, key: &str, ttl: SignedDuration) -> Result<u64, StoreError> {
    if counters.add(key, 1, ttl)? {
        return Ok(1);
    }
    match counters.incr(key)? {
        Some(n) => Ok(n),
        // expired in between
        None => {
            counters.add(key, 1, ttl)?;
            Ok(1)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: SignedDuration },
    Exhausted { attempts: u32 },
}

#[derive(Clone)]
pub struct RetryScheduler {
    counters: Arc<dyn CounterStore>,
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(counters: Arc<dyn CounterStore>, config: RetryConfig) -> Self {
        Self { counters, config }
    }

    /// Returns the attempt number, starting at 1
    pub fn record_attempt(&self, key: &str) -> Result<u32, StoreError> {
        let n = bump(self.counters.as_ref(), key, self.config.expiry())?;
        Ok(n.min(u32::MAX as u64) as u32)
    }

    pub fn attempts(&self, key: &str) -> Result<u32, StoreError> {
        Ok(self.counters.get(key)?.unwrap_or(0).min(u32::MAX as u64) as u32)
    }

    pub fn should_retry(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.attempts(key)? < self.config.max_attempts)
    }

    pub fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.counters.delete(key)
    }

    /// Records an attempt and says whether another one is allowed
    pub fn decide(&self, key: &str) -> Result<RetryDecision, StoreError> {
        let attempt = self.record_attempt(key)?;
        debug!("{key} attempt {attempt}/{}", self.config.max_attempts);
        if attempt < self.config.max_attempts {
            Ok(RetryDecision::Retry {
                attempt,
                delay: self.config.delay(),
            })
        } else {
            self.clear(key)?;
            Ok(RetryDecision::Exhausted { attempts: attempt })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThrottleDecision {
    Acquired,
    Busy {
        collisions: u32,
        delay: SignedDuration,
        notify: bool,
    },
    GiveUp {
        collisions: u32,
    },
}

/// Keeps two workers off the same streamer
#[derive(Clone)]
pub struct StreamerThrottle {
    counters: Arc<dyn CounterStore>,
    config: StreamerThrottleConfig,
}

impl StreamerThrottle {
    pub fn new(counters: Arc<dyn CounterStore>, config: StreamerThrottleConfig) -> Self {
        Self { counters, config }
    }

    pub fn acquire(&self, streamer: StreamerKey) -> Result<ThrottleDecision, StoreError> {
        let key = throttle_key(streamer);
        let n = bump(self.counters.as_ref(), &key, self.config.expiry())?;
        if n == 1 {
            return Ok(ThrottleDecision::Acquired);
        }

        let collisions = (n - 1).min(u32::MAX as u64) as u32;
        if collisions >= self.config.give_up_after {
            self.counters.delete(&key)?;
            return Ok(ThrottleDecision::GiveUp { collisions });
        }

        Ok(ThrottleDecision::Busy {
            collisions,
            delay: self.config.reschedule(),
            notify: self.config.notify_every > 0 && collisions % self.config.notify_every == 0,
        })
    }

    pub fn release(&self, streamer: StreamerKey) -> Result<(), StoreError> {
        self.counters.delete(&throttle_key(streamer))
    }
}
