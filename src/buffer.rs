//! Bounded FIFO buffer of recent events, the ingestion point of the
//! pipeline. Overflow evicts the oldest event rather than rejecting the
//! new one; only malformed records are dropped, counted per reason.

use crate::event::{Event, RawRecord, RejectReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

/// Per-reason counts of records dropped at the ingestion boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RejectCounters {
    pub bad_timestamp: u64,
    pub bad_length: u64,
    pub bad_address: u64,
}

impl RejectCounters {
    fn record(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::BadTimestamp => self.bad_timestamp += 1,
            RejectReason::BadLength => self.bad_length += 1,
            RejectReason::BadAddress => self.bad_address += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.bad_timestamp + self.bad_length + self.bad_address
    }
}

/// Ordered oldest-first store of at most `capacity` events.
#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<Event>,
    capacity: usize,
    accepted: u64,
    rejected: RejectCounters,
    latest_seen: Option<DateTime<Utc>>,
}

impl EventBuffer {
    /// `capacity` must be positive; the config layer rejects zero before a
    /// buffer is ever built.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        EventBuffer {
            events: VecDeque::with_capacity(capacity),
            capacity,
            accepted: 0,
            rejected: RejectCounters::default(),
            latest_seen: None,
        }
    }

    /// Validates and appends one record. Never blocks and never reports an
    /// error back to the producer: malformed records increment a rejection
    /// counter, and overflow evicts exactly the oldest buffered event.
    pub fn push(&mut self, record: RawRecord) {
        match Event::validate(record) {
            Ok(event) => self.push_event(event),
            Err(reason) => {
                trace!(reason = reason.as_str(), "dropped malformed record");
                self.rejected.record(reason);
            }
        }
    }

    /// Appends an already-validated event, enforcing the capacity
    /// invariant on this insert.
    pub fn push_event(&mut self, event: Event) {
        if self.latest_seen.map_or(true, |seen| event.timestamp > seen) {
            self.latest_seen = Some(event.timestamp);
        }
        self.events.push_back(event);
        if self.events.len() > self.capacity {
            self.events.pop_front();
        }
        self.accepted += 1;
    }

    /// Defensive copy of the current contents, oldest first. Aggregation
    /// and detection run against this copy outside any lock.
    pub fn snapshot_events(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Highest event timestamp ever pushed. Survives eviction, so the
    /// retention horizon never moves backwards under overflow.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.latest_seen
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total count of valid events ever accepted, including evicted ones.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejections(&self) -> RejectCounters {
        self.rejected
    }
}
