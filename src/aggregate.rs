//! Per-second window aggregation over the buffered events.
//!
//! Buckets are rebuilt from a buffer copy on every publish cycle. The
//! buffer is small and bounded, so the O(n) rescan is cheaper than keeping
//! incremental counters consistent under eviction.

use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Packet and byte totals for one protocol label inside a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolCounts {
    pub packets: u64,
    pub bytes: u64,
}

/// Aggregate of all buffered events sharing one floored second.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowBucket {
    /// Bucket key: event timestamp truncated to whole epoch seconds.
    pub second: i64,
    pub packets: u64,
    pub bytes: u64,
    pub by_protocol: BTreeMap<String, ProtocolCounts>,
    pub by_source: BTreeMap<String, u64>,
}

/// Builds the ordered, sparse bucket sequence covering
/// `[now - horizon_secs, now]`. Seconds with no events are omitted; events
/// outside the horizon are pruned. Out-of-order timestamps land in their
/// own bucket without disturbing neighbours.
pub fn aggregate(events: &[Event], now: DateTime<Utc>, horizon_secs: u64) -> Vec<WindowBucket> {
    let now_sec = now.timestamp();
    let cutoff = now_sec - horizon_secs as i64;
    let mut buckets: BTreeMap<i64, WindowBucket> = BTreeMap::new();

    for event in events {
        let second = event.floored_second();
        if second < cutoff || second > now_sec {
            continue;
        }
        let bucket = buckets.entry(second).or_insert_with(|| WindowBucket {
            second,
            ..WindowBucket::default()
        });
        bucket.packets += 1;
        bucket.bytes += event.length;
        let proto = bucket.by_protocol.entry(event.protocol.clone()).or_default();
        proto.packets += 1;
        proto.bytes += event.length;
        *bucket.by_source.entry(event.source.clone()).or_default() += 1;
    }

    buckets.into_values().collect()
}

/// Drops events whose floored second falls outside `[now - horizon, now]`,
/// preserving order. The detector's per-source counting runs over this.
pub fn retain_within_horizon(events: &mut Vec<Event>, now: DateTime<Utc>, horizon_secs: u64) {
    let now_sec = now.timestamp();
    let cutoff = now_sec - horizon_secs as i64;
    events.retain(|e| {
        let second = e.floored_second();
        second >= cutoff && second <= now_sec
    });
}
