//! The immutable published view of the pipeline.

use crate::aggregate::WindowBucket;
use crate::buffer::RejectCounters;
use crate::detect::Alert;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time copy of aggregates, alerts and counters. Consumers never
/// see a torn state, and two snapshots of an unchanged buffer compare
/// equal: nothing here depends on the wall clock at publish time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Highest event timestamp the buffer has seen; the reference instant
    /// for the retention horizon.
    pub latest_event: Option<DateTime<Utc>>,
    /// Retained per-second buckets, oldest first.
    pub buckets: Vec<WindowBucket>,
    pub alerts: Vec<Alert>,
    pub buffer_len: usize,
    pub buffer_capacity: usize,
    /// Valid events accepted since startup, including evicted ones.
    pub accepted: u64,
    pub rejected: RejectCounters,
}

impl Snapshot {
    pub fn total_packets(&self) -> u64 {
        self.buckets.iter().map(|b| b.packets).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.buckets.iter().map(|b| b.bytes).sum()
    }

    /// Heaviest source addresses over the retained window, descending by
    /// packet count, address order breaking ties.
    pub fn top_sources(&self, n: usize) -> Vec<(String, u64)> {
        let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
        for bucket in &self.buckets {
            for (source, count) in &bucket.by_source {
                *totals.entry(source.as_str()).or_default() += count;
            }
        }
        let mut ranked: Vec<(String, u64)> = totals
            .into_iter()
            .map(|(s, c)| (s.to_string(), c))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}
