//! Threshold-based anomaly detection over the aggregated window.
//!
//! Every enabled rule is evaluated fresh each publish cycle against the
//! current window; an alert is re-emitted for as long as its condition
//! holds, and deduplication is left to the consumer. All comparisons are
//! strictly greater-than, so a value exactly at the limit never fires.

use crate::aggregate::WindowBucket;
use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_SOURCE_LIMIT: u64 = 50;
pub const DEFAULT_SPIKE_LIMIT: u64 = 2000;
pub const DEFAULT_FLOOD_LIMIT: u64 = 500;

/// One threshold rule's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleLimit {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub limit: u64,
}

fn enabled_by_default() -> bool {
    true
}

impl RuleLimit {
    pub const fn new(limit: u64) -> Self {
        RuleLimit {
            enabled: true,
            limit,
        }
    }

    pub const fn disabled(limit: u64) -> Self {
        RuleLimit {
            enabled: false,
            limit,
        }
    }
}

/// The enabled rules and their limits. Configuration, not code: nothing in
/// [`evaluate`] hard-codes a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionRules {
    /// Packets from one source address within the retention horizon.
    pub suspicious_source: RuleLimit,
    /// Total bytes in the most recent window bucket.
    pub bandwidth_spike: RuleLimit,
    /// Packets for one protocol label within the retention horizon.
    pub protocol_flood: RuleLimit,
}

impl Default for DetectionRules {
    fn default() -> Self {
        DetectionRules {
            suspicious_source: RuleLimit::new(DEFAULT_SOURCE_LIMIT),
            bandwidth_spike: RuleLimit::new(DEFAULT_SPIKE_LIMIT),
            protocol_flood: RuleLimit::new(DEFAULT_FLOOD_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SuspiciousSource,
    BandwidthSpike,
    ProtocolFlood,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SuspiciousSource => "suspicious_source",
            AlertKind::BandwidthSpike => "bandwidth_spike",
            AlertKind::ProtocolFlood => "protocol_flood",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fired rule: which rule, for whom, what was observed, and the window
/// second it was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub rule: AlertKind,
    pub subject: String,
    pub observed: u64,
    pub second: i64,
}

/// Runs every enabled rule against the retained window. `recent_events`
/// must already be filtered to the retention horizon; `buckets` are the
/// aggregates over those same events. Output order is deterministic:
/// sources, then the spike, then protocols, each alphabetical.
pub fn evaluate(
    buckets: &[WindowBucket],
    recent_events: &[Event],
    rules: &DetectionRules,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let window_end = match buckets.last() {
        Some(bucket) => bucket.second,
        None => return alerts,
    };

    if rules.suspicious_source.enabled {
        let mut per_source: BTreeMap<&str, u64> = BTreeMap::new();
        for event in recent_events {
            *per_source.entry(event.source.as_str()).or_default() += 1;
        }
        for (source, count) in per_source {
            if count > rules.suspicious_source.limit {
                alerts.push(Alert {
                    rule: AlertKind::SuspiciousSource,
                    subject: source.to_string(),
                    observed: count,
                    second: window_end,
                });
            }
        }
    }

    if rules.bandwidth_spike.enabled {
        // Latest-keyed bucket only; earlier spikes already had their cycle.
        if let Some(latest) = buckets.last() {
            if latest.bytes > rules.bandwidth_spike.limit {
                alerts.push(Alert {
                    rule: AlertKind::BandwidthSpike,
                    subject: latest.second.to_string(),
                    observed: latest.bytes,
                    second: latest.second,
                });
            }
        }
    }

    if rules.protocol_flood.enabled {
        let mut per_protocol: BTreeMap<&str, u64> = BTreeMap::new();
        for bucket in buckets {
            for (protocol, counts) in &bucket.by_protocol {
                *per_protocol.entry(protocol.as_str()).or_default() += counts.packets;
            }
        }
        for (protocol, count) in per_protocol {
            if count > rules.protocol_flood.limit {
                alerts.push(Alert {
                    rule: AlertKind::ProtocolFlood,
                    subject: protocol.to_string(),
                    observed: count,
                    second: window_end,
                });
            }
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use chrono::{TimeZone, Utc};

    fn event(second: i64, source: &str, protocol: &str, length: u64) -> Event {
        Event {
            timestamp: Utc.timestamp_opt(second, 0).unwrap(),
            source: source.to_string(),
            destination: None,
            protocol: protocol.to_string(),
            length,
        }
    }

    fn run(events: &[Event], rules: &DetectionRules) -> Vec<Alert> {
        let now = events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
        let buckets = aggregate(events, now, 30);
        evaluate(&buckets, events, rules)
    }

    fn flood_from(source: &str, count: usize) -> Vec<Event> {
        (0..count)
            .map(|i| event(10 + (i % 5) as i64, source, "TCP", 10))
            .collect()
    }

    #[test]
    fn source_over_limit_fires_once_with_observed_count() {
        let rules = DetectionRules::default();
        let events = flood_from("10.0.0.5", 51);
        let alerts = run(&events, &rules);
        let source_alerts: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.rule == AlertKind::SuspiciousSource)
            .collect();
        assert_eq!(source_alerts.len(), 1);
        assert_eq!(source_alerts[0].subject, "10.0.0.5");
        assert_eq!(source_alerts[0].observed, 51);
    }

    #[test]
    fn source_at_limit_does_not_fire() {
        let rules = DetectionRules::default();
        let events = flood_from("10.0.0.5", 50);
        let alerts = run(&events, &rules);
        assert!(alerts
            .iter()
            .all(|a| a.rule != AlertKind::SuspiciousSource));
    }

    #[test]
    fn bandwidth_spike_names_latest_bucket() {
        let rules = DetectionRules::default();
        let events = vec![
            event(10, "10.0.0.1", "TCP", 500),
            event(11, "10.0.0.1", "TCP", 2500),
        ];
        let alerts = run(&events, &rules);
        let spike: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.rule == AlertKind::BandwidthSpike)
            .collect();
        assert_eq!(spike.len(), 1);
        assert_eq!(spike[0].second, 11);
        assert_eq!(spike[0].observed, 2500);
        assert_eq!(spike[0].subject, "11");
    }

    #[test]
    fn bandwidth_exactly_at_limit_does_not_fire() {
        let rules = DetectionRules::default();
        let events = vec![event(10, "10.0.0.1", "TCP", 2000)];
        let alerts = run(&events, &rules);
        assert!(alerts.iter().all(|a| a.rule != AlertKind::BandwidthSpike));
    }

    #[test]
    fn spike_in_older_bucket_is_ignored() {
        let rules = DetectionRules::default();
        let events = vec![
            event(10, "10.0.0.1", "TCP", 9000),
            event(11, "10.0.0.1", "TCP", 10),
        ];
        let alerts = run(&events, &rules);
        assert!(alerts.iter().all(|a| a.rule != AlertKind::BandwidthSpike));
    }

    #[test]
    fn protocol_flood_counts_across_window() {
        let mut rules = DetectionRules::default();
        rules.protocol_flood.limit = 5;
        rules.suspicious_source.enabled = false;
        rules.bandwidth_spike.enabled = false;
        let mut events = flood_from("10.0.0.1", 6);
        events.push(event(12, "10.0.0.2", "UDP", 10));
        let alerts = run(&events, &rules);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, AlertKind::ProtocolFlood);
        assert_eq!(alerts[0].subject, "TCP");
        assert_eq!(alerts[0].observed, 6);
    }

    #[test]
    fn disabled_rule_never_fires() {
        let mut rules = DetectionRules::default();
        rules.suspicious_source = RuleLimit::disabled(0);
        let events = flood_from("10.0.0.5", 200);
        let alerts = run(&events, &rules);
        assert!(alerts
            .iter()
            .all(|a| a.rule != AlertKind::SuspiciousSource));
    }

    #[test]
    fn independent_rules_can_fire_together() {
        let mut rules = DetectionRules::default();
        rules.suspicious_source.limit = 2;
        rules.protocol_flood.limit = 2;
        rules.bandwidth_spike.limit = 100;
        let events = vec![
            event(10, "10.0.0.5", "TCP", 80),
            event(10, "10.0.0.5", "TCP", 80),
            event(10, "10.0.0.5", "TCP", 80),
        ];
        let alerts = run(&events, &rules);
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.rule).collect();
        assert!(kinds.contains(&AlertKind::SuspiciousSource));
        assert!(kinds.contains(&AlertKind::BandwidthSpike));
        assert!(kinds.contains(&AlertKind::ProtocolFlood));
    }

    #[test]
    fn empty_window_produces_no_alerts() {
        let rules = DetectionRules::default();
        assert!(evaluate(&[], &[], &rules).is_empty());
    }

    #[test]
    fn rules_deserialize_with_partial_overrides() {
        let rules: DetectionRules =
            serde_json::from_str(r#"{"bandwidth_spike":{"limit":9999}}"#).unwrap();
        assert_eq!(rules.bandwidth_spike.limit, 9999);
        assert!(rules.bandwidth_spike.enabled);
        assert_eq!(rules.suspicious_source.limit, DEFAULT_SOURCE_LIMIT);
    }
}
