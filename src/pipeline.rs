//! The monitor: shared bounded buffer, periodic snapshot publisher, and
//! the contracts offered to the capture collaborator and to consumers.
//!
//! One producer context pushes records; the publisher task runs on a
//! fixed interval. The buffer lock is held only for a push or for the
//! copy step of a publish; aggregation and detection work entirely off
//! the copy, so neither side can stall the other.

use crate::aggregate::{aggregate, retain_within_horizon};
use crate::buffer::EventBuffer;
use crate::config::MonitorConfig;
use crate::detect::evaluate;
use crate::event::RawRecord;
use crate::sink::RecordSink;
use crate::snapshot::Snapshot;
use anyhow::Result;
use crossbeam_channel::{unbounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

pub struct Monitor {
    config: MonitorConfig,
    buffer: Mutex<EventBuffer>,
    snapshot_tx: tokio::sync::watch::Sender<Arc<Snapshot>>,
    sinks: Mutex<Vec<Box<dyn RecordSink>>>,
    running: AtomicBool,
}

impl Monitor {
    /// Fails fast on invalid configuration; nothing is clamped.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let buffer = EventBuffer::new(config.capacity);
        let (snapshot_tx, _) = tokio::sync::watch::channel(Arc::new(Snapshot::default()));
        Ok(Monitor {
            config,
            buffer: Mutex::new(buffer),
            snapshot_tx,
            sinks: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Ingestion contract: validate-and-buffer one untrusted record.
    /// Total over its input; malformed records only bump a counter.
    pub fn push(&self, record: RawRecord) {
        let mut buffer = self.buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        buffer.push(record);
    }

    /// Cloneable channel end for the capture collaborator, plus the drain
    /// thread's handle. The thread moves records into the buffer; dropping
    /// every sender (or calling [`Monitor::stop`]) ends it, and joining
    /// the handle guarantees every sent record has been pushed.
    pub fn ingest_sender(self: &Arc<Self>) -> (Sender<RawRecord>, thread::JoinHandle<()>) {
        let (tx, rx) = unbounded::<RawRecord>();
        let monitor = Arc::clone(self);
        let drain = thread::spawn(move || {
            for record in rx {
                if !monitor.is_running() {
                    break;
                }
                monitor.push(record);
            }
        });
        (tx, drain)
    }

    pub fn add_sink(&self, sink: Box<dyn RecordSink>) {
        self.sinks.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(sink);
    }

    /// One publish cycle: copy the buffer under a short lock, then
    /// aggregate, detect, swap the published snapshot, notify subscribers
    /// and drive the sinks — all off-lock. A sink failure is logged and
    /// never corrupts the cycle or the next one.
    pub fn publish(&self) -> Arc<Snapshot> {
        let (mut events, buffer_len, buffer_capacity, accepted, rejected, latest_event) = {
            let buffer = self.buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            (
                buffer.snapshot_events(),
                buffer.len(),
                buffer.capacity(),
                buffer.accepted(),
                buffer.rejections(),
                buffer.latest_timestamp(),
            )
        };

        let (buckets, alerts) = match latest_event {
            Some(now) => {
                retain_within_horizon(&mut events, now, self.config.retention_secs);
                let buckets = aggregate(&events, now, self.config.retention_secs);
                let alerts = evaluate(&buckets, &events, &self.config.rules);
                (buckets, alerts)
            }
            None => (Vec::new(), Vec::new()),
        };

        for alert in &alerts {
            warn!(
                rule = alert.rule.as_str(),
                subject = %alert.subject,
                observed = alert.observed,
                second = alert.second,
                "threshold exceeded"
            );
        }

        let snapshot = Arc::new(Snapshot {
            latest_event,
            buckets,
            alerts,
            buffer_len,
            buffer_capacity,
            accepted,
            rejected,
        });

        self.snapshot_tx.send_replace(Arc::clone(&snapshot));

        let mut sinks = self.sinks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.write_events(&events) {
                warn!(sink = sink.name(), error = %e, "event export failed");
            }
            if let Err(e) = sink.write_buckets(&snapshot) {
                warn!(sink = sink.name(), error = %e, "bucket export failed");
            }
        }
        drop(sinks);

        debug!(
            buckets = snapshot.buckets.len(),
            alerts = snapshot.alerts.len(),
            occupancy = buffer_len,
            rejected = rejected.total(),
            "published snapshot"
        );
        snapshot
    }

    /// Pull accessor: the most recently published snapshot.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Change notification at publish cadence.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests a clean stop: ingestion drains stop accepting, the
    /// publisher loop finishes its in-flight cycle and flushes once more.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Publisher loop. Cadence is decoupled from ingestion; a cycle with
    /// no new data republishes an identical snapshot.
    pub async fn run(self: Arc<Self>) {
        let mut interval = time::interval(Duration::from_secs(self.config.publish_interval_secs));
        while self.is_running() {
            interval.tick().await;
            self.publish();
        }
        // final flush so sinks see the last window before shutdown
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawField;

    fn record(second: i64, source: &str, length: f64) -> RawRecord {
        RawRecord {
            time: Some(RawField::Num(second as f64)),
            src_ip: Some(source.to_string()),
            dst_ip: None,
            protocol: Some("TCP".to_string()),
            length: Some(RawField::Num(length)),
        }
    }

    fn monitor_with_capacity(capacity: usize) -> Monitor {
        let config = MonitorConfig {
            capacity,
            ..MonitorConfig::default()
        };
        Monitor::new(config).unwrap()
    }

    #[test]
    fn invalid_config_is_a_startup_error() {
        let config = MonitorConfig {
            capacity: 0,
            ..MonitorConfig::default()
        };
        assert!(Monitor::new(config).is_err());
    }

    #[test]
    fn eviction_scenario_one_bucket_per_second() {
        let monitor = monitor_with_capacity(5);
        for i in 1..=6 {
            monitor.push(record(i, "10.0.0.1", 100.0));
        }
        let snap = monitor.publish();
        assert_eq!(snap.buffer_len, 5);
        assert_eq!(snap.buckets.len(), 5);
        assert!(snap.buckets.iter().all(|b| b.bytes == 100));
        let seconds: Vec<i64> = snap.buckets.iter().map(|b| b.second).collect();
        assert_eq!(seconds, vec![2, 3, 4, 5, 6]);
        assert_eq!(snap.accepted, 6);
    }

    #[test]
    fn publish_is_idempotent_without_new_pushes() {
        let monitor = monitor_with_capacity(100);
        for i in 0..60 {
            monitor.push(record(i % 10, "10.0.0.5", 50.0));
        }
        let first = monitor.publish();
        let second = monitor.publish();
        assert_eq!(*first, *second);
        assert!(!first.alerts.is_empty());
    }

    #[test]
    fn empty_monitor_publishes_empty_snapshot() {
        let monitor = monitor_with_capacity(10);
        let snap = monitor.publish();
        assert!(snap.buckets.is_empty());
        assert!(snap.alerts.is_empty());
        assert_eq!(snap.buffer_len, 0);
        assert_eq!(*snap, *monitor.publish());
    }

    #[test]
    fn rejections_surface_in_snapshot() {
        let monitor = monitor_with_capacity(10);
        monitor.push(RawRecord::default());
        monitor.push(record(1, "10.0.0.1", 10.0));
        let snap = monitor.publish();
        assert_eq!(snap.rejected.total(), 1);
        assert_eq!(snap.buffer_len, 1);
    }

    #[test]
    fn suspicious_source_alert_end_to_end() {
        let monitor = monitor_with_capacity(200);
        for i in 0..51 {
            monitor.push(record(10 + (i % 5), "10.0.0.5", 1.0));
        }
        let snap = monitor.publish();
        let alert = snap
            .alerts
            .iter()
            .find(|a| a.rule == crate::detect::AlertKind::SuspiciousSource)
            .expect("expected a suspicious source alert");
        assert_eq!(alert.subject, "10.0.0.5");
        assert_eq!(alert.observed, 51);
    }

    #[test]
    fn latest_tracks_last_publish() {
        let monitor = monitor_with_capacity(10);
        monitor.push(record(1, "10.0.0.1", 10.0));
        let published = monitor.publish();
        assert_eq!(*monitor.latest(), *published);
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }
        fn write_events(&mut self, _events: &[crate::event::Event]) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    struct CountingSink {
        batches: Arc<Mutex<usize>>,
    }

    impl RecordSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }
        fn write_buckets(&mut self, _snapshot: &Snapshot) -> Result<()> {
            *self.batches.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn sink_failure_does_not_block_other_sinks_or_cycles() {
        let monitor = monitor_with_capacity(10);
        let batches = Arc::new(Mutex::new(0));
        monitor.add_sink(Box::new(FailingSink));
        monitor.add_sink(Box::new(CountingSink {
            batches: Arc::clone(&batches),
        }));
        monitor.push(record(1, "10.0.0.1", 10.0));
        monitor.publish();
        monitor.publish();
        assert_eq!(*batches.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn run_loop_stops_cleanly_with_final_publish() {
        let config = MonitorConfig {
            capacity: 10,
            publish_interval_secs: 1,
            ..MonitorConfig::default()
        };
        let monitor = Arc::new(Monitor::new(config).unwrap());
        monitor.push(record(1, "10.0.0.1", 10.0));
        let handle = tokio::spawn(Arc::clone(&monitor).run());
        monitor.stop();
        handle.await.unwrap();
        assert_eq!(monitor.latest().buffer_len, 1);
    }

    #[tokio::test]
    async fn subscribers_are_notified_at_publish() {
        let monitor = Arc::new(monitor_with_capacity(10));
        let mut rx = monitor.subscribe();
        monitor.push(record(5, "10.0.0.1", 10.0));
        monitor.publish();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().buffer_len, 1);
    }

    #[test]
    fn ingest_sender_feeds_the_buffer() {
        let monitor = Arc::new(monitor_with_capacity(10));
        let (tx, drain) = monitor.ingest_sender();
        for i in 0..3 {
            tx.send(record(i, "10.0.0.1", 10.0)).unwrap();
        }
        drop(tx);
        drain.join().unwrap();
        assert_eq!(monitor.publish().buffer_len, 3);
    }

    #[test]
    fn joined_drain_means_every_sent_record_is_buffered() {
        let monitor = Arc::new(monitor_with_capacity(2000));
        let (tx, drain) = monitor.ingest_sender();
        let feeder = thread::spawn(move || {
            for i in 0..1000 {
                tx.send(record(i % 30, "10.0.0.1", 10.0)).unwrap();
            }
        });
        feeder.join().unwrap();
        drain.join().unwrap();
        // no grace period needed: the join is the completion signal
        assert_eq!(monitor.publish().accepted, 1000);
    }
}
