//! netpulse — streaming per-second network traffic statistics with
//! threshold-based anomaly alerts.
//!
//! Packet metadata events flow from a capture collaborator into a bounded
//! FIFO buffer, get aggregated into per-second window buckets over a
//! sliding retention horizon, are checked against configurable threshold
//! rules, and surface to consumers as immutable published snapshots.

pub mod aggregate;
pub mod buffer;
pub mod config;
pub mod detect;
pub mod event;
pub mod pipeline;
pub mod sink;
pub mod snapshot;

pub use aggregate::{ProtocolCounts, WindowBucket};
pub use buffer::{EventBuffer, RejectCounters};
pub use config::MonitorConfig;
pub use detect::{Alert, AlertKind, DetectionRules, RuleLimit};
pub use event::{Event, RawRecord, RejectReason};
pub use pipeline::Monitor;
pub use sink::{CsvEventSink, JsonlBucketSink, RecordSink};
pub use snapshot::Snapshot;
