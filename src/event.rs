//! Packet metadata event model and ingestion-boundary validation.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Placeholder source address for frames with no parsable network layer.
pub const ADDR_PLACEHOLDER: &str = "unavailable";

/// Untrusted record as delivered by the capture collaborator. Field
/// presence is not guaranteed; everything is checked before an [`Event`]
/// is constructed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub time: Option<RawField>,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub dst_ip: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub length: Option<RawField>,
}

/// A field that may arrive as a JSON number or a string (CSV rows are all
/// strings, JSON producers send numbers for time and length).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Num(f64),
    Text(String),
}

impl RawRecord {
    /// Parses one row of the columnar export format:
    /// `time,src_ip,dst_ip,protocol,length`. Missing columns become absent
    /// fields and are rejected downstream rather than here.
    pub fn from_csv_row(row: &str) -> Self {
        let mut cols = row.split(',').map(str::trim);
        let text = |v: Option<&str>| {
            v.filter(|s| !s.is_empty())
                .map(|s| RawField::Text(s.to_string()))
        };
        let time = text(cols.next());
        let src_ip = cols.next().filter(|s| !s.is_empty()).map(String::from);
        let dst_ip = cols.next().filter(|s| !s.is_empty()).map(String::from);
        let protocol = cols.next().filter(|s| !s.is_empty()).map(String::from);
        let length = text(cols.next());
        RawRecord {
            time,
            src_ip,
            dst_ip,
            protocol,
            length,
        }
    }
}

/// Why a raw record was dropped at the ingestion boundary. Counters
/// surface per reason through `RejectCounters`; log lines use [`as_str`].
///
/// [`as_str`]: RejectReason::as_str
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BadTimestamp,
    BadLength,
    BadAddress,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::BadTimestamp => "bad_timestamp",
            RejectReason::BadLength => "bad_length",
            RejectReason::BadAddress => "bad_address",
        }
    }
}

/// One captured packet's metadata. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub destination: Option<String>,
    pub protocol: String,
    pub length: u64,
}

impl Event {
    /// Validates a raw record. Timestamp, length and source address must
    /// each pass; the destination is optional and silently dropped when
    /// malformed. A missing protocol label degrades to `"OTHER"`.
    pub fn validate(raw: RawRecord) -> Result<Event, RejectReason> {
        let timestamp = raw
            .time
            .as_ref()
            .and_then(parse_timestamp)
            .ok_or(RejectReason::BadTimestamp)?;
        let length = raw
            .length
            .as_ref()
            .and_then(parse_length)
            .ok_or(RejectReason::BadLength)?;
        let source = raw
            .src_ip
            .filter(|s| valid_address(s))
            .ok_or(RejectReason::BadAddress)?;
        let destination = raw.dst_ip.filter(|s| valid_address(s));
        let protocol = raw.protocol.unwrap_or_else(|| "OTHER".to_string());
        Ok(Event {
            timestamp,
            source,
            destination,
            protocol,
            length,
        })
    }

    /// Timestamp truncated to whole seconds; the window bucket key.
    pub fn floored_second(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

fn parse_timestamp(field: &RawField) -> Option<DateTime<Utc>> {
    match field {
        RawField::Num(secs) => {
            if !secs.is_finite() || *secs < 0.0 {
                return None;
            }
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        }
        RawField::Text(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            // pandas-style "2024-01-01 00:00:00.123" rows from the CSV export
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        }
    }
}

fn parse_length(field: &RawField) -> Option<u64> {
    match field {
        RawField::Num(n) => {
            (n.is_finite() && *n >= 0.0 && n.fract() == 0.0).then(|| *n as u64)
        }
        RawField::Text(s) => s.trim().parse::<u64>().ok(),
    }
}

fn valid_address(addr: &str) -> bool {
    addr.parse::<IpAddr>().is_ok() || addr == ADDR_PLACEHOLDER
}
