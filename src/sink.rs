//! Persistence sink contract. The publisher offers each cycle's data at
//! both granularities; a sink implements whichever it wants. Sink errors
//! are reported to the publisher and never abort a cycle.

use crate::event::Event;
use crate::snapshot::Snapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub trait RecordSink: Send {
    fn name(&self) -> &str;

    /// Raw-event export: the horizon-filtered events behind the snapshot.
    fn write_events(&mut self, _events: &[Event]) -> Result<()> {
        Ok(())
    }

    /// Bucket export: the snapshot's retained per-second aggregates.
    fn write_buckets(&mut self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }
}

/// Appends raw events as columnar CSV rows
/// (`time,src_ip,dst_ip,protocol,length`), the format the offline analysis
/// scripts consume. A cursor keeps rows from being re-exported on the
/// next publish of an unchanged window: it records the newest exported
/// instant and how many rows were exported at exactly that instant, so a
/// later event sharing that timestamp still gets its row. Buffer order is
/// append order, which makes the skip-the-first-n rule line up with the
/// rows already written.
pub struct CsvEventSink {
    writer: BufWriter<File>,
    cursor: Option<ExportCursor>,
}

struct ExportCursor {
    at: DateTime<Utc>,
    exported_at_instant: usize,
}

impl CsvEventSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating event export {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "time,src_ip,dst_ip,protocol,length")?;
        Ok(CsvEventSink {
            writer,
            cursor: None,
        })
    }
}

impl RecordSink for CsvEventSink {
    fn name(&self) -> &str {
        "csv-events"
    }

    fn write_events(&mut self, events: &[Event]) -> Result<()> {
        let mut skipped_at_cursor = 0usize;
        for event in events {
            if let Some(cursor) = &self.cursor {
                if event.timestamp < cursor.at {
                    continue;
                }
                if event.timestamp == cursor.at && skipped_at_cursor < cursor.exported_at_instant
                {
                    skipped_at_cursor += 1;
                    continue;
                }
            }
            writeln!(
                self.writer,
                "{},{},{},{},{}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
                event.source,
                event.destination.as_deref().unwrap_or(""),
                event.protocol,
                event.length,
            )?;
        }
        if let Some(max) = events.iter().map(|e| e.timestamp).max() {
            let at_max = events.iter().filter(|e| e.timestamp == max).count();
            match &mut self.cursor {
                Some(cursor) if cursor.at == max => {
                    cursor.exported_at_instant = cursor.exported_at_instant.max(at_max);
                }
                // window shrank below the cursor; nothing new was written
                Some(cursor) if cursor.at > max => {}
                other => {
                    *other = Some(ExportCursor {
                        at: max,
                        exported_at_instant: at_max,
                    });
                }
            }
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes one JSON line per retained bucket per publish cycle: a compact
/// history stream for consumers that do not want raw events.
pub struct JsonlBucketSink {
    writer: BufWriter<File>,
}

impl JsonlBucketSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating bucket export {}", path.display()))?;
        Ok(JsonlBucketSink {
            writer: BufWriter::new(file),
        })
    }
}

impl RecordSink for JsonlBucketSink {
    fn name(&self) -> &str {
        "jsonl-buckets"
    }

    fn write_buckets(&mut self, snapshot: &Snapshot) -> Result<()> {
        for bucket in &snapshot.buckets {
            serde_json::to_writer(&mut self.writer, bucket)?;
            writeln!(self.writer)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
