use anyhow::Result;
use clap::Parser;
use crossbeam_channel::Sender;
use netpulse::{CsvEventSink, JsonlBucketSink, Monitor, MonitorConfig, RawRecord};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Streaming traffic statistics and threshold alerts over a replayed or
/// piped capture feed. Live capture is an external concern: anything that
/// can produce `time,src_ip,dst_ip,protocol,length` rows (or JSONL
/// records on stdin) can act as the collaborator.
#[derive(Parser, Debug)]
#[command(name = "netpulse", version)]
struct Cli {
    /// Capture export to replay: CSV with a header row, or "-" for JSONL
    /// records on stdin
    #[arg(short, long)]
    input: PathBuf,

    /// JSON config file (capacity, retention, interval, rules)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override: buffer capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Override: retention horizon in seconds
    #[arg(long)]
    retention: Option<u64>,

    /// Override: publish interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Re-export accepted events as columnar CSV
    #[arg(long)]
    export_events: Option<PathBuf>,

    /// Append per-second bucket history as JSONL
    #[arg(long)]
    export_buckets: Option<PathBuf>,

    /// Sleep this many milliseconds between replayed records (0 = flat out)
    #[arg(long, default_value_t = 0)]
    pace_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(capacity) = cli.capacity {
        config.capacity = capacity;
    }
    if let Some(retention) = cli.retention {
        config.retention_secs = retention;
    }
    if let Some(interval) = cli.interval {
        config.publish_interval_secs = interval;
    }

    let monitor = Arc::new(Monitor::new(config)?);
    if let Some(path) = &cli.export_events {
        monitor.add_sink(Box::new(CsvEventSink::create(path)?));
    }
    if let Some(path) = &cli.export_buckets {
        monitor.add_sink(Box::new(JsonlBucketSink::create(path)?));
    }
    info!(
        capacity = monitor.config().capacity,
        retention_secs = monitor.config().retention_secs,
        interval_secs = monitor.config().publish_interval_secs,
        input = %cli.input.display(),
        "starting pipeline"
    );

    let (tx, drain) = monitor.ingest_sender();
    let input = cli.input.clone();
    let pace = Duration::from_millis(cli.pace_ms);
    let reader = thread::spawn(move || {
        if let Err(e) = feed_records(&input, tx, pace) {
            error!(error = %e, "input feed failed");
        }
    });

    let publisher = tokio::spawn(Arc::clone(&monitor).run());

    let mut updates = monitor.subscribe();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snap = updates.borrow_and_update().clone();
            info!(
                packets = snap.total_packets(),
                bytes = snap.total_bytes(),
                buckets = snap.buckets.len(),
                alerts = snap.alerts.len(),
                occupancy = snap.buffer_len,
                "window update"
            );
        }
    });

    // the drain join is the completion signal: once it returns, every
    // record the reader sent has been pushed into the buffer
    let drained = tokio::task::spawn_blocking(move || {
        let _ = reader.join();
        let _ = drain.join();
    });
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, stopping"),
        _ = drained => info!("input drained, stopping"),
    }

    monitor.stop();
    publisher.await?;
    reporter.abort();

    let last = monitor.latest();
    info!(
        accepted = last.accepted,
        rejected = last.rejected.total(),
        packets_in_window = last.total_packets(),
        bytes_in_window = last.total_bytes(),
        "shutdown complete"
    );
    for (source, count) in last.top_sources(5) {
        info!(source = %source, packets = count, "top source");
    }
    Ok(())
}

/// Reads the capture export line by line and hands records to the
/// pipeline. Unparsable JSONL lines become empty records so they show up
/// in the rejection counters instead of vanishing.
fn feed_records(path: &Path, tx: Sender<RawRecord>, pace: Duration) -> Result<()> {
    let jsonl = path.as_os_str() == "-"
        || matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json") | Some("jsonl")
        );
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(std::fs::File::open(path)?))
    };

    let mut sent = 0u64;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !jsonl && index == 0 && trimmed.starts_with("time,") {
            continue; // header row
        }
        let record = if jsonl {
            serde_json::from_str(trimmed).unwrap_or_else(|e| {
                debug!(line = index + 1, error = %e, "unparsable record");
                RawRecord::default()
            })
        } else {
            RawRecord::from_csv_row(trimmed)
        };
        if tx.send(record).is_err() {
            break; // pipeline stopped
        }
        sent += 1;
        if !pace.is_zero() {
            thread::sleep(pace);
        }
    }
    debug!(records = sent, "input feed finished");
    Ok(())
}
