//! Runtime configuration for the pipeline. Loaded from JSON, overridable
//! from the CLI, validated fail-fast before anything starts.

use crate::detect::DetectionRules;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_RETENTION_SECS: u64 = 30;
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum buffered events before FIFO eviction.
    pub capacity: usize,
    /// Sliding window span eligible for aggregation and alerting.
    pub retention_secs: u64,
    /// Cadence of the snapshot publisher.
    pub publish_interval_secs: u64,
    pub rules: DetectionRules,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            capacity: DEFAULT_CAPACITY,
            retention_secs: DEFAULT_RETENTION_SECS,
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            rules: DetectionRules::default(),
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: MonitorConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup-time check. Bad values are an error, never clamped.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            bail!("capacity must be positive");
        }
        if self.retention_secs == 0 {
            bail!("retention_secs must be positive");
        }
        if self.publish_interval_secs == 0 {
            bail!("publish_interval_secs must be positive");
        }
        Ok(())
    }
}
