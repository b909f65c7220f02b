//! File-backed adapters for the consumed ports.
//!
//! Production deployments wire real telemetry and flag-store clients in
//! here; these adapters speak JSON files so the daemon is operational out
//! of the box — a metrics pipeline drops snapshots at one path, the flag
//! percentage is published at another.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::debug;

use flagramp_core::{FeatureFlagUpdater, MetricsSource, RolloutMetrics};

/// Reads `RolloutMetrics` snapshots from a JSON document.
///
/// A missing file is a transient absence of data and yields a zeroed
/// snapshot; a malformed file is an error ("no signal this cycle").
pub struct FileMetricsSource {
    path: PathBuf,
}

impl FileMetricsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetricsSource for FileMetricsSource {
    fn rollout_metrics(&self) -> anyhow::Result<RolloutMetrics> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no metrics document yet; zeroed snapshot");
                return Ok(RolloutMetrics::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading metrics {}", self.path.display()))
            }
        };
        serde_json::from_slice(&raw)
            .with_context(|| format!("parsing metrics {}", self.path.display()))
    }
}

/// Publishes flag percentages into a flat JSON object
/// (`{"flag_name": percent}`), preserving other flags in the file.
pub struct FileFlagUpdater {
    path: PathBuf,
}

impl FileFlagUpdater {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FeatureFlagUpdater for FileFlagUpdater {
    fn set_percentage(&self, flag: &str, percent: f64) -> anyhow::Result<()> {
        let mut flags: Map<String, Value> = match std::fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("parsing flags {}", self.path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Map::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading flags {}", self.path.display()))
            }
        };
        flags.insert(flag.to_string(), Value::from(percent));
        let payload = serde_json::to_vec_pretty(&Value::Object(flags))?;
        std::fs::write(&self.path, payload)
            .with_context(|| format!("writing flags {}", self.path.display()))?;
        debug!(flag, percent, path = %self.path.display(), "flag percentage published");
        Ok(())
    }
}
