//! Daemon configuration — a TOML file, all fields optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use flagramp_core::RolloutPlan;
use flagramp_rollout::ControllerConfig;

/// Everything the daemon needs to assemble a controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Feature flag whose percentage the rollout governs.
    pub flag_name: String,
    /// Path of the persisted rollout state document.
    pub state_path: PathBuf,
    /// Path the metrics adapter reads snapshots from.
    pub metrics_path: PathBuf,
    /// Path the flag adapter writes percentages to.
    pub flags_path: PathBuf,
    pub health_check_interval_secs: u64,
    pub progression_interval_secs: u64,
    /// Error-rate delta escalation factor for automatic rollback.
    pub rollback_escalation_factor: f64,
    /// Per-stage overrides; defaults to the production-shaped plan.
    pub plan: RolloutPlan,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            flag_name: "new_code_path".to_string(),
            state_path: PathBuf::from(".rollout-state.json"),
            metrics_path: PathBuf::from("rollout-metrics.json"),
            flags_path: PathBuf::from("feature-flags.json"),
            health_check_interval_secs: 60,
            progression_interval_secs: 300,
            rollback_escalation_factor: 2.0,
            plan: RolloutPlan::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML file, or fall back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                let config: DaemonConfig = toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            flag_name: self.flag_name.clone(),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            progression_interval: Duration::from_secs(self.progression_interval_secs),
            rollback_escalation_factor: self.rollback_escalation_factor,
        }
    }
}
