//! Ports — traits for the external systems Flagramp consumes.
//!
//! The controller is constructed with explicit implementations of these
//! traits (no global registries). Production wiring lives in the daemon;
//! tests plug in recording doubles.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::metrics::RolloutMetrics;
use crate::stage::RolloutStage;

/// Severity scale shared by alerts and recorded errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error event forwarded to the monitoring backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub severity: Severity,
    /// Arbitrary structured context (stage, percentage, triggering rule).
    pub context: serde_json::Value,
}

/// Supplies rollout metrics snapshots on demand.
///
/// Implementations must be callable at any time and should return a zeroed
/// snapshot for a transient absence of data; a hard error means "no signal
/// this cycle" to the caller.
pub trait MetricsSource: Send + Sync {
    fn rollout_metrics(&self) -> anyhow::Result<RolloutMetrics>;
}

/// Writes the rollout percentage to the external feature-flag store.
///
/// Invoked on every stage transition and auto-progression step. Callers
/// treat failures as logged-and-ignored: controller state is the source of
/// truth for intent, not the flag store's confirmation.
pub trait FeatureFlagUpdater: Send + Sync {
    fn set_percentage(&self, flag: &str, percent: f64) -> anyhow::Result<()>;
}

/// Sink for rollout lifecycle events, alert lifecycle, and counters.
pub trait MonitoringPort: Send + Sync {
    fn record_error(&self, event: ErrorEvent);
    fn record_metric(&self, name: &str, value: f64, tags: &[(&str, &str)]);
    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]);
}

/// Advisory approval seam, consulted by callers before a manual advance
/// into a stage with `requires_approval`. The controller itself never
/// consults it.
pub trait ApprovalGate: Send + Sync {
    fn approve(&self, target: RolloutStage) -> bool;
}

/// Approval gate that waves everything through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ApprovalGate for AutoApprove {
    fn approve(&self, _target: RolloutStage) -> bool {
        true
    }
}

/// Monitoring port backed by the process tracing subscriber.
///
/// The production default when no real telemetry backend is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMonitor;

impl MonitoringPort for LogMonitor {
    fn record_error(&self, event: ErrorEvent) {
        error!(
            severity = %event.severity,
            context = %event.context,
            "{}",
            event.message
        );
    }

    fn record_metric(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        debug!(metric = name, value, ?tags, "metric recorded");
    }

    fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) {
        debug!(counter = name, ?tags, "counter incremented");
    }
}
