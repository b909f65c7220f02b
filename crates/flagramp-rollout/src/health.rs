//! Pure health verdict evaluation.
//!
//! Given one metrics snapshot and the active stage's thresholds, decide
//! whether the rollout should roll back, hold, or is clear to progress.
//! The controller applies the verdict; this module only computes it.

use flagramp_alerts::per_hour;
use flagramp_core::{AlertThresholds, RolloutMetrics};

/// What the controller should do with the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    /// No alert conditions — safe to progress.
    Progress,
    /// Alert conditions present but below the rollback bar — stay put.
    Hold,
    /// Critical condition — pull traffic back now.
    Rollback,
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckResult {
    /// True iff the verdict is [`Recommendation::Progress`].
    pub healthy: bool,
    pub should_rollback: bool,
    /// Alert condition messages observed this check (may be non-empty
    /// without forcing rollback).
    pub alerts: Vec<String>,
    pub recommendation: Recommendation,
}

/// Evaluate a snapshot against the active stage's thresholds.
///
/// Rollback fires on any critical discrepancy, or when the error-rate
/// delta exceeds `escalation_factor` times its threshold. A delta over the
/// threshold but under the escalated bar is an alert condition only.
pub fn evaluate(
    metrics: &RolloutMetrics,
    thresholds: &AlertThresholds,
    escalation_factor: f64,
    hours_in_stage: f64,
) -> HealthCheckResult {
    let mut alerts = Vec::new();

    let high_rate = per_hour(metrics.discrepancies.high, hours_in_stage);
    if high_rate > thresholds.high_discrepancies_per_hour {
        alerts.push(format!(
            "high discrepancy rate: {:.1}/hour (threshold {:.1}/hour)",
            high_rate, thresholds.high_discrepancies_per_hour
        ));
    }

    let delta = metrics.stability.error_rate_delta_percent;
    let escalated = delta > escalation_factor * thresholds.error_rate_delta_percent;
    if delta > thresholds.error_rate_delta_percent && !escalated {
        alerts.push(format!(
            "error rate delta {:.2}% exceeds threshold {:.2}%",
            delta, thresholds.error_rate_delta_percent
        ));
    }

    let degradation = metrics.performance.latency_degradation_percent;
    if degradation > thresholds.latency_degradation_percent {
        alerts.push(format!(
            "latency degraded {:.1}% vs baseline (threshold {:.1}%)",
            degradation, thresholds.latency_degradation_percent
        ));
    }

    let should_rollback = metrics.discrepancies.critical > 0 || escalated;
    let recommendation = if should_rollback {
        Recommendation::Rollback
    } else if alerts.is_empty() {
        Recommendation::Progress
    } else {
        Recommendation::Hold
    };

    HealthCheckResult {
        healthy: recommendation == Recommendation::Progress,
        should_rollback,
        alerts,
        recommendation,
    }
}

/// Reason string attached to an automatic rollback, with enough context to
/// reconstruct the decision afterwards.
pub fn rollback_reason(metrics: &RolloutMetrics, thresholds: &AlertThresholds) -> String {
    if metrics.discrepancies.critical > 0 {
        format!(
            "{} critical discrepancies detected",
            metrics.discrepancies.critical
        )
    } else {
        format!(
            "error rate delta {:.2}% escalated past threshold {:.2}%",
            metrics.stability.error_rate_delta_percent, thresholds.error_rate_delta_percent
        )
    }
}
