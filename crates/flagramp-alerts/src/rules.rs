//! The canonical alert rule table.
//!
//! Rules are plain data — id, severity, auto-resolve, cooldown — and a
//! single evaluator match decides whether a rule fires for a given
//! snapshot. Keeping the trigger logic out of the rule descriptions keeps
//! the table serializable and each trigger unit-testable in isolation.

use serde::{Deserialize, Serialize};

use flagramp_core::{AlertThresholds, RolloutMetrics, Severity};

/// Canary volume below which signal quality is too low to trust.
pub const LOW_TRAFFIC_FLOOR: u64 = 100;

/// Floor for the hours-in-stage divisor: one minute. A freshly entered
/// stage must not divide by zero.
const MIN_RATE_HOURS: f64 = 1.0 / 60.0;

const MINUTE_MS: u64 = 60 * 1000;

/// Normalize an absolute count to a per-hour rate over the stage lifetime.
pub fn per_hour(count: u64, hours_in_stage: f64) -> f64 {
    count as f64 / hours_in_stage.max(MIN_RATE_HOURS)
}

/// Identifier of one alert rule; doubles as the alert id — at most one
/// active alert exists per rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRuleId {
    CriticalDiscrepancies,
    HighDiscrepancyRate,
    ErrorRateSpike,
    LatencyDegradation,
    LowTrafficVolume,
}

impl AlertRuleId {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertRuleId::CriticalDiscrepancies => "critical_discrepancies",
            AlertRuleId::HighDiscrepancyRate => "high_discrepancy_rate",
            AlertRuleId::ErrorRateSpike => "error_rate_spike",
            AlertRuleId::LatencyDegradation => "latency_degradation",
            AlertRuleId::LowTrafficVolume => "low_traffic_volume",
        }
    }
}

impl std::fmt::Display for AlertRuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one rule.
#[derive(Debug, Clone, Copy)]
pub struct AlertRule {
    pub id: AlertRuleId,
    pub name: &'static str,
    pub severity: Severity,
    /// Whether the alert clears itself once the trigger condition stops.
    pub auto_resolve: bool,
    /// Minimum time between firings; zero means never suppressed.
    pub cooldown_ms: u64,
}

/// The rule table, in evaluation (and reporting) order.
pub const ALERT_RULES: [AlertRule; 5] = [
    AlertRule {
        id: AlertRuleId::CriticalDiscrepancies,
        name: "Critical discrepancies detected",
        severity: Severity::Critical,
        auto_resolve: false,
        cooldown_ms: 0,
    },
    AlertRule {
        id: AlertRuleId::HighDiscrepancyRate,
        name: "High discrepancy rate",
        severity: Severity::High,
        auto_resolve: true,
        cooldown_ms: 5 * MINUTE_MS,
    },
    AlertRule {
        id: AlertRuleId::ErrorRateSpike,
        name: "Error rate spike",
        severity: Severity::High,
        auto_resolve: true,
        cooldown_ms: 10 * MINUTE_MS,
    },
    AlertRule {
        id: AlertRuleId::LatencyDegradation,
        name: "Latency degradation",
        severity: Severity::Medium,
        auto_resolve: true,
        cooldown_ms: 15 * MINUTE_MS,
    },
    AlertRule {
        id: AlertRuleId::LowTrafficVolume,
        name: "Low canary traffic volume",
        severity: Severity::Low,
        auto_resolve: true,
        cooldown_ms: 30 * MINUTE_MS,
    },
];

/// Whether a rule's trigger condition holds for this snapshot.
pub fn triggered(
    id: AlertRuleId,
    metrics: &RolloutMetrics,
    thresholds: &AlertThresholds,
    hours_in_stage: f64,
) -> bool {
    match id {
        AlertRuleId::CriticalDiscrepancies => metrics.discrepancies.critical > 0,
        AlertRuleId::HighDiscrepancyRate => {
            per_hour(metrics.discrepancies.high, hours_in_stage)
                > thresholds.high_discrepancies_per_hour
        }
        AlertRuleId::ErrorRateSpike => {
            metrics.stability.error_rate_delta_percent > thresholds.error_rate_delta_percent
        }
        AlertRuleId::LatencyDegradation => {
            metrics.performance.latency_degradation_percent
                > thresholds.latency_degradation_percent
        }
        AlertRuleId::LowTrafficVolume => metrics.volume.canary_requests < LOW_TRAFFIC_FLOOR,
    }
}

/// Human-readable message for a firing rule.
pub fn message(
    id: AlertRuleId,
    metrics: &RolloutMetrics,
    thresholds: &AlertThresholds,
    hours_in_stage: f64,
) -> String {
    match id {
        AlertRuleId::CriticalDiscrepancies => format!(
            "{} critical discrepancies detected between legacy and new paths",
            metrics.discrepancies.critical
        ),
        AlertRuleId::HighDiscrepancyRate => format!(
            "high discrepancy rate: {:.1}/hour (threshold {:.1}/hour)",
            per_hour(metrics.discrepancies.high, hours_in_stage),
            thresholds.high_discrepancies_per_hour
        ),
        AlertRuleId::ErrorRateSpike => format!(
            "error rate delta {:.2}% exceeds threshold {:.2}%",
            metrics.stability.error_rate_delta_percent, thresholds.error_rate_delta_percent
        ),
        AlertRuleId::LatencyDegradation => format!(
            "latency degraded {:.1}% vs baseline (threshold {:.1}%)",
            metrics.performance.latency_degradation_percent,
            thresholds.latency_degradation_percent
        ),
        AlertRuleId::LowTrafficVolume => format!(
            "canary volume {} requests is below the {} floor",
            metrics.volume.canary_requests, LOW_TRAFFIC_FLOOR
        ),
    }
}

/// Structured context attached to an alert for post-hoc reconstruction.
pub fn context(id: AlertRuleId, metrics: &RolloutMetrics, hours_in_stage: f64) -> serde_json::Value {
    match id {
        AlertRuleId::CriticalDiscrepancies => serde_json::json!({
            "critical": metrics.discrepancies.critical,
            "high": metrics.discrepancies.high,
        }),
        AlertRuleId::HighDiscrepancyRate => serde_json::json!({
            "high": metrics.discrepancies.high,
            "hours_in_stage": hours_in_stage,
            "per_hour": per_hour(metrics.discrepancies.high, hours_in_stage),
        }),
        AlertRuleId::ErrorRateSpike => serde_json::json!({
            "canary_error_rate": metrics.stability.canary_error_rate,
            "baseline_error_rate": metrics.stability.baseline_error_rate,
            "delta_percent": metrics.stability.error_rate_delta_percent,
        }),
        AlertRuleId::LatencyDegradation => serde_json::json!({
            "canary_p99_ms": metrics.performance.canary_latency_p99_ms,
            "baseline_p99_ms": metrics.performance.baseline_latency_p99_ms,
            "degradation_percent": metrics.performance.latency_degradation_percent,
        }),
        AlertRuleId::LowTrafficVolume => serde_json::json!({
            "canary_requests": metrics.volume.canary_requests,
            "total_requests": metrics.volume.total_requests,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagramp_core::{DiscrepancyCounts, StabilityMetrics, VolumeMetrics};

    fn thresholds() -> AlertThresholds {
        AlertThresholds {
            high_discrepancies_per_hour: 5.0,
            error_rate_delta_percent: 1.0,
            latency_degradation_percent: 10.0,
        }
    }

    fn quiet_metrics() -> RolloutMetrics {
        RolloutMetrics {
            volume: VolumeMetrics {
                total_requests: 10_000,
                canary_requests: 1_000,
                baseline_requests: 9_000,
            },
            ..Default::default()
        }
    }

    #[test]
    fn table_covers_every_rule_id_once() {
        for id in [
            AlertRuleId::CriticalDiscrepancies,
            AlertRuleId::HighDiscrepancyRate,
            AlertRuleId::ErrorRateSpike,
            AlertRuleId::LatencyDegradation,
            AlertRuleId::LowTrafficVolume,
        ] {
            assert_eq!(ALERT_RULES.iter().filter(|r| r.id == id).count(), 1);
        }
    }

    #[test]
    fn only_critical_rule_skips_auto_resolve() {
        for r in &ALERT_RULES {
            assert_eq!(r.auto_resolve, r.severity != Severity::Critical);
        }
    }

    #[test]
    fn quiet_snapshot_triggers_nothing() {
        let m = quiet_metrics();
        for r in &ALERT_RULES {
            assert!(!triggered(r.id, &m, &thresholds(), 1.0), "{} fired", r.id);
        }
    }

    #[test]
    fn critical_discrepancy_triggers_on_one() {
        let mut m = quiet_metrics();
        m.discrepancies.critical = 1;
        assert!(triggered(
            AlertRuleId::CriticalDiscrepancies,
            &m,
            &thresholds(),
            1.0
        ));
    }

    #[test]
    fn high_rate_is_normalized_per_hour() {
        let mut m = quiet_metrics();
        m.discrepancies = DiscrepancyCounts {
            high: 20,
            ..Default::default()
        };
        // 20 over 10 hours = 2/hour, under the 5/hour threshold.
        assert!(!triggered(
            AlertRuleId::HighDiscrepancyRate,
            &m,
            &thresholds(),
            10.0
        ));
        // 20 over 1 hour = 20/hour.
        assert!(triggered(
            AlertRuleId::HighDiscrepancyRate,
            &m,
            &thresholds(),
            1.0
        ));
    }

    #[test]
    fn fresh_stage_does_not_divide_by_zero() {
        // Zero hours in stage clamps to the one-minute floor.
        assert_eq!(per_hour(10, 0.0), 600.0);
        assert!(per_hour(0, 0.0) == 0.0);
    }

    #[test]
    fn error_rate_spike_compares_delta() {
        let mut m = quiet_metrics();
        m.stability = StabilityMetrics {
            canary_error_rate: 2.5,
            baseline_error_rate: 1.0,
            error_rate_delta_percent: 1.5,
        };
        assert!(triggered(AlertRuleId::ErrorRateSpike, &m, &thresholds(), 1.0));
    }

    #[test]
    fn low_volume_triggers_under_floor() {
        let mut m = quiet_metrics();
        m.volume.canary_requests = 99;
        assert!(triggered(AlertRuleId::LowTrafficVolume, &m, &thresholds(), 1.0));
        m.volume.canary_requests = 100;
        assert!(!triggered(AlertRuleId::LowTrafficVolume, &m, &thresholds(), 1.0));
    }

    #[test]
    fn messages_carry_the_observed_numbers() {
        let mut m = quiet_metrics();
        m.stability.error_rate_delta_percent = 1.5;
        let msg = message(AlertRuleId::ErrorRateSpike, &m, &thresholds(), 1.0);
        assert!(msg.contains("1.50%"), "message was: {msg}");
    }
}
