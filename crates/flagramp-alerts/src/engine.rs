//! Alert lifecycle state and the circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use flagramp_core::{AlertThresholds, ErrorEvent, MonitoringPort, RolloutMetrics, Severity};

use crate::rules::{self, AlertRuleId, ALERT_RULES};

/// One alert instance. At most one active alert exists per rule id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertRuleId,
    /// When the alert was created, Unix milliseconds.
    pub timestamp: u64,
    pub severity: Severity,
    pub message: String,
    pub context: serde_json::Value,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
}

/// Evaluates the rule table against metrics snapshots and owns the alert
/// lifecycle.
///
/// The circuit breaker is advisory state for external callers: a deploy
/// pipeline should refuse further promotions while tripped. The rollout
/// controller's own rollback path does not depend on it.
pub struct AlertEngine {
    monitoring: Arc<dyn MonitoringPort>,
    /// Active alerts by rule id.
    active: HashMap<AlertRuleId, Alert>,
    /// Last firing per rule, for cooldown suppression. Unix milliseconds.
    last_fired: HashMap<AlertRuleId, u64>,
    circuit_tripped: bool,
}

impl AlertEngine {
    pub fn new(monitoring: Arc<dyn MonitoringPort>) -> Self {
        Self {
            monitoring,
            active: HashMap::new(),
            last_fired: HashMap::new(),
            circuit_tripped: false,
        }
    }

    /// Evaluate every rule against a snapshot, using the wall clock.
    pub fn evaluate(
        &mut self,
        metrics: &RolloutMetrics,
        thresholds: &AlertThresholds,
        hours_in_stage: f64,
    ) -> Vec<Alert> {
        self.evaluate_at(metrics, thresholds, hours_in_stage, epoch_ms())
    }

    /// Evaluate at an explicit timestamp (deterministic for tests and
    /// replays).
    ///
    /// For each rule whose trigger holds: the rule is skipped entirely
    /// inside its cooldown window; otherwise a new alert is created (and
    /// notified) or the existing active one is returned. A rule whose
    /// trigger stopped holding auto-resolves its active alert when the rule
    /// allows it. Returns the active alerts in rule-table order.
    pub fn evaluate_at(
        &mut self,
        metrics: &RolloutMetrics,
        thresholds: &AlertThresholds,
        hours_in_stage: f64,
        now_ms: u64,
    ) -> Vec<Alert> {
        let mut out = Vec::new();

        for rule in &ALERT_RULES {
            if rules::triggered(rule.id, metrics, thresholds, hours_in_stage) {
                if let Some(&last) = self.last_fired.get(&rule.id)
                    && rule.cooldown_ms > 0
                    && now_ms.saturating_sub(last) < rule.cooldown_ms
                {
                    continue;
                }

                if let Some(existing) = self.active.get(&rule.id) {
                    out.push(existing.clone());
                    continue;
                }

                let alert = Alert {
                    id: rule.id,
                    timestamp: now_ms,
                    severity: rule.severity,
                    message: rules::message(rule.id, metrics, thresholds, hours_in_stage),
                    context: rules::context(rule.id, metrics, hours_in_stage),
                    is_active: true,
                    acknowledged_at: None,
                    resolved_at: None,
                };
                self.last_fired.insert(rule.id, now_ms);
                self.notify_created(&alert);
                if rule.severity == Severity::Critical {
                    self.trip_circuit_breaker(rule.id);
                }
                self.active.insert(rule.id, alert.clone());
                out.push(alert);
            } else if rule.auto_resolve
                && let Some(mut resolved) = self.active.remove(&rule.id)
            {
                resolved.is_active = false;
                resolved.resolved_at = Some(now_ms);
                info!(rule = %rule.id, "alert auto-resolved");
                self.monitoring.record_metric(
                    "rollout_alert_auto_resolved",
                    1.0,
                    &[("rule", rule.id.as_str())],
                );
            }
        }

        out
    }

    /// Mark an active alert acknowledged. No-op on unknown or inactive ids.
    pub fn acknowledge(&mut self, id: AlertRuleId) -> bool {
        self.acknowledge_at(id, epoch_ms())
    }

    pub fn acknowledge_at(&mut self, id: AlertRuleId, now_ms: u64) -> bool {
        match self.active.get_mut(&id) {
            Some(alert) if alert.acknowledged_at.is_none() => {
                alert.acknowledged_at = Some(now_ms);
                self.monitoring
                    .increment_counter("rollout_alert_acknowledged", &[("rule", id.as_str())]);
                true
            }
            _ => false,
        }
    }

    /// Resolve an active alert manually. No-op on unknown or inactive ids.
    pub fn resolve(&mut self, id: AlertRuleId) -> bool {
        self.resolve_at(id, epoch_ms())
    }

    pub fn resolve_at(&mut self, id: AlertRuleId, now_ms: u64) -> bool {
        match self.active.remove(&id) {
            Some(mut alert) => {
                alert.is_active = false;
                alert.resolved_at = Some(now_ms);
                self.monitoring
                    .increment_counter("rollout_alert_resolved", &[("rule", id.as_str())]);
                true
            }
            None => false,
        }
    }

    /// Active alerts in rule-table order.
    pub fn active_alerts(&self) -> Vec<Alert> {
        ALERT_RULES
            .iter()
            .filter_map(|r| self.active.get(&r.id).cloned())
            .collect()
    }

    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.circuit_tripped
    }

    /// Clear the latch after operator remediation.
    pub fn reset_circuit_breaker(&mut self) {
        if self.circuit_tripped {
            self.circuit_tripped = false;
            info!("circuit breaker reset");
            self.monitoring
                .increment_counter("rollout_circuit_breaker_reset", &[]);
        }
    }

    fn trip_circuit_breaker(&mut self, rule: AlertRuleId) {
        if !self.circuit_tripped {
            self.circuit_tripped = true;
            warn!(rule = %rule, "circuit breaker tripped");
            self.monitoring
                .increment_counter("rollout_circuit_breaker_tripped", &[("rule", rule.as_str())]);
        }
    }

    fn notify_created(&self, alert: &Alert) {
        self.monitoring.record_error(ErrorEvent {
            message: format!("rollout alert: {}", alert.message),
            severity: alert.severity,
            context: alert.context.clone(),
        });
        self.monitoring.increment_counter(
            "rollout_alert_created",
            &[
                ("rule", alert.id.as_str()),
                ("severity", alert.severity.as_str()),
            ],
        );
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
