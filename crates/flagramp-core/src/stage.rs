//! Rollout stages and per-stage configuration.
//!
//! A rollout walks an ordered sequence of stages, each with its own
//! traffic-percentage bounds, success criteria, and alert thresholds.
//! The terminal `Rollback` stage is reachable from any state and is never
//! left without operator intervention.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named phase of the rollout, ordered by blast radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStage {
    /// New path runs but serves no live traffic (0%).
    Shadow,
    /// A small slice of live traffic observes the new path.
    Canary,
    /// Wider exposure, still a minority of traffic.
    Expansion,
    /// The new path carries most traffic.
    Majority,
    /// All traffic on the new path (100%).
    Full,
    /// Emergency stop — traffic back on the legacy path (0%).
    Rollback,
}

impl RolloutStage {
    /// Forward stage order, lowest blast radius first.
    pub const FORWARD_ORDER: [RolloutStage; 5] = [
        RolloutStage::Shadow,
        RolloutStage::Canary,
        RolloutStage::Expansion,
        RolloutStage::Majority,
        RolloutStage::Full,
    ];

    /// The next forward stage, or `None` from `Full` and `Rollback`.
    pub fn next(self) -> Option<RolloutStage> {
        match self {
            RolloutStage::Shadow => Some(RolloutStage::Canary),
            RolloutStage::Canary => Some(RolloutStage::Expansion),
            RolloutStage::Expansion => Some(RolloutStage::Majority),
            RolloutStage::Majority => Some(RolloutStage::Full),
            RolloutStage::Full | RolloutStage::Rollback => None,
        }
    }

    /// Whether this stage can never be left by the running controller.
    pub fn is_terminal(self) -> bool {
        self == RolloutStage::Rollback
    }

    /// Stable identifier used in logs, metrics tags, and persisted JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            RolloutStage::Shadow => "shadow",
            RolloutStage::Canary => "canary",
            RolloutStage::Expansion => "expansion",
            RolloutStage::Majority => "majority",
            RolloutStage::Full => "full",
            RolloutStage::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for RolloutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions a stage must satisfy before unattended progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    /// Tolerable critical discrepancies (any more forces rollback).
    pub max_critical_discrepancies: u64,
    /// Tolerable high-severity discrepancies over the stage lifetime.
    pub max_high_discrepancies: u64,
    /// Maximum canary-vs-baseline error-rate delta, percentage points.
    pub max_error_rate_delta_percent: f64,
    /// Maximum canary-vs-baseline latency degradation, percent.
    pub max_latency_degradation_percent: f64,
    /// Time the stage must be stable before auto-progress, milliseconds.
    pub min_stable_duration_ms: u64,
}

/// Rates and deltas that raise alerts while a stage is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// High-severity discrepancies per hour.
    pub high_discrepancies_per_hour: f64,
    /// Error-rate delta, percentage points.
    pub error_rate_delta_percent: f64,
    /// Latency degradation, percent.
    pub latency_degradation_percent: f64,
}

/// Configuration for one forward stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Traffic percentage on entering the stage (0-100).
    pub min_percentage: f64,
    /// Traffic percentage ceiling within the stage (0-100).
    pub max_percentage: f64,
    /// Time that must elapse before the stage can be considered for exit,
    /// milliseconds.
    pub min_duration_ms: u64,
    pub success_criteria: SuccessCriteria,
    pub alert_thresholds: AlertThresholds,
    /// May the percentage rise unattended within the stage.
    pub auto_progress: bool,
    /// Entering the stage wants an external approval signal (advisory).
    pub requires_approval: bool,
}

const HOUR_MS: u64 = 60 * 60 * 1000;

/// The per-stage table for the five forward stages.
///
/// `Rollback` carries no configuration — it pins the percentage to zero and
/// has no exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutPlan {
    pub shadow: StageConfig,
    pub canary: StageConfig,
    pub expansion: StageConfig,
    pub majority: StageConfig,
    pub full: StageConfig,
}

impl Default for RolloutPlan {
    fn default() -> Self {
        Self {
            shadow: StageConfig {
                min_percentage: 0.0,
                max_percentage: 0.0,
                min_duration_ms: 24 * HOUR_MS,
                success_criteria: SuccessCriteria {
                    max_critical_discrepancies: 0,
                    max_high_discrepancies: 10,
                    max_error_rate_delta_percent: 1.0,
                    max_latency_degradation_percent: 10.0,
                    min_stable_duration_ms: 12 * HOUR_MS,
                },
                alert_thresholds: AlertThresholds {
                    high_discrepancies_per_hour: 5.0,
                    error_rate_delta_percent: 1.0,
                    latency_degradation_percent: 10.0,
                },
                auto_progress: true,
                requires_approval: false,
            },
            canary: StageConfig {
                min_percentage: 1.0,
                max_percentage: 5.0,
                min_duration_ms: 48 * HOUR_MS,
                success_criteria: SuccessCriteria {
                    max_critical_discrepancies: 0,
                    max_high_discrepancies: 5,
                    max_error_rate_delta_percent: 1.0,
                    max_latency_degradation_percent: 10.0,
                    min_stable_duration_ms: 24 * HOUR_MS,
                },
                alert_thresholds: AlertThresholds {
                    high_discrepancies_per_hour: 5.0,
                    error_rate_delta_percent: 1.0,
                    latency_degradation_percent: 10.0,
                },
                auto_progress: true,
                requires_approval: false,
            },
            expansion: StageConfig {
                min_percentage: 5.0,
                max_percentage: 25.0,
                min_duration_ms: 72 * HOUR_MS,
                success_criteria: SuccessCriteria {
                    max_critical_discrepancies: 0,
                    max_high_discrepancies: 5,
                    max_error_rate_delta_percent: 0.5,
                    max_latency_degradation_percent: 8.0,
                    min_stable_duration_ms: 24 * HOUR_MS,
                },
                alert_thresholds: AlertThresholds {
                    high_discrepancies_per_hour: 3.0,
                    error_rate_delta_percent: 0.5,
                    latency_degradation_percent: 8.0,
                },
                auto_progress: true,
                requires_approval: true,
            },
            majority: StageConfig {
                min_percentage: 25.0,
                max_percentage: 75.0,
                min_duration_ms: 96 * HOUR_MS,
                success_criteria: SuccessCriteria {
                    max_critical_discrepancies: 0,
                    max_high_discrepancies: 3,
                    max_error_rate_delta_percent: 0.5,
                    max_latency_degradation_percent: 5.0,
                    min_stable_duration_ms: 48 * HOUR_MS,
                },
                alert_thresholds: AlertThresholds {
                    high_discrepancies_per_hour: 2.0,
                    error_rate_delta_percent: 0.5,
                    latency_degradation_percent: 5.0,
                },
                auto_progress: true,
                requires_approval: true,
            },
            full: StageConfig {
                min_percentage: 100.0,
                max_percentage: 100.0,
                min_duration_ms: 0,
                success_criteria: SuccessCriteria {
                    max_critical_discrepancies: 0,
                    max_high_discrepancies: 3,
                    max_error_rate_delta_percent: 0.5,
                    max_latency_degradation_percent: 5.0,
                    min_stable_duration_ms: 0,
                },
                alert_thresholds: AlertThresholds {
                    high_discrepancies_per_hour: 2.0,
                    error_rate_delta_percent: 0.5,
                    latency_degradation_percent: 5.0,
                },
                auto_progress: false,
                requires_approval: true,
            },
        }
    }
}

impl RolloutPlan {
    /// Configuration for a forward stage; `None` for `Rollback`.
    pub fn config(&self, stage: RolloutStage) -> Option<&StageConfig> {
        match stage {
            RolloutStage::Shadow => Some(&self.shadow),
            RolloutStage::Canary => Some(&self.canary),
            RolloutStage::Expansion => Some(&self.expansion),
            RolloutStage::Majority => Some(&self.majority),
            RolloutStage::Full => Some(&self.full),
            RolloutStage::Rollback => None,
        }
    }

    /// Validate percentage bounds for every forward stage.
    pub fn validate(&self) -> Result<(), PlanError> {
        for stage in RolloutStage::FORWARD_ORDER {
            let Some(cfg) = self.config(stage) else {
                continue;
            };
            if !(0.0..=100.0).contains(&cfg.min_percentage)
                || !(0.0..=100.0).contains(&cfg.max_percentage)
            {
                return Err(PlanError::PercentageOutOfRange { stage });
            }
            if cfg.min_percentage > cfg.max_percentage {
                return Err(PlanError::InvertedBounds { stage });
            }
        }
        Ok(())
    }
}

/// Validation failures for a rollout plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("stage {stage}: percentage outside 0-100")]
    PercentageOutOfRange { stage: RolloutStage },

    #[error("stage {stage}: min_percentage exceeds max_percentage")]
    InvertedBounds { stage: RolloutStage },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_order_walks_shadow_to_full() {
        let mut stage = RolloutStage::Shadow;
        let mut walked = vec![stage];
        while let Some(next) = stage.next() {
            walked.push(next);
            stage = next;
        }
        assert_eq!(walked, RolloutStage::FORWARD_ORDER);
    }

    #[test]
    fn full_and_rollback_have_no_next() {
        assert_eq!(RolloutStage::Full.next(), None);
        assert_eq!(RolloutStage::Rollback.next(), None);
    }

    #[test]
    fn only_rollback_is_terminal() {
        assert!(RolloutStage::Rollback.is_terminal());
        for stage in RolloutStage::FORWARD_ORDER {
            assert!(!stage.is_terminal());
        }
    }

    #[test]
    fn default_plan_validates() {
        RolloutPlan::default().validate().unwrap();
    }

    #[test]
    fn default_plan_bounds_are_ordered() {
        let plan = RolloutPlan::default();
        for stage in RolloutStage::FORWARD_ORDER {
            let cfg = plan.config(stage).unwrap();
            assert!(
                cfg.min_percentage <= cfg.max_percentage,
                "stage {stage} has inverted bounds"
            );
        }
    }

    #[test]
    fn zero_traffic_stages_pin_both_bounds() {
        let plan = RolloutPlan::default();
        assert_eq!(plan.shadow.min_percentage, 0.0);
        assert_eq!(plan.shadow.max_percentage, 0.0);
        assert_eq!(plan.full.min_percentage, plan.full.max_percentage);
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut plan = RolloutPlan::default();
        plan.canary.min_percentage = 10.0;
        plan.canary.max_percentage = 5.0;
        assert!(matches!(
            plan.validate(),
            Err(PlanError::InvertedBounds {
                stage: RolloutStage::Canary
            })
        ));
    }

    #[test]
    fn out_of_range_percentage_rejected() {
        let mut plan = RolloutPlan::default();
        plan.majority.max_percentage = 120.0;
        assert!(matches!(
            plan.validate(),
            Err(PlanError::PercentageOutOfRange {
                stage: RolloutStage::Majority
            })
        ));
    }

    #[test]
    fn rollback_has_no_config() {
        assert!(RolloutPlan::default().config(RolloutStage::Rollback).is_none());
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&RolloutStage::Canary).unwrap();
        assert_eq!(json, "\"canary\"");
        let back: RolloutStage = serde_json::from_str("\"rollback\"").unwrap();
        assert_eq!(back, RolloutStage::Rollback);
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = RolloutPlan::default();
        let json = serde_json::to_string(&plan).unwrap();
        let back: RolloutPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
