//! Rollout controller — drives the rollout state machine.
//!
//! One controller instance governs one feature-flag migration. It loads
//! its state from the store on construction, mutates it exclusively, and
//! writes every mutation back through the store. Two timer loops run while
//! the rollout is active: health checks (pull metrics, evaluate, roll back
//! on critical signals) and auto-progression (double the percentage within
//! the stage once it has been stable long enough).

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flagramp_alerts::{Alert, AlertEngine, AlertRuleId};
use flagramp_core::{
    ErrorEvent, FeatureFlagUpdater, HistoryAction, HistoryEntry, MetricsSource, MonitoringPort,
    PlanError, RolloutMetrics, RolloutPlan, RolloutStage, RolloutState, Severity,
};
use flagramp_store::{StateStore, StoreError};

use crate::health::{self, HealthCheckResult};

/// Result type alias for controller operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors surfaced by controller operations.
///
/// Operational refusals (start from rollback, progress while paused) are
/// `Ok(false)` returns, not errors.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid rollout plan: {0}")]
    Plan(#[from] PlanError),

    #[error("metrics source error: {0}")]
    Metrics(String),
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Feature flag whose percentage this rollout governs.
    pub flag_name: String,
    /// Health-check loop interval.
    pub health_check_interval: Duration,
    /// Auto-progression loop interval.
    pub progression_interval: Duration,
    /// Error-rate delta escalation: rollback fires past
    /// `factor × threshold`. Kept configurable pending product
    /// confirmation of the historical 2× default.
    pub rollback_escalation_factor: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            flag_name: "new_code_path".to_string(),
            health_check_interval: Duration::from_secs(60),
            progression_interval: Duration::from_secs(300),
            rollback_escalation_factor: 2.0,
        }
    }
}

/// Handles for the two running timer loops.
struct LoopHandles {
    shutdown_tx: watch::Sender<bool>,
    health: JoinHandle<()>,
    progression: JoinHandle<()>,
}

/// The rollout controller. Construct one per process and share it via
/// [`Arc`]; the timer loops hold clones.
pub struct RolloutController {
    plan: RolloutPlan,
    config: ControllerConfig,
    store: Arc<dyn StateStore<RolloutState>>,
    metrics: Arc<dyn MetricsSource>,
    flags: Arc<dyn FeatureFlagUpdater>,
    monitoring: Arc<dyn MonitoringPort>,
    alerts: Mutex<AlertEngine>,
    state: Mutex<RolloutState>,
    loops: Mutex<Option<LoopHandles>>,
}

impl RolloutController {
    /// Build a controller over an existing (or fresh) state document.
    ///
    /// The plan is validated; the state is loaded from the store or
    /// defaulted to shadow at 0%.
    pub fn new(
        plan: RolloutPlan,
        config: ControllerConfig,
        store: Arc<dyn StateStore<RolloutState>>,
        metrics: Arc<dyn MetricsSource>,
        flags: Arc<dyn FeatureFlagUpdater>,
        monitoring: Arc<dyn MonitoringPort>,
    ) -> RolloutResult<Self> {
        plan.validate()?;
        let state = match store.read()? {
            Some(state) => {
                debug!(stage = %state.current_stage, percent = state.current_percentage,
                    "rollout state loaded");
                state
            }
            None => RolloutState::new(epoch_ms()),
        };
        let alerts = AlertEngine::new(monitoring.clone());
        Ok(Self {
            plan,
            config,
            store,
            metrics,
            flags,
            monitoring,
            alerts: Mutex::new(alerts),
            state: Mutex::new(state),
            loops: Mutex::new(None),
        })
    }

    // ── Public operations ──────────────────────────────────────────

    /// Resume the rollout and start both timer loops.
    ///
    /// Refused from the terminal `rollback` stage: the operator must
    /// `reset()` first.
    pub fn start(self: &Arc<Self>) -> RolloutResult<bool> {
        let now = epoch_ms();
        {
            let mut state = self.lock_state();
            if state.current_stage == RolloutStage::Rollback {
                warn!("rollout is rolled back; start refused until reset");
                return Ok(false);
            }
            let mut next = state.clone();
            next.is_paused = false;
            next.history.push(history_entry(&next, now, HistoryAction::Resume, None));
            self.store.write(&next)?;
            *state = next;
        }
        self.spawn_loops();
        self.monitoring
            .increment_counter("rollout_started", &[("flag", &self.config.flag_name)]);
        info!(flag = %self.config.flag_name, "rollout started");
        Ok(true)
    }

    /// Stop both timer loops and mark the rollout paused.
    ///
    /// The loops are cancelled synchronously, so no tick scheduled after
    /// this call will run. Stage and percentage are untouched.
    pub fn pause(&self) -> RolloutResult<()> {
        self.stop_loops();
        let now = epoch_ms();
        {
            let mut state = self.lock_state();
            let mut next = state.clone();
            next.is_paused = true;
            next.history.push(history_entry(&next, now, HistoryAction::Pause, None));
            self.store.write(&next)?;
            *state = next;
        }
        self.monitoring
            .increment_counter("rollout_paused", &[("flag", &self.config.flag_name)]);
        info!(flag = %self.config.flag_name, "rollout paused");
        Ok(())
    }

    /// Move to the next forward stage at its minimum percentage.
    ///
    /// Returns false while paused and at the end of the stage order.
    /// Approval requirements on the target stage are advisory: a metric is
    /// emitted, an external gate may intercept before calling this.
    pub fn progress_to_next_stage(&self) -> RolloutResult<bool> {
        let now = epoch_ms();
        let (next_stage, percent) = {
            let mut state = self.lock_state();
            if state.is_paused {
                warn!("progress refused: rollout is paused");
                return Ok(false);
            }
            let Some(next_stage) = state.current_stage.next() else {
                warn!(stage = %state.current_stage, "progress refused: no further stage");
                return Ok(false);
            };
            let Some(cfg) = self.plan.config(next_stage) else {
                return Ok(false);
            };
            if cfg.requires_approval {
                self.monitoring.increment_counter(
                    "rollout_approval_required",
                    &[("stage", next_stage.as_str())],
                );
            }

            let mut next = state.clone();
            next.current_stage = next_stage;
            next.current_percentage = cfg.min_percentage;
            next.stage_start_time = now;
            next.last_progression = Some(now);
            next.history
                .push(history_entry(&next, now, HistoryAction::Enter, None));
            if next_stage == RolloutStage::Full {
                next.history
                    .push(history_entry(&next, now, HistoryAction::Complete, None));
            }
            self.store.write(&next)?;
            let percent = next.current_percentage;
            *state = next;
            (next_stage, percent)
        };

        self.apply_flag_percentage(percent);
        self.monitoring.increment_counter(
            "rollout_stage_transition",
            &[("to", next_stage.as_str())],
        );
        info!(stage = %next_stage, percent, "entered rollout stage");
        Ok(true)
    }

    /// Pull all traffic back to the legacy path and park in `rollback`.
    ///
    /// Always accepted, never rate-limited; repeated calls append further
    /// history entries. Stops both timer loops. A persistence failure is
    /// reported after the in-memory state has already rolled back —
    /// safety first, durability second.
    pub fn rollback(&self, reason: &str) -> RolloutResult<()> {
        let now = epoch_ms();
        let (prior_stage, prior_percent) = {
            let state = self.lock_state();
            (state.current_stage, state.current_percentage)
        };

        self.monitoring.record_error(ErrorEvent {
            message: format!("rollout rollback triggered: {reason}"),
            severity: Severity::Critical,
            context: serde_json::json!({
                "flag": self.config.flag_name,
                "stage": prior_stage.as_str(),
                "percentage": prior_percent,
            }),
        });
        self.apply_flag_percentage(0.0);

        let persisted = {
            let mut state = self.lock_state();
            let mut next = state.clone();
            next.current_stage = RolloutStage::Rollback;
            next.current_percentage = 0.0;
            next.is_healthy = false;
            next.history.push(history_entry(
                &next,
                now,
                HistoryAction::Rollback,
                Some(reason.to_string()),
            ));
            let persisted = self.store.write(&next);
            *state = next;
            persisted
        };

        self.stop_loops();
        self.monitoring
            .increment_counter("rollout_rollback", &[("flag", &self.config.flag_name)]);
        warn!(flag = %self.config.flag_name, from = %prior_stage, reason, "rolled back");
        persisted?;
        Ok(())
    }

    /// Reset a rolled-back (or any) rollout to a fresh shadow state.
    ///
    /// The operator remediation step that makes `start()` valid again.
    pub fn reset(&self) -> RolloutResult<()> {
        self.stop_loops();
        let now = epoch_ms();
        {
            let mut state = self.lock_state();
            let next = RolloutState::new(now);
            self.store.write(&next)?;
            *state = next;
        }
        self.monitoring
            .increment_counter("rollout_reset", &[("flag", &self.config.flag_name)]);
        info!(flag = %self.config.flag_name, "rollout state reset to shadow");
        Ok(())
    }

    /// Pull a metrics snapshot and evaluate it against the active stage.
    ///
    /// A metrics-source failure is an error — the caller treats it as "no
    /// signal this cycle". On a rollback verdict the rollback runs
    /// immediately unless the rollout is paused.
    pub fn perform_health_check(&self) -> RolloutResult<HealthCheckResult> {
        self.health_check_at(epoch_ms())
    }

    /// Health check at an explicit timestamp (deterministic for tests).
    pub fn health_check_at(&self, now_ms: u64) -> RolloutResult<HealthCheckResult> {
        let metrics = self
            .metrics
            .rollout_metrics()
            .map_err(|e| RolloutError::Metrics(e.to_string()))?;

        let (stage, stage_start) = {
            let state = self.lock_state();
            (state.current_stage, state.stage_start_time)
        };
        let Some(cfg) = self.plan.config(stage) else {
            // Rolled back: nothing to evaluate, nothing to recommend.
            return Ok(HealthCheckResult {
                healthy: false,
                should_rollback: false,
                alerts: Vec::new(),
                recommendation: health::Recommendation::Hold,
            });
        };

        let hours_in_stage = now_ms.saturating_sub(stage_start) as f64 / 3_600_000.0;
        let result = health::evaluate(
            &metrics,
            &cfg.alert_thresholds,
            self.config.rollback_escalation_factor,
            hours_in_stage,
        );

        // Alert lifecycle and circuit breaker run on every snapshot.
        {
            let mut engine = self.lock_alerts();
            engine.evaluate_at(&metrics, &cfg.alert_thresholds, hours_in_stage, now_ms);
        }

        let is_paused = {
            let mut state = self.lock_state();
            let mut next = state.clone();
            next.is_healthy = result.healthy;
            next.last_health_check = Some(now_ms);
            self.store.write(&next)?;
            *state = next;
            state.is_paused
        };

        if result.should_rollback && !is_paused {
            self.rollback(&health::rollback_reason(&metrics, &cfg.alert_thresholds))?;
        } else {
            debug!(
                stage = %stage,
                healthy = result.healthy,
                alerts = result.alerts.len(),
                "health check completed"
            );
        }

        Ok(result)
    }

    /// One auto-progression tick: double the percentage within the stage,
    /// clamped to its ceiling. Returns the new percentage when one was
    /// applied.
    pub fn run_progression_once(&self) -> RolloutResult<Option<f64>> {
        self.progression_tick_at(epoch_ms())
    }

    /// Auto-progression at an explicit timestamp (deterministic for tests).
    pub fn progression_tick_at(&self, now_ms: u64) -> RolloutResult<Option<f64>> {
        let target = {
            let mut state = self.lock_state();
            if state.is_paused || !state.is_healthy {
                return Ok(None);
            }
            let Some(cfg) = self.plan.config(state.current_stage) else {
                return Ok(None);
            };
            if !cfg.auto_progress {
                return Ok(None);
            }
            let elapsed = now_ms.saturating_sub(state.stage_start_time);
            if elapsed < cfg.success_criteria.min_stable_duration_ms {
                return Ok(None);
            }
            // Stages with min == max (shadow, full) never pass this check.
            if state.current_percentage >= cfg.max_percentage {
                return Ok(None);
            }

            let target = (state.current_percentage * 2.0).min(cfg.max_percentage);
            let mut next = state.clone();
            next.current_percentage = target;
            next.last_progression = Some(now_ms);
            next.history.push(history_entry(
                &next,
                now_ms,
                HistoryAction::Progress,
                Some("auto-progression".to_string()),
            ));
            self.store.write(&next)?;
            *state = next;
            target
        };

        self.apply_flag_percentage(target);
        info!(percent = target, "auto-progressed within stage");
        Ok(Some(target))
    }

    // ── Read-only accessors ────────────────────────────────────────

    /// Defensive copy of the rollout state.
    pub fn state(&self) -> RolloutState {
        self.lock_state().clone()
    }

    /// Passthrough to the metrics source for external inspection.
    pub fn metrics(&self) -> RolloutResult<RolloutMetrics> {
        self.metrics
            .rollout_metrics()
            .map_err(|e| RolloutError::Metrics(e.to_string()))
    }

    /// Whether the timer loops are currently running.
    pub fn is_running(&self) -> bool {
        self.lock_loops().is_some()
    }

    /// Whether the store has degraded to non-durable persistence.
    pub fn is_persistence_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    // ── Alert passthrough ──────────────────────────────────────────

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.lock_alerts().active_alerts()
    }

    pub fn acknowledge_alert(&self, id: AlertRuleId) -> bool {
        self.lock_alerts().acknowledge(id)
    }

    pub fn resolve_alert(&self, id: AlertRuleId) -> bool {
        self.lock_alerts().resolve(id)
    }

    /// Advisory latch for external callers: while tripped, do not call
    /// [`progress_to_next_stage`](Self::progress_to_next_stage).
    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.lock_alerts().is_circuit_breaker_tripped()
    }

    pub fn reset_circuit_breaker(&self) {
        self.lock_alerts().reset_circuit_breaker();
    }

    // ── Loop management ────────────────────────────────────────────

    /// Stop the timer loops without touching rollout state (graceful
    /// process shutdown).
    pub fn shutdown(&self) {
        self.stop_loops();
        info!(flag = %self.config.flag_name, "rollout controller stopped");
    }

    fn spawn_loops(self: &Arc<Self>) {
        let mut loops = self.lock_loops();
        if loops.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let health = tokio::spawn(run_health_loop(self.clone(), shutdown_rx.clone()));
        let progression = tokio::spawn(run_progression_loop(self.clone(), shutdown_rx));
        *loops = Some(LoopHandles {
            shutdown_tx,
            health,
            progression,
        });
        debug!("rollout timers started");
    }

    fn stop_loops(&self) {
        let mut loops = self.lock_loops();
        if let Some(handles) = loops.take() {
            let _ = handles.shutdown_tx.send(true);
            handles.health.abort();
            handles.progression.abort();
            debug!("rollout timers stopped");
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Best-effort flag store update; controller state is the source of
    /// truth for intent, not the flag store's confirmation.
    fn apply_flag_percentage(&self, percent: f64) {
        if let Err(e) = self.flags.set_percentage(&self.config.flag_name, percent) {
            warn!(flag = %self.config.flag_name, percent, error = %e,
                "feature flag update failed");
        }
        self.monitoring.record_metric(
            "rollout_percentage",
            percent,
            &[("flag", &self.config.flag_name)],
        );
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RolloutState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_alerts(&self) -> std::sync::MutexGuard<'_, AlertEngine> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_loops(&self) -> std::sync::MutexGuard<'_, Option<LoopHandles>> {
        self.loops.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The health-check loop. The next tick is only scheduled after the
/// previous one completes, so a slow check never overlaps itself.
async fn run_health_loop(ctrl: Arc<RolloutController>, mut shutdown: watch::Receiver<bool>) {
    info!(
        interval_secs = ctrl.config.health_check_interval.as_secs(),
        "health-check loop started"
    );
    loop {
        tokio::select! {
            _ = tokio::time::sleep(ctrl.config.health_check_interval) => {
                if let Err(e) = ctrl.perform_health_check() {
                    // No signal this cycle; try again next tick.
                    warn!(error = %e, "health check skipped");
                }
            }
            _ = shutdown.changed() => {
                debug!("health-check loop shutting down");
                break;
            }
        }
    }
}

/// The auto-progression loop, independent of the health-check loop.
async fn run_progression_loop(ctrl: Arc<RolloutController>, mut shutdown: watch::Receiver<bool>) {
    info!(
        interval_secs = ctrl.config.progression_interval.as_secs(),
        "auto-progression loop started"
    );
    loop {
        tokio::select! {
            _ = tokio::time::sleep(ctrl.config.progression_interval) => {
                if let Err(e) = ctrl.run_progression_once() {
                    warn!(error = %e, "auto-progression tick failed");
                }
            }
            _ = shutdown.changed() => {
                debug!("auto-progression loop shutting down");
                break;
            }
        }
    }
}

fn history_entry(
    state: &RolloutState,
    now_ms: u64,
    action: HistoryAction,
    reason: Option<String>,
) -> HistoryEntry {
    HistoryEntry {
        timestamp: now_ms,
        stage: state.current_stage,
        percentage: state.current_percentage,
        action,
        reason,
        metrics: None,
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
