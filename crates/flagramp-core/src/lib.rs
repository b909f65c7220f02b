//! Flagramp domain types — rollout stages, plans, state, metrics, and ports.
//!
//! This crate holds the data model shared by the rollout controller, the
//! alert engine, and the state store, plus the trait seams to the external
//! systems Flagramp consumes (metrics backend, feature-flag store,
//! monitoring sink, approval workflow).
//!
//! # Components
//!
//! - **`stage`** — Rollout stage ordering and per-stage configuration
//! - **`state`** — The persisted rollout state document and its history log
//! - **`metrics`** — Point-in-time rollout metrics snapshots
//! - **`ports`** — Traits for the consumed external systems

pub mod metrics;
pub mod ports;
pub mod stage;
pub mod state;

pub use metrics::{
    DiscrepancyCounts, PerformanceMetrics, RolloutMetrics, StabilityMetrics, VolumeMetrics,
};
pub use ports::{
    ApprovalGate, AutoApprove, ErrorEvent, FeatureFlagUpdater, LogMonitor, MetricsSource,
    MonitoringPort, Severity,
};
pub use stage::{AlertThresholds, PlanError, RolloutPlan, RolloutStage, StageConfig, SuccessCriteria};
pub use state::{HistoryAction, HistoryEntry, HistoryLog, RolloutState, HISTORY_CAPACITY};
