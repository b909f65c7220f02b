//! Flagramp alert engine — rule evaluation, lifecycle, and circuit breaker.
//!
//! A fixed, ordered table of alert rules is evaluated against each metrics
//! snapshot. The engine owns the alert lifecycle (create, acknowledge,
//! resolve, auto-resolve), enforces per-rule cooldowns, and latches a
//! circuit breaker the first time a critical condition fires.
//!
//! # Components
//!
//! - **`rules`** — The canonical rule table and its evaluator
//! - **`engine`** — Alert lifecycle state and the circuit breaker

pub mod engine;
pub mod rules;

pub use engine::{Alert, AlertEngine};
pub use rules::{per_hour, AlertRule, AlertRuleId, ALERT_RULES, LOW_TRAFFIC_FLOOR};
