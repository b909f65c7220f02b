//! The persisted rollout state document and its bounded history log.
//!
//! One `RolloutState` exists per governed deployment. It is created on
//! first access, mutated exclusively by the rollout controller, and never
//! deleted — an aborted rollout parks in the `Rollback` stage until an
//! operator resets it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::metrics::RolloutMetrics;
use crate::stage::RolloutStage;

/// Maximum history entries retained; older entries are overwritten.
pub const HISTORY_CAPACITY: usize = 100;

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// A stage was entered.
    Enter,
    /// The percentage rose within a stage.
    Progress,
    /// The rollout reached the final stage.
    Complete,
    /// Traffic was pulled back to the legacy path.
    Rollback,
    Pause,
    Resume,
}

/// An immutable, write-once record of one rollout event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unix timestamp, milliseconds.
    pub timestamp: u64,
    pub stage: RolloutStage,
    pub percentage: f64,
    pub action: HistoryAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RolloutMetrics>,
}

/// Append-only event log bounded at [`HISTORY_CAPACITY`] entries.
///
/// The bound is structural: pushing to a full log drops the oldest entry.
/// Serializes as a plain JSON array, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<HistoryEntry>", into = "Vec<HistoryEntry>")]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Append an entry, dropping the oldest when at capacity.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Number of entries recording the given action.
    pub fn count_action(&self, action: HistoryAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

impl From<Vec<HistoryEntry>> for HistoryLog {
    fn from(mut entries: Vec<HistoryEntry>) -> Self {
        // A document written by an older build may exceed the cap; keep the
        // newest entries.
        if entries.len() > HISTORY_CAPACITY {
            entries.drain(..entries.len() - HISTORY_CAPACITY);
        }
        Self {
            entries: entries.into(),
        }
    }
}

impl From<HistoryLog> for Vec<HistoryEntry> {
    fn from(log: HistoryLog) -> Self {
        log.entries.into()
    }
}

/// The singleton rollout state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    pub current_stage: RolloutStage,
    /// Live traffic on the new path (0-100). Zero whenever the stage is
    /// `Shadow` or `Rollback`.
    pub current_percentage: f64,
    /// When the current stage was entered, Unix milliseconds.
    pub stage_start_time: u64,
    /// Last completed health check, Unix milliseconds.
    #[serde(default)]
    pub last_health_check: Option<u64>,
    /// Last stage transition or percentage increase, Unix milliseconds.
    #[serde(default)]
    pub last_progression: Option<u64>,
    pub is_healthy: bool,
    pub is_paused: bool,
    #[serde(default)]
    pub history: HistoryLog,
}

impl RolloutState {
    /// Fresh state: shadow stage, no traffic, healthy, running.
    pub fn new(now_ms: u64) -> Self {
        Self {
            current_stage: RolloutStage::Shadow,
            current_percentage: 0.0,
            stage_start_time: now_ms,
            last_health_check: None,
            last_progression: None,
            is_healthy: true,
            is_paused: false,
            history: HistoryLog::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: u64, action: HistoryAction) -> HistoryEntry {
        HistoryEntry {
            timestamp,
            stage: RolloutStage::Canary,
            percentage: 1.0,
            action,
            reason: None,
            metrics: None,
        }
    }

    #[test]
    fn fresh_state_is_shadow_at_zero() {
        let state = RolloutState::new(1_000);
        assert_eq!(state.current_stage, RolloutStage::Shadow);
        assert_eq!(state.current_percentage, 0.0);
        assert!(state.is_healthy);
        assert!(!state.is_paused);
        assert!(state.history.is_empty());
    }

    #[test]
    fn history_drops_oldest_past_capacity() {
        let mut log = HistoryLog::new();
        for i in 0..(HISTORY_CAPACITY as u64 + 25) {
            log.push(entry(i, HistoryAction::Progress));
        }
        assert_eq!(log.len(), HISTORY_CAPACITY);
        // The first 25 entries were overwritten.
        assert_eq!(log.iter().next().unwrap().timestamp, 25);
        assert_eq!(
            log.last().unwrap().timestamp,
            HISTORY_CAPACITY as u64 + 24
        );
    }

    #[test]
    fn history_counts_actions() {
        let mut log = HistoryLog::new();
        log.push(entry(1, HistoryAction::Enter));
        log.push(entry(2, HistoryAction::Rollback));
        log.push(entry(3, HistoryAction::Rollback));
        assert_eq!(log.count_action(HistoryAction::Rollback), 2);
        assert_eq!(log.count_action(HistoryAction::Pause), 0);
    }

    #[test]
    fn history_serializes_as_array() {
        let mut log = HistoryLog::new();
        log.push(entry(1, HistoryAction::Enter));
        log.push(entry(2, HistoryAction::Progress));
        let json = serde_json::to_value(&log).unwrap();
        assert!(json.is_array());
        assert_eq!(json.as_array().unwrap().len(), 2);

        let back: HistoryLog = serde_json::from_value(json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn oversized_persisted_history_is_truncated_to_newest() {
        let entries: Vec<HistoryEntry> = (0..150u64)
            .map(|i| entry(i, HistoryAction::Progress))
            .collect();
        let log = HistoryLog::from(entries);
        assert_eq!(log.len(), HISTORY_CAPACITY);
        assert_eq!(log.iter().next().unwrap().timestamp, 50);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = RolloutState::new(5_000);
        state.current_stage = RolloutStage::Canary;
        state.current_percentage = 2.0;
        state.history.push(entry(5_001, HistoryAction::Enter));

        let json = serde_json::to_string(&state).unwrap();
        let back: RolloutState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn state_without_optional_fields_deserializes() {
        // A minimal document, as an older writer might have produced.
        let json = r#"{
            "current_stage": "shadow",
            "current_percentage": 0.0,
            "stage_start_time": 0,
            "is_healthy": true,
            "is_paused": false
        }"#;
        let state: RolloutState = serde_json::from_str(json).unwrap();
        assert_eq!(state.last_health_check, None);
        assert!(state.history.is_empty());
    }
}
