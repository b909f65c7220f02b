//! Controller persistence over the locked-file store.
//!
//! Exercises the full write path: every controller mutation lands in the
//! JSON document, a restarted controller resumes from it, and no lock or
//! tmp artifacts survive.

use std::sync::Arc;

use flagramp_core::{
    FeatureFlagUpdater, LogMonitor, MetricsSource, RolloutMetrics, RolloutPlan, RolloutStage,
};
use flagramp_rollout::{ControllerConfig, RolloutController};
use flagramp_store::{LockedFileStore, StateStore};

struct ZeroMetrics;

impl MetricsSource for ZeroMetrics {
    fn rollout_metrics(&self) -> anyhow::Result<RolloutMetrics> {
        Ok(RolloutMetrics::default())
    }
}

struct NullFlags;

impl FeatureFlagUpdater for NullFlags {
    fn set_percentage(&self, _flag: &str, _percent: f64) -> anyhow::Result<()> {
        Ok(())
    }
}

fn controller(store: Arc<LockedFileStore<flagramp_core::RolloutState>>) -> RolloutController {
    RolloutController::new(
        RolloutPlan::default(),
        ControllerConfig::default(),
        store,
        Arc::new(ZeroMetrics),
        Arc::new(NullFlags),
        Arc::new(LogMonitor),
    )
    .unwrap()
}

#[test]
fn restarted_controller_resumes_from_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollout-state.json");

    {
        let store = Arc::new(LockedFileStore::new(&path));
        let ctrl = controller(store);
        ctrl.progress_to_next_stage().unwrap();
        ctrl.progress_to_next_stage().unwrap();
    }

    // A new process over the same path picks up where the last left off.
    let store = Arc::new(LockedFileStore::new(&path));
    let ctrl = controller(store.clone());
    let state = ctrl.state();
    assert_eq!(state.current_stage, RolloutStage::Expansion);
    assert_eq!(state.current_percentage, 5.0);
    assert_eq!(state.history.len(), 2);

    // No artifacts beside the document.
    let entries: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec!["rollout-state.json".to_string()]);

    // The document itself is well-formed JSON matching the state.
    let raw = std::fs::read_to_string(&path).unwrap();
    let doc: flagramp_core::RolloutState = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc, state);
    drop(ctrl);
    assert!(store.read().unwrap().is_some());
}

#[test]
fn rollback_survives_restart_and_blocks_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollout-state.json");

    {
        let store = Arc::new(LockedFileStore::new(&path));
        let ctrl = controller(store);
        ctrl.progress_to_next_stage().unwrap();
        ctrl.rollback("bad deploy").unwrap();
    }

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = Arc::new(LockedFileStore::new(&path));
        let ctrl = Arc::new(controller(store));
        assert_eq!(ctrl.state().current_stage, RolloutStage::Rollback);
        // Terminal across restarts until an operator reset.
        assert!(!ctrl.start().unwrap());

        ctrl.reset().unwrap();
        assert!(ctrl.start().unwrap());
        ctrl.shutdown();
    });
}
