//! flagrampd — the Flagramp rollout controller daemon.
//!
//! Single binary that assembles the rollout subsystems:
//! - Locked-file state store
//! - Metrics source and feature-flag adapters
//! - Alert engine + rollout controller with both timer loops
//!
//! # Usage
//!
//! ```text
//! flagrampd run --config flagramp.toml
//! flagrampd status
//! flagrampd advance
//! flagrampd rollback --reason "checkout errors spiking"
//! ```
//!
//! `run` is the long-lived controller process; the other subcommands are
//! one-shot operations over the shared state document (the file lock is
//! the cross-process exclusion).

mod adapters;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use flagramp_core::{ApprovalGate, AutoApprove, LogMonitor, RolloutState};
use flagramp_rollout::RolloutController;
use flagramp_store::LockedFileStore;

use crate::adapters::{FileFlagUpdater, FileMetricsSource};
use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "flagrampd", about = "Flagramp rollout controller daemon")]
struct Cli {
    /// Path to the TOML config file (defaults apply when omitted).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller with both timer loops until Ctrl-C.
    Run,
    /// Print the current rollout state.
    Status,
    /// Advance to the next stage (consults the approval gate).
    Advance,
    /// Pause the rollout and stop its timers.
    Pause,
    /// Resume a paused rollout.
    Resume,
    /// Pull all traffic back to the legacy path.
    Rollback {
        /// Why the rollback is happening; lands in the history record.
        #[arg(long)]
        reason: String,
    },
    /// Reset a rolled-back rollout to a fresh shadow state.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flagramp=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = DaemonConfig::load(cli.config.as_deref())?;
    let controller = build_controller(&config)?;

    match cli.command {
        Command::Run => run(controller).await,
        Command::Status => {
            print_status(&controller);
            Ok(())
        }
        Command::Advance => advance(&config, &controller),
        Command::Pause => {
            controller.pause()?;
            println!("rollout paused");
            Ok(())
        }
        Command::Resume => {
            if controller.start()? {
                controller.shutdown();
                println!("rollout resumed");
            } else {
                println!("rollout is rolled back; run `flagrampd reset` first");
            }
            Ok(())
        }
        Command::Rollback { reason } => {
            controller.rollback(&reason)?;
            println!("rolled back: {reason}");
            Ok(())
        }
        Command::Reset => {
            controller.reset()?;
            println!("rollout state reset to shadow");
            Ok(())
        }
    }
}

fn build_controller(config: &DaemonConfig) -> anyhow::Result<Arc<RolloutController>> {
    let store: Arc<LockedFileStore<RolloutState>> =
        Arc::new(LockedFileStore::new(&config.state_path));
    let metrics = Arc::new(FileMetricsSource::new(&config.metrics_path));
    let flags = Arc::new(FileFlagUpdater::new(&config.flags_path));
    let controller = RolloutController::new(
        config.plan.clone(),
        config.controller_config(),
        store,
        metrics,
        flags,
        Arc::new(LogMonitor),
    )?;
    Ok(Arc::new(controller))
}

async fn run(controller: Arc<RolloutController>) -> anyhow::Result<()> {
    info!("flagramp daemon starting");

    if !controller.start()? {
        anyhow::bail!("rollout is rolled back; run `flagrampd reset` before `run`");
    }
    if controller.is_persistence_degraded() {
        tracing::warn!("rollout state is not durable on this filesystem");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    controller.shutdown();

    info!("flagramp daemon stopped");
    Ok(())
}

fn advance(config: &DaemonConfig, controller: &Arc<RolloutController>) -> anyhow::Result<()> {
    let state = controller.state();
    let gate = AutoApprove;

    if controller.is_circuit_breaker_tripped() {
        println!("circuit breaker is tripped; refusing to advance");
        return Ok(());
    }
    if let Some(target) = state.current_stage.next()
        && let Some(cfg) = config.plan.config(target)
        && cfg.requires_approval
        && !gate.approve(target)
    {
        println!("stage {target} requires approval; advance refused");
        return Ok(());
    }

    if controller.progress_to_next_stage()? {
        let state = controller.state();
        println!(
            "advanced to {} at {:.1}%",
            state.current_stage, state.current_percentage
        );
    } else {
        println!("cannot advance (paused, rolled back, or already at full)");
    }
    Ok(())
}

fn print_status(controller: &Arc<RolloutController>) {
    let state = controller.state();
    println!("stage:       {}", state.current_stage);
    println!("percentage:  {:.1}%", state.current_percentage);
    println!("healthy:     {}", state.is_healthy);
    println!("paused:      {}", state.is_paused);
    println!(
        "durable:     {}",
        if controller.is_persistence_degraded() {
            "no (degraded)"
        } else {
            "yes"
        }
    );

    let recent: Vec<_> = state.history.iter().collect();
    if !recent.is_empty() {
        println!("recent history:");
        for entry in recent.iter().rev().take(5) {
            let reason = entry.reason.as_deref().unwrap_or("-");
            println!(
                "  {} {:?} {} @ {:.1}% ({reason})",
                entry.timestamp, entry.action, entry.stage, entry.percentage
            );
        }
    }
}
