//! Run the controllers until interrupted.

use anyhow::{Context, Result};
use clap::Args;
use rekey_controllers::{ControllerEffects, ControllerSet};
use rekey_core::ResourcePolicy;
use rekey_effects::{RealRandomHandler, RealTimeHandler, WatchableStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::context::CliContext;
use crate::migrator::SimulatedRewrite;

#[derive(Args)]
pub struct RunCommand {
    /// Time each simulated storage rewrite takes, in milliseconds
    #[arg(long, default_value = "500")]
    pub migration_delay_ms: u64,

    /// Interval between runner health reports, in seconds
    #[arg(long, default_value = "60")]
    pub health_interval_secs: u64,
}

pub async fn handle_run_command(ctx: &CliContext, cmd: RunCommand) -> Result<()> {
    let effects = ControllerEffects::over_store(
        Arc::clone(&ctx.store),
        ctx.names.clone(),
        Arc::new(RealTimeHandler::new()),
        Arc::new(RealRandomHandler::new()),
        Arc::new(SimulatedRewrite::new(Duration::from_millis(cmd.migration_delay_ms))),
    );
    let controllers = ControllerSet::new(effects, ResourcePolicy::builtin(), &ctx.config);
    let running = controllers.spawn(ctx.store.watch());
    info!(
        component = %ctx.config.component,
        rotation_interval_secs = ctx.config.rotation_interval_secs,
        retention = ctx.config.retention,
        "rekey controllers started; press Ctrl+C to stop"
    );

    let mut health = tokio::time::interval(Duration::from_secs(cmd.health_interval_secs.max(1)));
    health.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl+C")?;
                break;
            }
            _ = health.tick() => {
                for (name, runner) in running.health() {
                    if runner.consecutive_failures > 0 {
                        warn!(
                            controller = name,
                            failures = runner.consecutive_failures,
                            error = runner.last_error.as_deref().unwrap_or(""),
                            "controller failing"
                        );
                    } else {
                        info!(
                            controller = name,
                            passes = runner.passes,
                            applied = runner.applied,
                            last = runner.last_outcome.as_deref().unwrap_or("none"),
                            "controller healthy"
                        );
                    }
                }
            }
        }
    }

    info!("shutting down");
    running.shutdown().await;
    Ok(())
}
