//! Lifecycle status.

use anyhow::Result;
use clap::Args;
use rekey_controllers::{ClusterSnapshot, ControllerEffects};
use rekey_core::{EncryptionKey, KeyMaterial, KeyStage};
use rekey_effects::{RealRandomHandler, RealTimeHandler};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::context::CliContext;
use crate::migrator::SimulatedRewrite;

#[derive(Args)]
pub struct StatusCommand {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// One key as shown to operators. Never carries material, only its fingerprint.
#[derive(Debug, Serialize)]
struct KeySummary {
    id: u64,
    function: String,
    stage: String,
    reason: String,
    created_at_ms: u64,
    fingerprint: Option<String>,
    migrated_resources: Vec<String>,
    deletion_requested: bool,
}

impl KeySummary {
    fn new(key: &EncryptionKey, stage: Option<KeyStage>) -> Self {
        Self {
            id: key.id.0,
            function: key.function.to_string(),
            stage: stage.map_or_else(|| "unknown".to_string(), |stage| stage.to_string()),
            reason: key.reason.to_string(),
            created_at_ms: key.created_at.ts_ms,
            fingerprint: key.material.as_ref().map(KeyMaterial::fingerprint),
            migrated_resources: key
                .migrated_resources
                .iter()
                .map(ToString::to_string)
                .collect(),
            deletion_requested: key.deletion_requested,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    component: String,
    mode: String,
    target: String,
    convergence: String,
    keys: Vec<KeySummary>,
}

pub async fn handle_status_command(ctx: &CliContext, cmd: StatusCommand) -> Result<()> {
    let effects = ControllerEffects::over_store(
        Arc::clone(&ctx.store),
        ctx.names.clone(),
        Arc::new(RealTimeHandler::new()),
        Arc::new(RealRandomHandler::new()),
        Arc::new(SimulatedRewrite::new(Duration::ZERO)),
    );
    let snapshot = ClusterSnapshot::load(&effects).await?;
    let stages = snapshot.key_stages();
    let report = StatusReport {
        component: ctx.config.component.clone(),
        mode: snapshot.mode().to_string(),
        target: snapshot.target().to_string(),
        convergence: snapshot.convergence().status().to_string(),
        keys: snapshot
            .key_records()
            .iter()
            .map(|key| KeySummary::new(key, stages.get(&key.id).copied()))
            .collect(),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("component:   {}", report.component);
    println!("mode:        {}", report.mode);
    println!("target:      {}", report.target);
    println!("convergence: {}", report.convergence);
    if report.keys.is_empty() {
        println!("keys:        none");
        return Ok(());
    }
    println!("keys:");
    for key in &report.keys {
        let marked = if key.deletion_requested { " (deleting)" } else { "" };
        println!(
            "  {:>4}  {:<8}  {:<10}  {:<14}  {}  migrated: [{}]{}",
            key.id,
            key.function,
            key.stage,
            key.reason,
            key.fingerprint.as_deref().unwrap_or("-"),
            key.migrated_resources.join(", "),
            marked
        );
    }
    Ok(())
}
