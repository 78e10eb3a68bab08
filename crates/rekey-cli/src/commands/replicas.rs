//! Replica commands.
//!
//! Stand in for the rollout tooling of the serving replicas: a rollout
//! publishes the current target as the observed configuration of a fresh
//! revision and moves replicas onto it.

use anyhow::{bail, Result};
use clap::Subcommand;
use rekey_core::effects::{ConfigurationStore, ReplicaEffects};
use rekey_core::{ReplicaStatus, Revision};

use crate::context::CliContext;

#[derive(Subcommand)]
pub enum ReplicasCommand {
    /// Register replicas that have not reported a revision yet
    Register {
        /// Replica ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Roll the current target out to replicas
    Rollout {
        /// Only move the first N replicas, leaving the rest on their revision
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        count: Option<u64>,
    },

    /// Mark a replica stopped; it keeps its revision
    Stop { id: String },

    /// Mark a stopped replica running again
    Start { id: String },

    /// Forget a replica
    Remove { id: String },

    /// List replicas
    List,
}

pub async fn handle_replicas_command(ctx: &CliContext, cmd: ReplicasCommand) -> Result<()> {
    let registry = ctx.replicas();
    match cmd {
        ReplicasCommand::Register { ids } => {
            let statuses = ids
                .into_iter()
                .map(|id| ReplicaStatus {
                    id,
                    running: true,
                    revision: None,
                })
                .collect();
            registry.report_all(statuses).await?;
        }
        ReplicasCommand::Rollout { count } => {
            let revision = rollout(ctx, count).await?;
            println!("rolled out revision {revision}");
        }
        ReplicasCommand::Stop { id } => set_running(ctx, &id, false).await?,
        ReplicasCommand::Start { id } => set_running(ctx, &id, true).await?,
        ReplicasCommand::Remove { id } => registry.remove(&id).await?,
        ReplicasCommand::List => {
            for replica in registry.replicas().await? {
                println!(
                    "{}\t{}\t{}",
                    replica.id,
                    if replica.running { "running" } else { "stopped" },
                    replica.revision.as_ref().map_or("-", Revision::as_str)
                );
            }
        }
    }
    Ok(())
}

/// Publish the target under a new revision and move replicas onto it.
async fn rollout(ctx: &CliContext, count: Option<u64>) -> Result<Revision> {
    let registry = ctx.replicas();
    let configs = ctx.configs();
    let replicas = registry.replicas().await?;
    if replicas.is_empty() {
        bail!("no replicas registered");
    }

    let target = configs
        .current_target()
        .await?
        .map(|target| target.value)
        .unwrap_or_default();
    let revision = next_revision(&replicas);
    configs.publish_observed(&revision, &target).await?;

    let take = count.map_or(replicas.len(), |count| {
        usize::try_from(count).unwrap_or(usize::MAX)
    });
    let moved = replicas
        .into_iter()
        .take(take)
        .map(|replica| ReplicaStatus {
            revision: Some(revision.clone()),
            ..replica
        })
        .collect();
    registry.report_all(moved).await?;
    Ok(revision)
}

/// One past the highest numeric revision any replica reports.
fn next_revision(replicas: &[ReplicaStatus]) -> Revision {
    let highest = replicas
        .iter()
        .filter_map(|replica| replica.revision.as_ref()?.as_str().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Revision::new(highest.saturating_add(1).to_string())
}

async fn set_running(ctx: &CliContext, id: &str, running: bool) -> Result<()> {
    let registry = ctx.replicas();
    let Some(mut replica) = registry
        .replicas()
        .await?
        .into_iter()
        .find(|replica| replica.id == id)
    else {
        bail!("replica {id} is not registered");
    };
    replica.running = running;
    registry.report(replica).await?;
    Ok(())
}
