//! fleetd — the Fleet operator binary.
//!
//! Resolves component layouts, enqueues deploy jobs into the state store
//! and inspects them. `simulate` runs a deploy end to end against the
//! in-memory platform.
//!
//! # Usage
//!
//! ```text
//! fleetd --config fleet.toml layout cas
//! fleetd --config fleet.toml enqueue cas 3f2a9c1
//! fleetd --config fleet.toml jobs --active
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use fleet_core::{Component, DeployKind, FleetConfig, Layout};
use fleet_rollout::{DeployJob, JobContext, LogNotifier, MemoryPlatform, PlatformOrchestrator};
use fleet_state::{
    DeployParams, JobParams, JobStage, JobState, StateStore, PARAM_COMPONENT, PARAM_SHA,
};

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet rollout operator")]
struct Cli {
    /// Path to fleet.toml.
    #[arg(long, default_value = "fleet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved layout of a component as JSON.
    Layout { component: Component },

    /// Persist a queued deploy job and print its id.
    Enqueue { component: String, sha: String },

    /// List persisted jobs.
    Jobs {
        /// Only jobs that are not yet completed or failed.
        #[arg(long)]
        active: bool,
    },

    /// Print one job as JSON.
    Show { id: String },

    /// Print the last built and deployed commit of a component.
    Hashes { component: Component },

    /// Run a deploy to completion against an in-memory platform.
    Simulate {
        component: Component,
        sha: String,

        /// Give up after this many advances.
        #[arg(long, default_value = "10")]
        max_steps: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetd=debug,fleet=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = FleetConfig::from_file(&cli.config)?;
    info!(env = %config.env(), "config loaded");

    match cli.command {
        Command::Layout { component } => {
            let layout = config.resolver().resolve(component);
            println!("{}", serde_json::to_string_pretty(&layout)?);
        }
        Command::Enqueue { component, sha } => {
            let raw = BTreeMap::from([
                (PARAM_COMPONENT.to_string(), component),
                (PARAM_SHA.to_string(), sha),
            ]);
            let params = DeployParams::from_raw(&raw)?;
            let job = JobState::new_deploy(params);
            open_store(&config)?.put_job(&job)?;
            info!(job = %job.id, "deploy job queued");
            println!("{}", job.id);
        }
        Command::Jobs { active } => {
            let store = open_store(&config)?;
            let jobs = if active {
                store.list_active_jobs()?
            } else {
                store.list_jobs()?
            };
            for job in &jobs {
                print_job_line(job);
            }
        }
        Command::Show { id } => {
            let job = open_store(&config)?
                .get_job(&id)?
                .with_context(|| format!("job {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Hashes { component } => {
            match open_store(&config)?.get_component_hashes(component)? {
                Some(hashes) => println!("{}", serde_json::to_string_pretty(&hashes)?),
                None => println!("no hashes recorded for {component}"),
            }
        }
        Command::Simulate {
            component,
            sha,
            max_steps,
        } => {
            let job = simulate(&config, component, sha, max_steps).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }

    Ok(())
}

fn open_store(config: &FleetConfig) -> anyhow::Result<StateStore> {
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    StateStore::open(&config.store.path)
        .with_context(|| format!("failed to open store at {}", config.store.path.display()))
}

fn print_job_line(job: &JobState) {
    let JobParams::Deploy(params) = &job.params;
    let failure = job.failure().map(|f| f.message()).unwrap_or("");
    println!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        job.id, job.ts, job.stage, params.component, params.sha, failure
    );
}

/// Seed an in-memory platform with every unit of the layout, then advance
/// a deploy job until it is terminal. Between advances the platform is
/// settled and permanent plain tasks are started on their new revision.
async fn simulate(
    config: &FleetConfig,
    component: Component,
    sha: String,
    max_steps: u32,
) -> anyhow::Result<JobState> {
    let layout = config.resolver().resolve(component);
    let platform = seed_platform(&config.registry.uri, &layout).await;

    let store = StateStore::open_in_memory()?;
    let orchestrator = Arc::new(PlatformOrchestrator::new(platform.clone(), config.env()));
    let ctx = JobContext::new(config, orchestrator, store, Arc::new(LogNotifier));

    let state = JobState::new_deploy(DeployParams::new(component, sha));
    let mut job = DeployJob::new(ctx, state)?;

    for step in 1..=max_steps {
        let state = job.advance().await?;
        info!(step, stage = %state.stage, "simulated step");
        if state.stage.is_terminal() {
            return Ok(state);
        }
        if state.stage == JobStage::Started {
            platform.settle().await;
            for unit in layout.units() {
                if unit.kind == DeployKind::Task && !unit.task.temp {
                    platform.start_task(unit.cluster, unit.name).await;
                }
            }
        }
    }
    anyhow::bail!("job did not finish within {max_steps} steps")
}

async fn seed_platform(registry: &str, layout: &Layout) -> MemoryPlatform {
    let platform = MemoryPlatform::new();
    for unit in layout.units() {
        let image = format!("{registry}{}:current", unit.repo);
        match unit.kind {
            DeployKind::Service => {
                platform.add_service(unit.cluster, unit.name, &image).await;
            }
            DeployKind::Task => {
                platform.add_task_family(unit.name, &image).await;
            }
        }
    }
    platform
}
