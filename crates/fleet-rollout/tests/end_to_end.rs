//! End-to-end deploy tests.
//!
//! Drive a CAS deploy through the full job lifecycle against the in-memory
//! platform and an on-disk state store, observing notifications through a
//! channel the way an outer service would.

use std::sync::Arc;

use tokio::sync::mpsc;

use fleet_core::{Component, DeployKind, EnvType, FleetConfig};
use fleet_rollout::{
    ContainerPlatform, DeployJob, JobContext, JobRunner, MemoryPlatform, PlatformOrchestrator,
};
use fleet_state::{DeployParams, JobFailure, JobParams, JobStage, JobState, StateStore};

const REGISTRY: &str = "123456789012.dkr.ecr.us-east-2.amazonaws.com/";
const CAS: &str = "ceramic-dev-cas";
const API: &str = "ceramic-dev-cas-api";
const SCHEDULER: &str = "ceramic-dev-cas-scheduler";
const ANCHOR: &str = "ceramic-dev-cas-anchor";

struct Env {
    platform: MemoryPlatform,
    store: StateStore,
    events: mpsc::UnboundedReceiver<JobState>,
    ctx: JobContext,
    _dir: tempfile::TempDir,
}

async fn env() -> Env {
    let platform = MemoryPlatform::new();
    let old = format!("{REGISTRY}ceramic-dev-cas:old");
    platform.add_service(CAS, API, &old).await;
    platform.add_service(CAS, SCHEDULER, &old).await;
    platform
        .add_task_family(ANCHOR, &format!("{REGISTRY}ceramic-dev-cas-runner:old"))
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = FleetConfig::for_env(EnvType::Dev);
    config.registry.uri = REGISTRY.to_string();
    config.store.path = dir.path().join("fleet.redb");
    let store = StateStore::open(&config.store.path).unwrap();

    let (tx, events) = mpsc::unbounded_channel();
    let orchestrator = Arc::new(PlatformOrchestrator::new(platform.clone(), EnvType::Dev));
    let ctx = JobContext::new(&config, orchestrator, store.clone(), Arc::new(tx));

    Env {
        platform,
        store,
        events,
        ctx,
        _dir: dir,
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<JobState>) -> Vec<JobStage> {
    let mut stages = Vec::new();
    while let Ok(job) = events.try_recv() {
        stages.push(job.stage);
    }
    stages
}

fn deploy(sha: &str) -> JobState {
    JobState::new_deploy(DeployParams::new(Component::Cas, sha))
}

#[tokio::test]
async fn cas_deploy_runs_to_completion() {
    let mut env = env().await;
    let mut job = DeployJob::new(env.ctx.clone(), deploy("abc123")).unwrap();

    let started = job.advance().await.unwrap();
    assert_eq!(started.stage, JobStage::Started);
    assert_eq!(drain(&mut env.events), vec![JobStage::Started]);

    let JobParams::Deploy(params) = &started.params;
    let layout = params.layout.as_ref().unwrap();
    for name in [API, SCHEDULER] {
        let unit = layout.unit(CAS, DeployKind::Service, name).unwrap();
        let revision = unit.task.id.clone().unwrap();
        let svc = env.platform.describe_service(CAS, name).await.unwrap();
        assert_eq!(svc.task_definition, revision);
        let def = env.platform.describe_task_definition(&revision).await.unwrap();
        assert_eq!(def.containers[0].image, format!("{REGISTRY}ceramic-dev-cas:abc123"));
    }
    let anchor = layout.unit(CAS, DeployKind::Task, ANCHOR).unwrap();
    let def = env
        .platform
        .describe_task_definition(anchor.task.id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(def.containers[0].image, format!("{REGISTRY}ceramic-dev-cas-runner:abc123"));

    // Old tasks still running on the previous revision.
    assert_eq!(job.advance().await.unwrap().stage, JobStage::Started);
    assert!(drain(&mut env.events).is_empty());

    env.platform.settle().await;
    let done = job.advance().await.unwrap();
    assert_eq!(done.stage, JobStage::Completed);
    assert_eq!(drain(&mut env.events), vec![JobStage::Completed]);

    let hashes = env.store.get_component_hashes(Component::Cas).unwrap().unwrap();
    assert_eq!(hashes.build_hash.as_deref(), Some("abc123"));
    assert_eq!(hashes.deploy_hash.as_deref(), Some("abc123"));
    assert!(env.store.list_active_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn platform_failure_fails_job_once() {
    let mut env = env().await;
    env.platform.fail("describe_service", "service unavailable").await;
    let mut job = DeployJob::new(env.ctx.clone(), deploy("abc123")).unwrap();

    let state = job.advance().await.unwrap();
    assert_eq!(state.stage, JobStage::Failed);
    assert!(state.failure().unwrap().message().contains("service unavailable"));
    assert_eq!(drain(&mut env.events), vec![JobStage::Failed]);

    let saved = env.store.get_job(&state.id).unwrap().unwrap();
    assert_eq!(saved, state);
    assert!(env.store.get_component_hashes(Component::Cas).unwrap().is_none());
}

#[tokio::test]
async fn unconverged_job_times_out() {
    let mut env = env().await;
    let mut job = DeployJob::new(env.ctx.clone(), deploy("abc123")).unwrap();
    job.advance().await.unwrap();
    drain(&mut env.events);

    let mut state = job.into_state();
    state.ts -= 3600;
    let mut job = DeployJob::new(env.ctx.clone(), state).unwrap();

    let failed = job.advance().await.unwrap();
    assert_eq!(failed.stage, JobStage::Failed);
    assert_eq!(failed.failure(), Some(&JobFailure::Timeout));
    assert_eq!(drain(&mut env.events), vec![JobStage::Failed]);
}

#[tokio::test]
async fn job_resumes_from_store_after_restart() {
    let mut env = env().await;
    let runner = JobRunner::new(env.ctx.clone(), env.store.clone());
    let job = deploy("def456");
    env.store.put_job(&job).unwrap();

    assert_eq!(runner.tick().await.unwrap(), 1);
    drop(runner);

    // A fresh runner picks the job up from persisted state.
    env.platform.settle().await;
    let runner = JobRunner::new(env.ctx.clone(), env.store.clone());
    assert_eq!(runner.tick().await.unwrap(), 1);

    let saved = env.store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(saved.stage, JobStage::Completed);
    assert_eq!(
        drain(&mut env.events),
        vec![JobStage::Started, JobStage::Completed]
    );
    // Services were updated once; the retry check did not re-register.
    assert_eq!(env.platform.revision_count(API).await, 2);
}
