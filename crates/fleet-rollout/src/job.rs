//! Deploy job — resumable state machine around one rollout.
//!
//! ```text
//! Queued ──update ok──▶ Started ──converged──▶ Completed
//!    │                     │
//!    └──update err──▶ Failed ◀──check err / timeout
//! ```
//!
//! [`DeployJob::advance`] is called repeatedly by a dispatcher until the
//! job is terminal. Every stage change is notified and persisted; a
//! `Started` job that has not converged yet comes back unchanged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use fleet_core::{FleetConfig, TopologyResolver};
use fleet_state::{epoch_secs, JobFailure, JobParams, JobStage, JobState, StateStore};

use crate::driver::ClusterDriver;
use crate::error::{RolloutError, RolloutResult};
use crate::notify::Notifier;
use crate::orchestrator::Orchestrator;
use crate::store::{HashRecorder, JobStore};

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct JobContext {
    pub driver: ClusterDriver,
    pub resolver: TopologyResolver,
    pub store: Arc<dyn JobStore>,
    pub hashes: Arc<dyn HashRecorder>,
    pub notifier: Arc<dyn Notifier>,
    /// Wall-clock budget measured from job creation.
    pub max_duration: Duration,
}

impl JobContext {
    /// Wire a context from config, using the state store for jobs and hashes.
    pub fn new(
        config: &FleetConfig,
        orchestrator: Arc<dyn Orchestrator>,
        store: StateStore,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            driver: ClusterDriver::new(
                orchestrator,
                config.registry.uri.clone(),
                config.rollout.call_timeout(),
            ),
            resolver: config.resolver(),
            store: Arc::new(store.clone()),
            hashes: Arc::new(store),
            notifier,
            max_duration: config.rollout.max_job_duration(),
        }
    }
}

/// A deploy job bound to its collaborators.
pub struct DeployJob {
    ctx: JobContext,
    state: JobState,
}

impl DeployJob {
    /// Bind a job state to a context.
    ///
    /// The layout is resolved only if the state does not carry one yet, so
    /// a resumed job keeps the revision ids it already stamped.
    pub fn new(ctx: JobContext, mut state: JobState) -> RolloutResult<Self> {
        let JobParams::Deploy(params) = &mut state.params;
        if params.sha.trim().is_empty() {
            return Err(RolloutError::InvalidParams("missing sha".to_string()));
        }
        if params.layout.is_none() {
            params.layout = Some(ctx.resolver.resolve(params.component));
        }
        Ok(Self { ctx, state })
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn into_state(self) -> JobState {
        self.state
    }

    /// Move the job forward by at most one stage.
    ///
    /// Rollout failures are recorded on the returned state as `Failed`.
    /// An error is returned only when the job cannot be advanced at all
    /// (already terminal) or the new state could not be persisted.
    pub async fn advance(&mut self) -> RolloutResult<JobState> {
        let job = self.state.id.clone();

        if self.state.stage == JobStage::Queued {
            match self.update().await {
                Ok(()) => {
                    self.state.stage = JobStage::Started;
                    info!(%job, "deploy started");
                    let (component, sha) = self.target();
                    if let Err(e) = self.ctx.hashes.record_build_hash(component, &sha) {
                        warn!(%job, error = %e, "failed to record build hash");
                    }
                }
                Err(e) => {
                    error!(%job, error = %e, "failed to update layout");
                    self.fail(JobFailure::Rollout {
                        message: e.to_string(),
                    });
                }
            }
        } else if !self.state.stage.is_terminal() && self.timed_out() {
            warn!(%job, stage = %self.state.stage, "deploy timed out");
            self.fail(JobFailure::Timeout);
        } else if self.state.stage == JobStage::Started {
            match self.check().await {
                Ok(true) => {
                    self.state.stage = JobStage::Completed;
                    info!(%job, "deploy completed");
                    let (component, sha) = self.target();
                    if let Err(e) = self.ctx.hashes.record_deploy_hash(component, &sha) {
                        warn!(%job, error = %e, "failed to record deploy hash");
                    }
                }
                Ok(false) => {
                    debug!(%job, "layout not converged yet");
                    return Ok(self.state.clone());
                }
                Err(e) => {
                    error!(%job, error = %e, "failed to check layout");
                    self.fail(JobFailure::Rollout {
                        message: e.to_string(),
                    });
                }
            }
        } else {
            return Err(RolloutError::UnexpectedStage {
                job,
                stage: self.state.stage,
            });
        }

        if matches!(
            self.state.stage,
            JobStage::Started | JobStage::Failed | JobStage::Completed
        ) {
            self.ctx.notifier.notify(&self.state);
        }
        self.ctx.store.save_job(&self.state)?;
        Ok(self.state.clone())
    }

    async fn update(&mut self) -> RolloutResult<()> {
        let JobParams::Deploy(params) = &mut self.state.params;
        let layout = params
            .layout
            .as_mut()
            .ok_or_else(|| RolloutError::InvalidParams("job has no layout".to_string()))?;
        self.ctx.driver.update_layout(layout, &params.sha).await
    }

    async fn check(&self) -> RolloutResult<bool> {
        let JobParams::Deploy(params) = &self.state.params;
        let layout = params
            .layout
            .as_ref()
            .ok_or_else(|| RolloutError::InvalidParams("job has no layout".to_string()))?;
        self.ctx.driver.check_layout(layout).await
    }

    fn target(&self) -> (fleet_core::Component, String) {
        let JobParams::Deploy(params) = &self.state.params;
        (params.component, params.sha.clone())
    }

    fn timed_out(&self) -> bool {
        epoch_secs().saturating_sub(self.state.ts) > self.ctx.max_duration.as_secs()
    }

    fn fail(&mut self, failure: JobFailure) {
        self.state.stage = JobStage::Failed;
        let JobParams::Deploy(params) = &mut self.state.params;
        params.failure = Some(failure);
    }
}
