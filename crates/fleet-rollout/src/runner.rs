//! Job runner — periodically advances every active job.
//!
//! Each tick loads the non-terminal jobs from the state store and advances
//! each one by at most one stage. A job that fails to advance is logged and
//! retried on the next tick; it never blocks the others.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use fleet_state::StateStore;

use crate::error::RolloutResult;
use crate::job::{DeployJob, JobContext};

pub struct JobRunner {
    ctx: JobContext,
    store: StateStore,
}

impl JobRunner {
    pub fn new(ctx: JobContext, store: StateStore) -> Self {
        Self { ctx, store }
    }

    /// Advance each active job once. Returns how many advanced without error.
    pub async fn tick(&self) -> RolloutResult<usize> {
        let jobs = self.store.list_active_jobs()?;
        debug!(active = jobs.len(), "runner tick");

        let mut advanced = 0;
        for state in jobs {
            let id = state.id.clone();
            let mut job = match DeployJob::new(self.ctx.clone(), state) {
                Ok(job) => job,
                Err(e) => {
                    error!(job = %id, error = %e, "invalid job");
                    continue;
                }
            };
            match job.advance().await {
                Ok(state) => {
                    debug!(job = %id, stage = %state.stage, "job advanced");
                    advanced += 1;
                }
                Err(e) => error!(job = %id, error = %e, "failed to advance job"),
            }
        }
        Ok(advanced)
    }

    /// Run the runner loop until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "job runner started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "job runner tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("job runner shutting down");
                    break;
                }
            }
        }
    }
}
