//! Persistence boundaries consumed by the job state machine.

use fleet_core::Component;
use fleet_state::{JobState, StateStore};

use crate::error::RolloutResult;

/// Durable, read-after-write consistent home for job states.
pub trait JobStore: Send + Sync {
    fn save_job(&self, job: &JobState) -> RolloutResult<()>;
}

/// Records the last built and last deployed commit per component.
pub trait HashRecorder: Send + Sync {
    fn record_build_hash(&self, component: Component, sha: &str) -> RolloutResult<()>;
    fn record_deploy_hash(&self, component: Component, sha: &str) -> RolloutResult<()>;
}

impl JobStore for StateStore {
    fn save_job(&self, job: &JobState) -> RolloutResult<()> {
        Ok(self.put_job(job)?)
    }
}

impl HashRecorder for StateStore {
    fn record_build_hash(&self, component: Component, sha: &str) -> RolloutResult<()> {
        Ok(self.put_build_hash(component, sha)?)
    }

    fn record_deploy_hash(&self, component: Component, sha: &str) -> RolloutResult<()> {
        Ok(self.put_deploy_hash(component, sha)?)
    }
}
