//! Job notifications.
//!
//! Delivery is fire-and-forget: a notifier never reports failure back into
//! the job.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use fleet_state::{JobParams, JobStage, JobState};

/// Receives a job's full state on stage transitions.
pub trait Notifier: Send + Sync {
    fn notify(&self, job: &JobState);
}

/// Writes each notification to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, job: &JobState) {
        let JobParams::Deploy(params) = &job.params;
        match job.failure() {
            Some(failure) if job.stage == JobStage::Failed => warn!(
                job = %job.id,
                component = %params.component,
                sha = %params.sha,
                error = failure.message(),
                "deploy failed"
            ),
            _ => info!(
                job = %job.id,
                component = %params.component,
                sha = %params.sha,
                stage = %job.stage,
                "deploy {}", job.stage
            ),
        }
    }
}

/// Forwards notifications to an in-process consumer. A closed channel drops them.
impl Notifier for UnboundedSender<JobState> {
    fn notify(&self, job: &JobState) {
        let _ = self.send(job.clone());
    }
}
