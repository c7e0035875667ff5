//! Rollout error types.

use thiserror::Error;

use fleet_state::{JobId, JobStage, StateError};

use crate::platform::PlatformFailure;

/// Errors that can occur while driving a rollout.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// A platform call failed or did not answer within its deadline.
    #[error("orchestration call failed: {0}")]
    Orchestrator(String),

    /// The platform answered but reported per-resource failures.
    #[error("platform reported failures: {}", join_failures(.0))]
    PlatformFailures(Vec<PlatformFailure>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid task definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid network configuration: {0}")]
    InvalidNetwork(String),

    #[error("invalid job parameters: {0}")]
    InvalidParams(String),

    /// Advance was called on a job in a stage it cannot leave.
    #[error("unexpected stage {stage} for job {job}")]
    UnexpectedStage { job: JobId, stage: JobStage },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;

fn join_failures(failures: &[PlatformFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
