//! Persisted record types for the Fleet state store.
//!
//! A [`JobState`] is the whole resumable state of one rollout job. Its
//! parameters are a typed union per job kind rather than a free-form map,
//! so a resumed job always has the shape its kind expects.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use fleet_core::{Component, Layout};

use crate::error::{StateError, StateResult};

/// Unique identifier for a job.
pub type JobId = String;

/// Raw parameter key naming the component to deploy.
pub const PARAM_COMPONENT: &str = "component";

/// Raw parameter key naming the commit hash / image tag to deploy.
pub const PARAM_SHA: &str = "sha";

// ── Job ───────────────────────────────────────────────────────────

/// Lifecycle stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Started,
    Completed,
    Failed,
}

impl JobStage {
    /// Terminal stages are never advanced again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::Queued => write!(f, "queued"),
            JobStage::Started => write!(f, "started"),
            JobStage::Completed => write!(f, "completed"),
            JobStage::Failed => write!(f, "failed"),
        }
    }
}

/// Why a job ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum JobFailure {
    /// Wall-clock budget for the job ran out.
    Timeout,
    /// An update or check call failed.
    Rollout { message: String },
}

impl JobFailure {
    pub fn message(&self) -> &str {
        match self {
            JobFailure::Timeout => "job timed out",
            JobFailure::Rollout { message } => message,
        }
    }
}

/// Parameters of a deploy job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployParams {
    pub component: Component,
    /// Commit hash, used as the image tag.
    pub sha: String,
    /// Resolved on job construction; carries revision ids once updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl DeployParams {
    pub fn new(component: Component, sha: impl Into<String>) -> Self {
        Self {
            component,
            sha: sha.into(),
            layout: None,
            failure: None,
        }
    }

    /// Parse the external parameter bag. Both `component` and `sha` are required.
    pub fn from_raw(raw: &BTreeMap<String, String>) -> StateResult<Self> {
        let component = required(raw, PARAM_COMPONENT)?
            .parse::<Component>()
            .map_err(|e| StateError::InvalidParams(e.to_string()))?;
        let sha = required(raw, PARAM_SHA)?;
        Ok(Self::new(component, sha))
    }
}

fn required<'a>(raw: &'a BTreeMap<String, String>, key: &str) -> StateResult<&'a str> {
    match raw.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(StateError::InvalidParams(format!("missing {key}"))),
    }
}

/// Per-kind job parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    Deploy(DeployParams),
}

/// Persisted state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub id: JobId,
    pub stage: JobStage,
    /// Unix timestamp (seconds) when the job was created.
    pub ts: u64,
    pub params: JobParams,
}

impl JobState {
    /// A freshly queued deploy job.
    pub fn new_deploy(params: DeployParams) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage: JobStage::Queued,
            ts: epoch_secs(),
            params: JobParams::Deploy(params),
        }
    }

    /// Build the key for the jobs table.
    pub fn table_key(&self) -> &str {
        &self.id
    }

    /// Failure recorded on the job, if any.
    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.params {
            JobParams::Deploy(p) => p.failure.as_ref(),
        }
    }
}

// ── Component hashes ──────────────────────────────────────────────

/// Last commit built and last commit deployed for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHashes {
    pub component: Component,
    pub build_hash: Option<String>,
    pub deploy_hash: Option<String>,
    /// Unix timestamp of last update.
    pub updated_at: u64,
}

impl ComponentHashes {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            build_hash: None,
            deploy_hash: None,
            updated_at: 0,
        }
    }

    /// Build the key for the component hashes table.
    pub fn table_key(&self) -> &'static str {
        self.component.as_str()
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_raw_requires_component_and_sha() {
        let params =
            DeployParams::from_raw(&raw(&[("component", "cas"), ("sha", "abc123")])).unwrap();
        assert_eq!(params.component, Component::Cas);
        assert_eq!(params.sha, "abc123");
        assert!(params.layout.is_none());

        let err = DeployParams::from_raw(&raw(&[("sha", "abc123")])).unwrap_err();
        assert!(err.to_string().contains("missing component"));

        let err = DeployParams::from_raw(&raw(&[("component", "cas"), ("sha", " ")])).unwrap_err();
        assert!(err.to_string().contains("missing sha"));
    }

    #[test]
    fn from_raw_rejects_unknown_component() {
        let err =
            DeployParams::from_raw(&raw(&[("component", "kafka"), ("sha", "x")])).unwrap_err();
        assert!(matches!(err, StateError::InvalidParams(_)));
    }

    #[test]
    fn new_deploy_job_is_queued() {
        let job = JobState::new_deploy(DeployParams::new(Component::Ipfs, "deadbeef"));
        assert_eq!(job.stage, JobStage::Queued);
        assert!(!job.id.is_empty());
        assert!(job.ts > 0);
        assert!(job.failure().is_none());
    }

    #[test]
    fn terminal_stages() {
        assert!(!JobStage::Queued.is_terminal());
        assert!(!JobStage::Started.is_terminal());
        assert!(JobStage::Completed.is_terminal());
        assert!(JobStage::Failed.is_terminal());
    }

    #[test]
    fn job_params_are_tagged_by_kind() {
        let mut job = JobState::new_deploy(DeployParams::new(Component::Cas, "abc"));
        let JobParams::Deploy(p) = &mut job.params;
        p.failure = Some(JobFailure::Timeout);

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["params"]["kind"], "deploy");
        assert_eq!(json["params"]["failure"]["reason"], "timeout");
        assert_eq!(job.failure().unwrap().message(), "job timed out");
    }
}
