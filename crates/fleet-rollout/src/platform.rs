//! Container platform contract.
//!
//! The raw operations a concrete cloud client exposes: services pointed at
//! task definition revisions, task families, and individual running tasks.
//! [`crate::orchestrator::PlatformOrchestrator`] builds the rollout
//! semantics on top of these.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleet_core::RevisionId;

use crate::error::RolloutResult;

/// A per-resource failure reported by the platform alongside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFailure {
    pub arn: String,
    pub reason: String,
    pub detail: String,
}

impl std::fmt::Display for PlatformFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.arn, self.reason)?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

/// A deployment of a service onto one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDeployment {
    pub task_definition: RevisionId,
    pub running_count: u32,
}

/// Current shape of a long-running service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub name: String,
    /// Revision the service is currently pointed at.
    pub task_definition: RevisionId,
    pub desired_count: u32,
    pub deployments: Vec<ServiceDeployment>,
    pub network: Option<NetworkConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// An immutable task definition revision.
///
/// Registering a definition always creates a new revision of its family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub family: String,
    pub containers: Vec<ContainerDefinition>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub execution_role: Option<String>,
    pub task_role: Option<String>,
    pub network_mode: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Running,
    Stopped,
}

/// A task instance known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub id: String,
    pub family: String,
    /// Revision this task runs.
    pub task_definition: RevisionId,
    pub last_status: TaskStatus,
}

/// VPC placement for launched tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_public_ip: Option<String>,
}

/// Environment overrides for one container of a launched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOverride {
    pub name: String,
    pub environment: BTreeMap<String, String>,
}

/// Request to launch tasks outside of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskRequest {
    pub cluster: String,
    /// Family name (latest revision) or a specific revision.
    pub task_definition: String,
    pub count: u32,
    pub network: Option<NetworkConfig>,
    pub started_by: String,
    pub tags: BTreeMap<String, String>,
    pub overrides: Option<ContainerOverride>,
}

/// Raw container platform API.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// Describe a service. Fails with the platform's failures if it is unknown.
    async fn describe_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> RolloutResult<ServiceDescription>;

    async fn describe_task_definition(&self, revision: &str) -> RolloutResult<TaskDefinition>;

    /// Latest registered revision of a family.
    async fn latest_task_definition(&self, family: &str) -> RolloutResult<RevisionId>;

    /// Register a new revision. Never modifies an existing one.
    async fn register_task_definition(
        &self,
        definition: TaskDefinition,
    ) -> RolloutResult<RevisionId>;

    /// Point a service at a revision.
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        revision: &str,
        desired_count: u32,
    ) -> RolloutResult<()>;

    /// Tasks of a family in a cluster, including recently stopped ones.
    async fn list_tasks(&self, cluster: &str, family: &str) -> RolloutResult<Vec<TaskDescription>>;

    async fn stop_task(&self, cluster: &str, task_id: &str) -> RolloutResult<()>;

    /// Launch a task, returning its id.
    async fn run_task(&self, request: RunTaskRequest) -> RolloutResult<String>;

    /// Read a named configuration parameter.
    async fn get_parameter(&self, name: &str) -> RolloutResult<String>;
}
