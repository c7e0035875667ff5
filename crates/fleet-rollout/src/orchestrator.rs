//! Orchestration client — per-unit update, check, and launch operations.
//!
//! [`Orchestrator`] is the surface the rollout driver consumes.
//! [`PlatformOrchestrator`] implements it over a [`ContainerPlatform`]:
//!
//! - Definitions are append-only. An update clones the unit's current
//!   revision with the new image and registers it as a new revision.
//! - Services are re-pointed at the new revision; plain task families are
//!   not, since the next launch picks up the latest revision.
//! - Unless a unit is transient, every running task not on the target
//!   revision is stopped after the update.
//! - Updating a unit already on the target image registers nothing and
//!   returns its current revision, so retried updates are safe.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleet_core::{EnvType, RevisionId};

use crate::error::{RolloutError, RolloutResult};
use crate::platform::{
    ContainerOverride, ContainerPlatform, NetworkConfig, RunTaskRequest, TaskStatus,
};

/// Value of `started_by` on tasks this crate launches.
pub const STARTED_BY: &str = "fleet";

/// Tag key carrying the environment on registered definitions and launched tasks.
pub const ENV_TAG: &str = "fleet-env";

/// Orchestration client surface used by rollouts.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Roll a service onto `image`, returning the new revision id.
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        image: &str,
        transient: bool,
    ) -> RolloutResult<RevisionId>;

    /// Roll a plain task family onto `image`, returning the new revision id.
    async fn update_task(
        &self,
        cluster: &str,
        family: &str,
        image: &str,
        transient: bool,
    ) -> RolloutResult<RevisionId>;

    /// Whether the service has a deployment on `revision` with a running task.
    async fn check_service(
        &self,
        cluster: &str,
        service: &str,
        revision: &str,
    ) -> RolloutResult<bool>;

    /// Whether a task identified by `id` is running (or stopped, if `running`
    /// is false).
    ///
    /// `id` is either a task id or a revision. A task id must match a task in
    /// the wanted state; a revision needs at least one task on it in that
    /// state, so replaced instances that already stopped do not count.
    async fn check_task(
        &self,
        cluster: &str,
        family: &str,
        id: &str,
        running: bool,
    ) -> RolloutResult<bool>;

    /// Launch a one-off task, with network placement read from a named parameter.
    async fn launch_task(
        &self,
        cluster: &str,
        family: &str,
        container: &str,
        network_param: &str,
        overrides: &BTreeMap<String, String>,
    ) -> RolloutResult<String>;

    /// Launch a one-off task using a service's network placement.
    async fn launch_service_task(
        &self,
        cluster: &str,
        service: &str,
        family: &str,
        container: &str,
        overrides: &BTreeMap<String, String>,
    ) -> RolloutResult<String>;
}

/// [`Orchestrator`] backed by a [`ContainerPlatform`].
pub struct PlatformOrchestrator<P> {
    platform: P,
    env: EnvType,
}

impl<P: ContainerPlatform> PlatformOrchestrator<P> {
    pub fn new(platform: P, env: EnvType) -> Self {
        Self { platform, env }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Clone `revision` with `image` in its first container and register it.
    async fn register_with_image(&self, revision: &str, image: &str) -> RolloutResult<RevisionId> {
        let mut definition = self.platform.describe_task_definition(revision).await?;
        let container = definition.containers.first_mut().ok_or_else(|| {
            RolloutError::InvalidDefinition(format!("{revision} has no container definitions"))
        })?;
        if container.image == image {
            debug!(%revision, %image, "revision already on target image");
            return Ok(revision.to_string());
        }
        container.image = image.to_string();
        definition
            .tags
            .insert(ENV_TAG.to_string(), self.env.to_string());

        let new_revision = self.platform.register_task_definition(definition).await?;
        debug!(%revision, %new_revision, %image, "registered task definition");
        Ok(new_revision)
    }

    /// Stop every live task of `family` not running `keep`.
    async fn stop_stale_tasks(&self, cluster: &str, family: &str, keep: &str) -> RolloutResult<()> {
        let tasks = self.platform.list_tasks(cluster, family).await?;
        for task in tasks
            .iter()
            .filter(|t| t.last_status != TaskStatus::Stopped && t.task_definition != keep)
        {
            self.platform.stop_task(cluster, &task.id).await.inspect_err(|e| {
                warn!(%cluster, %family, task = %task.id, error = %e, "failed to stop task");
            })?;
            debug!(%cluster, %family, task = %task.id, "stopped stale task");
        }
        Ok(())
    }

    fn launch_request(
        &self,
        cluster: &str,
        family: &str,
        container: &str,
        network: Option<NetworkConfig>,
        overrides: &BTreeMap<String, String>,
    ) -> RunTaskRequest {
        RunTaskRequest {
            cluster: cluster.to_string(),
            task_definition: family.to_string(),
            count: 1,
            network,
            started_by: STARTED_BY.to_string(),
            tags: BTreeMap::from([(ENV_TAG.to_string(), self.env.to_string())]),
            overrides: (!overrides.is_empty()).then(|| ContainerOverride {
                name: container.to_string(),
                environment: overrides.clone(),
            }),
        }
    }
}

#[async_trait]
impl<P: ContainerPlatform> Orchestrator for PlatformOrchestrator<P> {
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        image: &str,
        transient: bool,
    ) -> RolloutResult<RevisionId> {
        let current = self.platform.describe_service(cluster, service).await?;
        let revision = self
            .register_with_image(&current.task_definition, image)
            .await?;
        if revision != current.task_definition {
            self.platform
                .update_service(cluster, service, &revision, 1)
                .await?;
        }
        if !transient {
            // Service families are named after the service.
            self.stop_stale_tasks(cluster, service, &revision).await?;
        }
        info!(%cluster, %service, %revision, %image, "service updated");
        Ok(revision)
    }

    async fn update_task(
        &self,
        cluster: &str,
        family: &str,
        image: &str,
        transient: bool,
    ) -> RolloutResult<RevisionId> {
        let latest = self.platform.latest_task_definition(family).await?;
        let revision = self.register_with_image(&latest, image).await?;
        if !transient {
            self.stop_stale_tasks(cluster, family, &revision).await?;
        }
        info!(%cluster, %family, %revision, %image, "task family updated");
        Ok(revision)
    }

    async fn check_service(
        &self,
        cluster: &str,
        service: &str,
        revision: &str,
    ) -> RolloutResult<bool> {
        let description = self.platform.describe_service(cluster, service).await?;
        let deployed = description
            .deployments
            .iter()
            .any(|d| d.task_definition == revision && d.running_count > 0);
        debug!(%cluster, %service, %revision, deployed, "checked service");
        Ok(deployed)
    }

    async fn check_task(
        &self,
        cluster: &str,
        family: &str,
        id: &str,
        running: bool,
    ) -> RolloutResult<bool> {
        let want = if running {
            TaskStatus::Running
        } else {
            TaskStatus::Stopped
        };
        let tasks = self.platform.list_tasks(cluster, family).await?;
        let done = match tasks.iter().find(|t| t.id == id) {
            Some(task) => task.last_status == want,
            None => tasks
                .iter()
                .any(|t| t.task_definition == id && t.last_status == want),
        };
        debug!(%cluster, %family, %id, ?want, found = tasks.len(), done, "checked task");
        Ok(done)
    }

    async fn launch_task(
        &self,
        cluster: &str,
        family: &str,
        container: &str,
        network_param: &str,
        overrides: &BTreeMap<String, String>,
    ) -> RolloutResult<String> {
        let raw = self.platform.get_parameter(network_param).await?;
        let network: NetworkConfig = serde_json::from_str(&raw)
            .map_err(|e| RolloutError::InvalidNetwork(format!("{network_param}: {e}")))?;
        let request = self.launch_request(cluster, family, container, Some(network), overrides);
        let task_id = self.platform.run_task(request).await?;
        info!(%cluster, %family, task = %task_id, "task launched");
        Ok(task_id)
    }

    async fn launch_service_task(
        &self,
        cluster: &str,
        service: &str,
        family: &str,
        container: &str,
        overrides: &BTreeMap<String, String>,
    ) -> RolloutResult<String> {
        let description = self.platform.describe_service(cluster, service).await?;
        let request =
            self.launch_request(cluster, family, container, description.network, overrides);
        let task_id = self.platform.run_task(request).await?;
        info!(%cluster, %service, %family, task = %task_id, "service task launched");
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPlatform;

    const CLUSTER: &str = "ceramic-dev";

    async fn orchestrator() -> PlatformOrchestrator<MemoryPlatform> {
        let platform = MemoryPlatform::new();
        platform.add_service(CLUSTER, "svc", "repo:old").await;
        platform.add_task_family("worker", "repo:old").await;
        PlatformOrchestrator::new(platform, EnvType::Dev)
    }

    #[tokio::test]
    async fn update_service_registers_new_revision_and_stops_old_tasks() {
        let orch = orchestrator().await;
        let before = orch.platform().describe_service(CLUSTER, "svc").await.unwrap();

        let revision = orch
            .update_service(CLUSTER, "svc", "repo:new", false)
            .await
            .unwrap();

        assert_ne!(revision, before.task_definition);
        let old = orch
            .platform()
            .describe_task_definition(&before.task_definition)
            .await
            .unwrap();
        assert_eq!(old.containers[0].image, "repo:old");

        let new = orch.platform().describe_task_definition(&revision).await.unwrap();
        assert_eq!(new.containers[0].image, "repo:new");
        assert_eq!(new.cpu, old.cpu);
        assert_eq!(new.tags.get(ENV_TAG).map(String::as_str), Some("dev"));

        let after = orch.platform().describe_service(CLUSTER, "svc").await.unwrap();
        assert_eq!(after.task_definition, revision);
        assert!(orch.platform().running_tasks(CLUSTER, "svc").await.is_empty());
    }

    #[tokio::test]
    async fn transient_service_keeps_running_tasks() {
        let orch = orchestrator().await;
        orch.update_service(CLUSTER, "svc", "repo:new", true)
            .await
            .unwrap();
        assert_eq!(orch.platform().running_tasks(CLUSTER, "svc").await.len(), 1);
    }

    #[tokio::test]
    async fn repeated_update_reuses_revision() {
        let orch = orchestrator().await;
        let first = orch
            .update_service(CLUSTER, "svc", "repo:new", false)
            .await
            .unwrap();
        orch.platform().settle().await;
        let second = orch
            .update_service(CLUSTER, "svc", "repo:new", false)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(orch.platform().revision_count("svc").await, 2);
        // The instance started on the new revision survives the retry.
        assert_eq!(orch.platform().running_tasks(CLUSTER, "svc").await.len(), 1);
    }

    #[tokio::test]
    async fn check_service_requires_running_deployment_on_revision() {
        let orch = orchestrator().await;
        let revision = orch
            .update_service(CLUSTER, "svc", "repo:new", false)
            .await
            .unwrap();

        assert!(!orch.check_service(CLUSTER, "svc", &revision).await.unwrap());
        orch.platform().settle().await;
        assert!(orch.check_service(CLUSTER, "svc", &revision).await.unwrap());
        assert!(!orch.check_service(CLUSTER, "svc", "svc:99").await.unwrap());
    }

    #[tokio::test]
    async fn update_task_stops_family_unless_transient() {
        let orch = orchestrator().await;
        orch.platform().start_task(CLUSTER, "worker").await;

        let revision = orch
            .update_task(CLUSTER, "worker", "repo:new", true)
            .await
            .unwrap();
        assert_eq!(orch.platform().running_tasks(CLUSTER, "worker").await.len(), 1);
        assert_eq!(
            orch.platform().latest_task_definition("worker").await.unwrap(),
            revision
        );

        let again = orch
            .update_task(CLUSTER, "worker", "repo:newer", false)
            .await
            .unwrap();
        assert_ne!(again, revision);
        assert!(orch.platform().running_tasks(CLUSTER, "worker").await.is_empty());
    }

    #[tokio::test]
    async fn check_task_matches_by_task_id_or_revision() {
        let orch = orchestrator().await;
        let revision = orch
            .update_task(CLUSTER, "worker", "repo:new", false)
            .await
            .unwrap();
        assert!(!orch.check_task(CLUSTER, "worker", &revision, true).await.unwrap());

        let task_id = orch.platform().start_task(CLUSTER, "worker").await;
        assert!(orch.check_task(CLUSTER, "worker", &revision, true).await.unwrap());
        assert!(orch.check_task(CLUSTER, "worker", &task_id, true).await.unwrap());
        assert!(!orch.check_task(CLUSTER, "worker", &task_id, false).await.unwrap());

        orch.platform().stop_task(CLUSTER, &task_id).await.unwrap();
        assert!(orch.check_task(CLUSTER, "worker", &task_id, false).await.unwrap());
    }

    #[tokio::test]
    async fn check_task_by_revision_ignores_replaced_instances() {
        let orch = orchestrator().await;
        let revision = orch
            .update_task(CLUSTER, "worker", "repo:new", false)
            .await
            .unwrap();

        let first = orch.platform().start_task(CLUSTER, "worker").await;
        orch.platform().stop_task(CLUSTER, &first).await.unwrap();
        assert!(!orch.check_task(CLUSTER, "worker", &revision, true).await.unwrap());

        orch.platform().start_task(CLUSTER, "worker").await;
        assert!(orch.check_task(CLUSTER, "worker", &revision, true).await.unwrap());
        // The stopped instance is still reported by its own id.
        assert!(orch.check_task(CLUSTER, "worker", &first, false).await.unwrap());
        assert!(!orch.check_task(CLUSTER, "worker", &first, true).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_service_surfaces_platform_failures() {
        let orch = orchestrator().await;
        let err = orch
            .update_service(CLUSTER, "missing", "repo:new", false)
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::PlatformFailures(_)));
        assert!(err.to_string().contains("MISSING"));
    }

    #[tokio::test]
    async fn launch_task_reads_network_parameter_and_overrides() {
        let orch = orchestrator().await;
        orch.platform()
            .put_parameter(
                "/fleet/vpc",
                r#"{"Subnets":["subnet-1"],"SecurityGroups":["sg-1"],"AssignPublicIp":"DISABLED"}"#,
            )
            .await;

        let overrides = BTreeMap::from([("ANCHOR_ID".to_string(), "42".to_string())]);
        let task_id = orch
            .launch_task(CLUSTER, "worker", "runner", "/fleet/vpc", &overrides)
            .await
            .unwrap();

        let launched = orch.platform().launched().await;
        assert_eq!(launched.len(), 1);
        let request = &launched[0];
        assert_eq!(request.started_by, STARTED_BY);
        assert_eq!(request.network.as_ref().unwrap().subnets, vec!["subnet-1"]);
        let o = request.overrides.as_ref().unwrap();
        assert_eq!(o.name, "runner");
        assert_eq!(o.environment.get("ANCHOR_ID").map(String::as_str), Some("42"));
        assert_eq!(orch.platform().running_tasks(CLUSTER, "worker").await[0].id, task_id);
    }

    #[tokio::test]
    async fn launch_task_rejects_malformed_network_parameter() {
        let orch = orchestrator().await;
        orch.platform().put_parameter("/fleet/vpc", "not json").await;
        let err = orch
            .launch_task(CLUSTER, "worker", "runner", "/fleet/vpc", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::InvalidNetwork(_)));
    }

    #[tokio::test]
    async fn launch_service_task_reuses_service_network() {
        let orch = orchestrator().await;
        orch.launch_service_task(CLUSTER, "svc", "worker", "runner", &BTreeMap::new())
            .await
            .unwrap();

        let launched = orch.platform().launched().await;
        assert_eq!(launched[0].network, Some(MemoryPlatform::default_network()));
        assert!(launched[0].overrides.is_none());
        assert_eq!(launched[0].tags.get(ENV_TAG).map(String::as_str), Some("dev"));
    }
}
