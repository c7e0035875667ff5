//! In-memory [`ContainerPlatform`] for tests and dry runs.
//!
//! Revisions are named `{family}:{n}`. The platform does not converge on
//! its own: [`MemoryPlatform::settle`] plays the part of the scheduler that
//! drains old deployments and starts tasks on each service's revision.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use fleet_core::RevisionId;

use crate::error::{RolloutError, RolloutResult};
use crate::platform::*;

#[derive(Default)]
struct Inner {
    /// (cluster, service) → service.
    services: BTreeMap<(String, String), ServiceDescription>,
    /// revision → definition.
    definitions: HashMap<RevisionId, TaskDefinition>,
    /// family → latest revision number.
    latest: HashMap<String, u32>,
    /// (cluster, task id) → task.
    tasks: BTreeMap<(String, String), TaskDescription>,
    parameters: HashMap<String, String>,
    launched: Vec<RunTaskRequest>,
    /// operation name → injected error message.
    failures: HashMap<String, String>,
    latency: Option<Duration>,
    next_task: u64,
}

impl Inner {
    fn check_failure(&self, op: &str) -> RolloutResult<()> {
        match self.failures.get(op) {
            Some(message) => Err(RolloutError::Orchestrator(format!("{op}: {message}"))),
            None => Ok(()),
        }
    }

    fn register(&mut self, definition: TaskDefinition) -> RevisionId {
        let n = self.latest.entry(definition.family.clone()).or_insert(0);
        *n += 1;
        let revision = format!("{}:{}", definition.family, n);
        self.definitions.insert(revision.clone(), definition);
        revision
    }

    fn start(&mut self, cluster: &str, family: &str, revision: &str) -> String {
        self.next_task += 1;
        let id = format!("task-{}", self.next_task);
        self.tasks.insert(
            (cluster.to_string(), id.clone()),
            TaskDescription {
                id: id.clone(),
                family: family.to_string(),
                task_definition: revision.to_string(),
                last_status: TaskStatus::Running,
            },
        );
        id
    }

    fn latest_revision(&self, family: &str) -> Option<RevisionId> {
        self.latest.get(family).map(|n| format!("{family}:{n}"))
    }
}

/// Shared, cloneable in-memory platform.
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network placement given to every seeded service.
    pub fn default_network() -> NetworkConfig {
        NetworkConfig {
            subnets: vec!["subnet-mem".to_string()],
            security_groups: vec!["sg-mem".to_string()],
            assign_public_ip: None,
        }
    }

    fn definition(family: &str, image: &str) -> TaskDefinition {
        TaskDefinition {
            family: family.to_string(),
            containers: vec![ContainerDefinition {
                name: family.to_string(),
                image: image.to_string(),
                environment: BTreeMap::new(),
            }],
            cpu: Some("1024".to_string()),
            memory: Some("2048".to_string()),
            execution_role: None,
            task_role: None,
            network_mode: Some("awsvpc".to_string()),
            tags: BTreeMap::new(),
        }
    }

    /// Seed a service with one running task on its first revision.
    pub async fn add_service(&self, cluster: &str, service: &str, image: &str) -> RevisionId {
        let mut inner = self.inner.lock().await;
        let revision = inner.register(Self::definition(service, image));
        inner.start(cluster, service, &revision);
        inner.services.insert(
            (cluster.to_string(), service.to_string()),
            ServiceDescription {
                name: service.to_string(),
                task_definition: revision.clone(),
                desired_count: 1,
                deployments: vec![ServiceDeployment {
                    task_definition: revision.clone(),
                    running_count: 1,
                }],
                network: Some(Self::default_network()),
            },
        );
        revision
    }

    /// Seed a task family with a first revision and no running tasks.
    pub async fn add_task_family(&self, family: &str, image: &str) -> RevisionId {
        let mut inner = self.inner.lock().await;
        inner.register(Self::definition(family, image))
    }

    /// Start a task on the family's latest revision.
    pub async fn start_task(&self, cluster: &str, family: &str) -> String {
        let mut inner = self.inner.lock().await;
        let revision = inner
            .latest_revision(family)
            .unwrap_or_else(|| format!("{family}:0"));
        inner.start(cluster, family, &revision)
    }

    /// Converge every service onto the revision it points at.
    pub async fn settle(&self) {
        let mut inner = self.inner.lock().await;
        let services: Vec<_> = inner
            .services
            .iter()
            .map(|((cluster, name), svc)| {
                (cluster.clone(), name.clone(), svc.task_definition.clone())
            })
            .collect();

        for (cluster, name, revision) in services {
            let running_on_revision = inner.tasks.iter().any(|((c, _), t)| {
                c == &cluster
                    && t.family == name
                    && t.task_definition == revision
                    && t.last_status == TaskStatus::Running
            });
            if !running_on_revision {
                inner.start(&cluster, &name, &revision);
            }
            for ((c, _), task) in inner.tasks.iter_mut() {
                if c == &cluster && task.family == name && task.task_definition != revision {
                    task.last_status = TaskStatus::Stopped;
                }
            }
            if let Some(svc) = inner.services.get_mut(&(cluster.clone(), name.clone())) {
                svc.deployments = vec![ServiceDeployment {
                    task_definition: revision,
                    running_count: 1,
                }];
            }
        }
    }

    /// Running tasks of a family in a cluster.
    pub async fn running_tasks(&self, cluster: &str, family: &str) -> Vec<TaskDescription> {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .iter()
            .filter(|((c, _), t)| {
                c == cluster && t.family == family && t.last_status == TaskStatus::Running
            })
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Number of revisions registered for a family.
    pub async fn revision_count(&self, family: &str) -> u32 {
        let inner = self.inner.lock().await;
        inner.latest.get(family).copied().unwrap_or(0)
    }

    pub async fn put_parameter(&self, name: &str, value: &str) {
        let mut inner = self.inner.lock().await;
        inner.parameters.insert(name.to_string(), value.to_string());
    }

    /// Every request passed to `run_task`, in order.
    pub async fn launched(&self) -> Vec<RunTaskRequest> {
        self.inner.lock().await.launched.clone()
    }

    /// Make every call to `op` fail with `message`.
    pub async fn fail(&self, op: &str, message: &str) {
        let mut inner = self.inner.lock().await;
        inner.failures.insert(op.to_string(), message.to_string());
    }

    pub async fn clear_failures(&self) {
        self.inner.lock().await.failures.clear();
    }

    /// Delay every call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = Some(latency);
    }

    /// Apply injected latency and failure for `op`.
    async fn enter(&self, op: &str) -> RolloutResult<()> {
        let latency = self.inner.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.inner.lock().await.check_failure(op)
    }
}

#[async_trait]
impl ContainerPlatform for MemoryPlatform {
    async fn describe_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> RolloutResult<ServiceDescription> {
        self.enter("describe_service").await?;
        let inner = self.inner.lock().await;
        inner
            .services
            .get(&(cluster.to_string(), service.to_string()))
            .cloned()
            .ok_or_else(|| {
                RolloutError::PlatformFailures(vec![PlatformFailure {
                    arn: format!("{cluster}/{service}"),
                    reason: "MISSING".to_string(),
                    detail: String::new(),
                }])
            })
    }

    async fn describe_task_definition(&self, revision: &str) -> RolloutResult<TaskDefinition> {
        self.enter("describe_task_definition").await?;
        let inner = self.inner.lock().await;
        inner
            .definitions
            .get(revision)
            .cloned()
            .ok_or_else(|| RolloutError::NotFound(format!("task definition {revision}")))
    }

    async fn latest_task_definition(&self, family: &str) -> RolloutResult<RevisionId> {
        self.enter("latest_task_definition").await?;
        let inner = self.inner.lock().await;
        inner
            .latest_revision(family)
            .ok_or_else(|| RolloutError::NotFound(format!("task family {family}")))
    }

    async fn register_task_definition(
        &self,
        definition: TaskDefinition,
    ) -> RolloutResult<RevisionId> {
        self.enter("register_task_definition").await?;
        let mut inner = self.inner.lock().await;
        Ok(inner.register(definition))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        revision: &str,
        desired_count: u32,
    ) -> RolloutResult<()> {
        self.enter("update_service").await?;
        let mut inner = self.inner.lock().await;
        if !inner.definitions.contains_key(revision) {
            return Err(RolloutError::NotFound(format!("task definition {revision}")));
        }
        let svc = inner
            .services
            .get_mut(&(cluster.to_string(), service.to_string()))
            .ok_or_else(|| RolloutError::NotFound(format!("service {cluster}/{service}")))?;
        svc.task_definition = revision.to_string();
        svc.desired_count = desired_count;
        if !svc.deployments.iter().any(|d| d.task_definition == revision) {
            svc.deployments.push(ServiceDeployment {
                task_definition: revision.to_string(),
                running_count: 0,
            });
        }
        Ok(())
    }

    async fn list_tasks(&self, cluster: &str, family: &str) -> RolloutResult<Vec<TaskDescription>> {
        self.enter("list_tasks").await?;
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .iter()
            .filter(|((c, _), t)| c == cluster && t.family == family)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn stop_task(&self, cluster: &str, task_id: &str) -> RolloutResult<()> {
        self.enter("stop_task").await?;
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(&(cluster.to_string(), task_id.to_string()))
            .ok_or_else(|| RolloutError::NotFound(format!("task {cluster}/{task_id}")))?;
        task.last_status = TaskStatus::Stopped;
        Ok(())
    }

    async fn run_task(&self, request: RunTaskRequest) -> RolloutResult<String> {
        self.enter("run_task").await?;
        let mut inner = self.inner.lock().await;
        let (family, revision) = if inner.definitions.contains_key(&request.task_definition) {
            let family = inner.definitions[&request.task_definition].family.clone();
            (family, request.task_definition.clone())
        } else {
            let revision = inner
                .latest_revision(&request.task_definition)
                .ok_or_else(|| {
                    RolloutError::NotFound(format!("task family {}", request.task_definition))
                })?;
            (request.task_definition.clone(), revision)
        };
        let id = inner.start(&request.cluster, &family, &revision);
        inner.launched.push(request);
        Ok(id)
    }

    async fn get_parameter(&self, name: &str) -> RolloutResult<String> {
        self.enter("get_parameter").await?;
        let inner = self.inner.lock().await;
        inner
            .parameters
            .get(name)
            .cloned()
            .ok_or_else(|| RolloutError::NotFound(format!("parameter {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_appends_revisions() {
        let platform = MemoryPlatform::new();
        let first = platform.add_task_family("worker", "repo:a").await;
        let second = platform
            .register_task_definition(MemoryPlatform::definition("worker", "repo:b"))
            .await
            .unwrap();

        assert_eq!(first, "worker:1");
        assert_eq!(second, "worker:2");
        let original = platform.describe_task_definition(&first).await.unwrap();
        assert_eq!(original.containers[0].image, "repo:a");
        assert_eq!(platform.latest_task_definition("worker").await.unwrap(), second);
    }

    #[tokio::test]
    async fn settle_converges_service_onto_current_revision() {
        let platform = MemoryPlatform::new();
        platform.add_service("c", "svc", "repo:a").await;
        let next = platform
            .register_task_definition(MemoryPlatform::definition("svc", "repo:b"))
            .await
            .unwrap();
        platform.update_service("c", "svc", &next, 1).await.unwrap();

        platform.settle().await;

        let running = platform.running_tasks("c", "svc").await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].task_definition, next);
        let svc = platform.describe_service("c", "svc").await.unwrap();
        assert_eq!(svc.deployments.len(), 1);
        assert_eq!(svc.deployments[0].running_count, 1);
    }

    #[tokio::test]
    async fn injected_failures_apply_per_operation() {
        let platform = MemoryPlatform::new();
        platform.add_service("c", "svc", "repo:a").await;
        platform.fail("describe_service", "throttled").await;

        let err = platform.describe_service("c", "svc").await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
        assert!(platform.list_tasks("c", "svc").await.is_ok());

        platform.clear_failures().await;
        assert!(platform.describe_service("c", "svc").await.is_ok());
    }
}
