//! Rollout topology types.
//!
//! A [`Layout`] is the full set of deployment units one rollout job
//! touches: clusters, each with an optional set of long-running services
//! and an optional set of plain tasks. Repository overrides cascade from
//! the task outward to the layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cluster name as known to the container platform.
pub type ClusterName = String;

/// Deployment unit name (service name or task family).
pub type UnitName = String;

/// Opaque revision or instance identifier returned by the platform.
pub type RevisionId = String;

/// Kind of deployment unit. Closed on purpose: every phase matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployKind {
    /// Long-running service pointed at a definition revision.
    Service,
    /// Plain task family without a platform-level rolling mechanism.
    Task,
}

impl std::fmt::Display for DeployKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployKind::Service => write!(f, "service"),
            DeployKind::Task => write!(f, "task"),
        }
    }
}

/// Top-level rollout target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    /// Default image repository for every unit.
    pub repo: String,
    pub clusters: BTreeMap<ClusterName, Cluster>,
}

/// One platform cluster and the units it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tasks: Option<TaskSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskSet>,
}

/// A named group of units of the same kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub tasks: BTreeMap<UnitName, Task>,
}

/// A single deployment unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Runs to completion and exits; never force-stopped during a rollout.
    #[serde(default)]
    pub temp: bool,
    /// Revision written back by the update phase, read by the check phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RevisionId>,
}

/// Pick the effective repository: task, then task set, then cluster,
/// then layout. Empty overrides count as unset.
pub fn resolve_repo<'a>(
    layout: &'a str,
    cluster: Option<&'a str>,
    task_set: Option<&'a str>,
    task: Option<&'a str>,
) -> &'a str {
    [task, task_set, cluster]
        .into_iter()
        .flatten()
        .find(|repo| !repo.is_empty())
        .unwrap_or(layout)
}

/// A borrowed view of one unit inside a layout.
#[derive(Debug, Clone, Copy)]
pub struct UnitRef<'a> {
    pub cluster: &'a str,
    pub kind: DeployKind,
    pub name: &'a str,
    pub task: &'a Task,
    /// Effective image repository for this unit.
    pub repo: &'a str,
}

impl Layout {
    /// Create an empty layout with a default repository.
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            clusters: BTreeMap::new(),
        }
    }

    /// Add (or replace) a cluster, builder style.
    pub fn with_cluster(mut self, name: impl Into<String>, cluster: Cluster) -> Self {
        self.clusters.insert(name.into(), cluster);
        self
    }

    /// Iterate every unit in cluster, kind, name order.
    pub fn units(&self) -> impl Iterator<Item = UnitRef<'_>> {
        self.clusters.iter().flat_map(move |(cluster_name, cluster)| {
            cluster.task_sets().flat_map(move |(kind, set)| {
                set.tasks.iter().map(move |(name, task)| UnitRef {
                    cluster: cluster_name,
                    kind,
                    name,
                    task,
                    repo: resolve_repo(
                        &self.repo,
                        cluster.repo.as_deref(),
                        set.repo.as_deref(),
                        task.repo.as_deref(),
                    ),
                })
            })
        })
    }

    /// Look up a single unit.
    pub fn unit(&self, cluster: &str, kind: DeployKind, name: &str) -> Option<UnitRef<'_>> {
        self.units()
            .find(|u| u.cluster == cluster && u.kind == kind && u.name == name)
    }

    /// Number of units across all clusters.
    pub fn unit_count(&self) -> usize {
        self.units().count()
    }
}

impl Cluster {
    /// Service and plain-task sets that are present, services first.
    pub fn task_sets(&self) -> impl Iterator<Item = (DeployKind, &TaskSet)> {
        [
            (DeployKind::Service, self.service_tasks.as_ref()),
            (DeployKind::Task, self.tasks.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, set)| set.map(|s| (kind, s)))
    }

    /// Mutable variant of [`Cluster::task_sets`].
    pub fn task_sets_mut(&mut self) -> impl Iterator<Item = (DeployKind, &mut TaskSet)> {
        [
            (DeployKind::Service, self.service_tasks.as_mut()),
            (DeployKind::Task, self.tasks.as_mut()),
        ]
        .into_iter()
        .filter_map(|(kind, set)| set.map(|s| (kind, s)))
    }

    pub fn with_services(mut self, set: TaskSet) -> Self {
        self.service_tasks = Some(set);
        self
    }

    pub fn with_tasks(mut self, set: TaskSet) -> Self {
        self.tasks = Some(set);
        self
    }
}

impl TaskSet {
    /// Build a set of default units from names.
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repo: None,
            tasks: names
                .into_iter()
                .map(|n| (n.into(), Task::default()))
                .collect(),
        }
    }

    pub fn with_task(mut self, name: impl Into<String>, task: Task) -> Self {
        self.tasks.insert(name.into(), task);
        self
    }
}

impl Task {
    /// A unit that runs once and exits.
    pub fn transient() -> Self {
        Self {
            temp: true,
            ..Self::default()
        }
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }
}

/// Fully qualified container image reference: `{registry}{repo}:{tag}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repo: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(registry: &str, repo: &str, tag: &str) -> Self {
        Self {
            registry: registry.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}:{}", self.registry, self.repo, self.tag)
    }
}
