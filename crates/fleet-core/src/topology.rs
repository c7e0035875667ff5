//! Topology resolution — component name to [`Layout`].
//!
//! Cluster and unit names follow the environment's naming convention:
//! a global prefix, the environment name, and a fixed per-unit suffix.
//! Production carries extra regional units in the public cluster.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Cluster, Layout, Task, TaskSet};

const GLOBAL_PREFIX: &str = "ceramic";

const SUFFIX_CERAMIC_NODE: &str = "node";
const SUFFIX_CERAMIC_GATEWAY: &str = "gateway";
const SUFFIX_ELP_1_1_CERAMIC_NODE: &str = "elp-1-1-node";
const SUFFIX_ELP_1_2_CERAMIC_NODE: &str = "elp-1-2-node";
const SUFFIX_IPFS_NODE: &str = "ipfs-nd";
const SUFFIX_IPFS_GATEWAY: &str = "ipfs-gw";
const SUFFIX_ELP_1_1_IPFS_NODE: &str = "elp-1-1-ipfs-nd";
const SUFFIX_ELP_1_2_IPFS_NODE: &str = "elp-1-2-ipfs-nd";
const SUFFIX_CAS_API: &str = "api";
const SUFFIX_CAS_SCHEDULER: &str = "scheduler";
const SUFFIX_CAS_RUNNER: &str = "anchor";

/// Component name that does not map to a known layout.
#[derive(Debug, Error)]
#[error("unknown component: {0} (expected ceramic, ipfs, or cas)")]
pub struct UnknownComponent(pub String);

/// Environment name that is not recognised.
#[derive(Debug, Error)]
#[error("unknown environment: {0} (expected dev, qa, tnet, or prod)")]
pub struct UnknownEnv(pub String);

/// Application component a rollout job deploys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Ceramic,
    Ipfs,
    Cas,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Ceramic => "ceramic",
            Component::Ipfs => "ipfs",
            Component::Cas => "cas",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = UnknownComponent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ceramic" => Ok(Component::Ceramic),
            "ipfs" => Ok(Component::Ipfs),
            "cas" => Ok(Component::Cas),
            other => Err(UnknownComponent(other.to_string())),
        }
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvType {
    Dev,
    Qa,
    Tnet,
    Prod,
}

impl EnvType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvType::Dev => "dev",
            EnvType::Qa => "qa",
            EnvType::Tnet => "tnet",
            EnvType::Prod => "prod",
        }
    }
}

impl std::fmt::Display for EnvType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvType {
    type Err = UnknownEnv;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(EnvType::Dev),
            "qa" => Ok(EnvType::Qa),
            "tnet" => Ok(EnvType::Tnet),
            "prod" => Ok(EnvType::Prod),
            other => Err(UnknownEnv(other.to_string())),
        }
    }
}

/// Builds the layout a component occupies in one environment.
#[derive(Debug, Clone)]
pub struct TopologyResolver {
    env: EnvType,
}

impl TopologyResolver {
    pub fn new(env: EnvType) -> Self {
        Self { env }
    }

    pub fn env(&self) -> EnvType {
        self.env
    }

    /// Private cluster: `ceramic-{env}`.
    pub fn private_cluster(&self) -> String {
        format!("{GLOBAL_PREFIX}-{}", self.env)
    }

    /// Public cluster: `ceramic-{env}-ex`.
    pub fn public_cluster(&self) -> String {
        format!("{GLOBAL_PREFIX}-{}-ex", self.env)
    }

    /// Anchor service cluster: `ceramic-{env}-cas`.
    pub fn cas_cluster(&self) -> String {
        format!("{GLOBAL_PREFIX}-{}-cas", self.env)
    }

    /// Resolve the layout for a component. Pure; no I/O.
    pub fn resolve(&self, component: Component) -> Layout {
        match component {
            Component::Ceramic => self.node_layout(
                format!("ceramic-{}", self.env),
                SUFFIX_CERAMIC_NODE,
                SUFFIX_CERAMIC_GATEWAY,
                [SUFFIX_ELP_1_1_CERAMIC_NODE, SUFFIX_ELP_1_2_CERAMIC_NODE],
            ),
            Component::Ipfs => self.node_layout(
                format!("go-ipfs-{}", self.env),
                SUFFIX_IPFS_NODE,
                SUFFIX_IPFS_GATEWAY,
                [SUFFIX_ELP_1_1_IPFS_NODE, SUFFIX_ELP_1_2_IPFS_NODE],
            ),
            Component::Cas => self.cas_layout(),
        }
    }

    /// Node + gateway layout shared by ceramic and ipfs.
    fn node_layout(&self, repo: String, node: &str, gateway: &str, regional: [&str; 2]) -> Layout {
        let private = self.private_cluster();
        let public = self.public_cluster();
        let cas = self.cas_cluster();

        let mut public_services = TaskSet::of([
            format!("{public}-{node}"),
            format!("{public}-{gateway}"),
        ]);
        if self.env == EnvType::Prod {
            for suffix in regional {
                public_services = public_services
                    .with_task(format!("{GLOBAL_PREFIX}-{suffix}"), Task::default());
            }
        }

        Layout::new(repo)
            .with_cluster(
                private.clone(),
                Cluster::default().with_services(TaskSet::of([format!("{private}-{node}")])),
            )
            .with_cluster(public, Cluster::default().with_services(public_services))
            .with_cluster(
                cas.clone(),
                Cluster::default().with_services(TaskSet::of([format!("{cas}-{node}")])),
            )
    }

    fn cas_layout(&self) -> Layout {
        let cas = self.cas_cluster();
        // Anchor workers exit after each batch.
        let runner = Task::transient().with_repo(format!("ceramic-{}-cas-runner", self.env));

        Layout::new(format!("ceramic-{}-cas", self.env)).with_cluster(
            cas.clone(),
            Cluster::default()
                .with_services(TaskSet::of([
                    format!("{cas}-{SUFFIX_CAS_API}"),
                    format!("{cas}-{SUFFIX_CAS_SCHEDULER}"),
                ]))
                .with_tasks(
                    TaskSet::default().with_task(format!("{cas}-{SUFFIX_CAS_RUNNER}"), runner),
                ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeployKind;

    fn names(layout: &Layout, cluster: &str, kind: DeployKind) -> Vec<String> {
        layout
            .units()
            .filter(|u| u.cluster == cluster && u.kind == kind)
            .map(|u| u.name.to_string())
            .collect()
    }

    #[test]
    fn cas_dev_layout() {
        let layout = TopologyResolver::new(EnvType::Dev).resolve(Component::Cas);

        assert_eq!(layout.repo, "ceramic-dev-cas");
        assert_eq!(layout.clusters.len(), 1);
        assert_eq!(
            names(&layout, "ceramic-dev-cas", DeployKind::Service),
            vec!["ceramic-dev-cas-api", "ceramic-dev-cas-scheduler"]
        );

        let anchor = layout
            .unit("ceramic-dev-cas", DeployKind::Task, "ceramic-dev-cas-anchor")
            .unwrap();
        assert!(anchor.task.temp);
        assert_eq!(anchor.repo, "ceramic-dev-cas-runner");
        assert!(anchor.task.id.is_none());
    }

    #[test]
    fn ceramic_dev_has_three_clusters_without_regional_nodes() {
        let layout = TopologyResolver::new(EnvType::Dev).resolve(Component::Ceramic);

        assert_eq!(layout.repo, "ceramic-dev");
        assert_eq!(
            layout.clusters.keys().cloned().collect::<Vec<_>>(),
            vec!["ceramic-dev", "ceramic-dev-cas", "ceramic-dev-ex"]
        );
        assert_eq!(
            names(&layout, "ceramic-dev-ex", DeployKind::Service),
            vec!["ceramic-dev-ex-gateway", "ceramic-dev-ex-node"]
        );
        assert_eq!(layout.unit_count(), 4);
    }

    #[test]
    fn prod_adds_regional_units_to_public_cluster() {
        let layout = TopologyResolver::new(EnvType::Prod).resolve(Component::Ipfs);

        assert_eq!(layout.repo, "go-ipfs-prod");
        let public = names(&layout, "ceramic-prod-ex", DeployKind::Service);
        assert!(public.contains(&"ceramic-elp-1-1-ipfs-nd".to_string()));
        assert!(public.contains(&"ceramic-elp-1-2-ipfs-nd".to_string()));
        assert!(public.contains(&"ceramic-prod-ex-ipfs-gw".to_string()));
        assert_eq!(layout.unit_count(), 6);
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = TopologyResolver::new(EnvType::Qa);
        assert_eq!(
            resolver.resolve(Component::Ceramic),
            resolver.resolve(Component::Ceramic)
        );
    }

    #[test]
    fn parse_component_and_env() {
        assert_eq!("cas".parse::<Component>().unwrap(), Component::Cas);
        assert!("kafka".parse::<Component>().is_err());
        assert_eq!("tnet".parse::<EnvType>().unwrap(), EnvType::Tnet);
        let err = "staging".parse::<EnvType>().unwrap_err();
        assert!(err.to_string().contains("staging"));
    }
}
