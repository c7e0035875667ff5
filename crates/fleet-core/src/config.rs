//! fleet.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::topology::{EnvType, TopologyResolver};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: EnvType,
    pub account_id: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Prefix prepended to `{repo}:{tag}`, including the trailing slash.
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default = "default_max_job_duration_secs")]
    pub max_job_duration_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_max_job_duration_secs() -> u64 {
    30 * 60
}

fn default_call_timeout_secs() -> u64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/fleet/fleet.redb")
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            max_job_duration_secs: default_max_job_duration_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl RolloutConfig {
    pub fn max_job_duration(&self) -> Duration {
        Duration::from_secs(self.max_job_duration_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Minimal config for an environment, all other sections defaulted.
    pub fn for_env(env: EnvType) -> Self {
        FleetConfig {
            environment: EnvironmentConfig {
                name: env,
                account_id: None,
                region: None,
            },
            registry: RegistryConfig::default(),
            rollout: RolloutConfig::default(),
            store: StoreConfig::default(),
        }
    }

    pub fn env(&self) -> EnvType {
        self.environment.name
    }

    /// Topology resolver bound to this config's environment.
    pub fn resolver(&self) -> TopologyResolver {
        TopologyResolver::new(self.environment.name)
    }
}
