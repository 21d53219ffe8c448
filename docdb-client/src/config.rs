use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

use crate::errors::{ClientError, Result};

/// Strategy for choosing the node that serves a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadBalancePolicy {
    /// Every request goes to the preferred node, the rest are fallbacks.
    #[default]
    None,
    /// Reads rotate their starting node; writes stay on the preferred node.
    RoundRobin,
    /// Reads go to the node that answered fastest, periodically racing a second one.
    FastestNode,
}

/// Executor settings, fixed once the executor is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub read_balance: ReadBalancePolicy,
    /// Consecutive failures after which a node is skipped
    pub failure_threshold: u32,
    /// How long a suspect node is skipped after its last failure
    pub health_cooldown_ms: u64,
    /// Per-request transport timeout
    pub request_timeout_ms: u64,
    pub cache_enabled: bool,
    /// Cached reads younger than this are served without asking the server (0 = always revalidate)
    pub cache_freshness_ms: u64,
    /// Under `fastest_node`, every Nth read races two nodes
    pub fastest_node_race_interval: u64,
    /// Fetch the topology when the executor is built and refresh it on failover
    pub topology_updates: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            read_balance: ReadBalancePolicy::None,
            failure_threshold: 2,
            health_cooldown_ms: 5_000,
            request_timeout_ms: 30_000,
            cache_enabled: true,
            cache_freshness_ms: 0,
            fastest_node_race_interval: 10,
            topology_updates: true,
        }
    }
}

impl ExecutorConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: ExecutorConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_to_string(path.as_ref()).map_err(|e| {
            ClientError::Config(format!(
                "unable to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Rejects settings the executor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(ClientError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn health_cooldown(&self) -> Duration {
        Duration::from_millis(self.health_cooldown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_freshness(&self) -> Duration {
        Duration::from_millis(self.cache_freshness_ms)
    }
}
