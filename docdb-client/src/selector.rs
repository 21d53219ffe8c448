use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::ReadBalancePolicy;
use crate::health::NodeHealthTracker;
use crate::topology::{ServerNode, Topology};

/// Nodes to try for one command, in order.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub candidates: Vec<ServerNode>,
    /// The first two candidates should be raced against each other.
    pub race: bool,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Applies the read balance policy to the current topology.
///
/// Suspect nodes are left out of the candidates but stay in the topology;
/// they come back once their cool-down has elapsed.
#[derive(Debug)]
pub struct NodeSelector {
    policy: ReadBalancePolicy,
    round_robin: AtomicUsize,
    reads: AtomicU64,
    race_interval: u64,
    fastest: ArcSwapOption<String>,
}

impl NodeSelector {
    pub fn new(policy: ReadBalancePolicy, race_interval: u64) -> Self {
        NodeSelector {
            policy,
            round_robin: AtomicUsize::new(0),
            reads: AtomicU64::new(0),
            race_interval,
            fastest: ArcSwapOption::empty(),
        }
    }

    pub fn policy(&self) -> ReadBalancePolicy {
        self.policy
    }

    pub fn select(
        &self,
        topology: &Topology,
        health: &NodeHealthTracker,
        is_read: bool,
    ) -> Selection {
        let mut candidates = eligible_nodes(topology, health, Instant::now());

        if candidates.is_empty() || !is_read {
            return Selection {
                candidates,
                race: false,
            };
        }

        let race = match self.policy {
            ReadBalancePolicy::None => false,
            ReadBalancePolicy::RoundRobin => {
                let start = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates.rotate_left(start);
                false
            }
            ReadBalancePolicy::FastestNode => {
                let fastest = self.fastest.load_full();
                if let Some(tag) = fastest.as_deref() {
                    if let Some(pos) = candidates.iter().position(|n| &n.cluster_tag == tag) {
                        let node = candidates.remove(pos);
                        candidates.insert(0, node);
                    }
                }
                let read = self.reads.fetch_add(1, Ordering::Relaxed);
                let due = fastest.is_none()
                    || (self.race_interval > 0 && read % self.race_interval == 0);
                due && candidates.len() > 1
            }
        };

        Selection { candidates, race }
    }

    pub fn record_fastest(&self, node_tag: &str) {
        let current = self.fastest.load_full();
        if current.as_deref().map(String::as_str) != Some(node_tag) {
            debug!(node = node_tag, "new fastest node");
            self.fastest.store(Some(Arc::new(node_tag.to_string())));
        }
    }

    pub fn fastest_node(&self) -> Option<String> {
        self.fastest.load_full().map(|tag| (*tag).clone())
    }
}

/// Non-suspect nodes in topology order.
pub(crate) fn eligible_nodes(
    topology: &Topology,
    health: &NodeHealthTracker,
    now: Instant,
) -> Vec<ServerNode> {
    topology
        .nodes
        .iter()
        .filter(|node| !health.is_suspect(&node.cluster_tag, now))
        .cloned()
        .collect()
}
