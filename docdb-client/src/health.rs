use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Health state of a node that has failed at least once since its last success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHealth {
    pub consecutive_failures: u32,
    pub last_failure: Instant,
    pub suspect: bool,
}

/// Per-node failure bookkeeping.
///
/// Entries are created on first failure and dropped on success. The map is
/// sharded, so updates for one node never wait on another node's entry. The
/// tracker never removes nodes from the topology, it only reports whether a
/// node should be skipped for now.
#[derive(Debug)]
pub struct NodeHealthTracker {
    entries: DashMap<String, NodeHealth>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl NodeHealthTracker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        NodeHealthTracker {
            entries: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn on_success(&self, node_tag: &str) {
        self.entries.remove(node_tag);
    }

    /// Records a failure. Returns true when this failure made the node suspect.
    pub fn on_failure(&self, node_tag: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(node_tag.to_string())
            .or_insert(NodeHealth {
                consecutive_failures: 0,
                last_failure: now,
                suspect: false,
            });

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_failure = now;

        let became_suspect = !entry.suspect && entry.consecutive_failures >= self.failure_threshold;
        if became_suspect {
            entry.suspect = true;
            warn!(
                node = node_tag,
                failures = entry.consecutive_failures,
                "node marked as suspect"
            );
        }
        became_suspect
    }

    /// A suspect node is given another chance once the cool-down has elapsed
    /// since its last failure.
    pub fn is_suspect(&self, node_tag: &str, now: Instant) -> bool {
        match self.entries.get(node_tag) {
            Some(health) => {
                health.suspect && now.saturating_duration_since(health.last_failure) < self.cooldown
            }
            None => false,
        }
    }

    pub fn failure_count(&self, node_tag: &str) -> u32 {
        self.entries
            .get(node_tag)
            .map(|health| health.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn health(&self, node_tag: &str) -> Option<NodeHealth> {
        self.entries.get(node_tag).map(|health| *health)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }
}
