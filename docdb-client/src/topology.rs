use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Etag carried by the topology built from the bootstrap urls; any topology
/// reported by a server supersedes it.
pub const BOOTSTRAP_ETAG: i64 = -1;

/// One addressable server of the cluster, as seen by a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerNode {
    pub url: String,
    pub cluster_tag: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub server_role: ServerRole,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRole {
    #[default]
    None,
    Promotable,
    Member,
    Rehab,
}

impl ServerNode {
    pub fn new(
        url: impl Into<String>,
        cluster_tag: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        ServerNode {
            url: url.into().trim_end_matches('/').to_string(),
            cluster_tag: cluster_tag.into(),
            database: database.into(),
            server_role: ServerRole::Member,
        }
    }
}

/// Immutable, versioned list of nodes. Replaced as a whole, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Topology {
    pub nodes: Vec<ServerNode>,
    pub etag: i64,
}

impl Topology {
    pub fn new(nodes: Vec<ServerNode>, etag: i64) -> Self {
        Topology { nodes, etag }
    }

    /// Topology made of the urls the client was configured with. The url
    /// doubles as the node tag until the cluster reports the real ones.
    pub fn bootstrap(urls: &[String], database: &str) -> Self {
        let mut nodes: Vec<ServerNode> = Vec::with_capacity(urls.len());
        for url in urls {
            let node = ServerNode::new(url.as_str(), url.trim_end_matches('/'), database);
            if !nodes.iter().any(|n| n.url == node.url) {
                nodes.push(node);
            }
        }
        Topology::new(nodes, BOOTSTRAP_ETAG)
    }

    pub fn node(&self, cluster_tag: &str) -> Option<&ServerNode> {
        self.nodes.iter().find(|n| n.cluster_tag == cluster_tag)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Holds the current topology. Readers load the snapshot without locking;
/// writers swap in a whole new snapshot.
#[derive(Debug)]
pub struct TopologyHolder {
    current: ArcSwap<Topology>,
}

impl TopologyHolder {
    pub fn new(initial: Topology) -> Self {
        TopologyHolder {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn current(&self) -> Arc<Topology> {
        self.current.load_full()
    }

    pub fn etag(&self) -> i64 {
        self.current.load().etag
    }

    /// Installs `candidate` if its etag is strictly greater than the installed
    /// one. Returns false, leaving the installed snapshot in place, otherwise.
    pub fn try_update(&self, candidate: Topology) -> bool {
        let candidate = Arc::new(candidate);
        loop {
            let installed = self.current.load_full();
            if candidate.etag <= installed.etag {
                debug!(
                    installed = installed.etag,
                    offered = candidate.etag,
                    "discarding stale topology"
                );
                return false;
            }
            let previous = self
                .current
                .compare_and_swap(&installed, Arc::clone(&candidate));
            if Arc::ptr_eq(&*previous, &installed) {
                info!(
                    etag = candidate.etag,
                    nodes = candidate.nodes.len(),
                    "installed new topology"
                );
                return true;
            }
        }
    }
}
