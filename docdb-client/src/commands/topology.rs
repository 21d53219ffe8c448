use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::command::{parse_json, url_with_query, Command};
use crate::errors::Result;
use crate::topology::{ServerNode, Topology};
use crate::transport::HttpRequest;

/// Fetches the nodes serving a database. This is what a topology refresh sends.
#[derive(Debug, Default)]
pub struct GetDatabaseTopologyCommand {
    pub result: Option<Topology>,
}

impl GetDatabaseTopologyCommand {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for GetDatabaseTopologyCommand {
    fn is_read_request(&self) -> bool {
        true
    }

    fn create_request(&self, node: &ServerNode) -> Result<HttpRequest> {
        let url = url_with_query(
            &format!("{}/topology", node.url),
            &[("name", node.database.as_str())],
        )?;
        Ok(HttpRequest::get(url))
    }

    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        let mut topology: Topology = parse_json(body)?;
        for node in &mut topology.nodes {
            node.url = node.url.trim_end_matches('/').to_string();
        }
        self.result = Some(topology);
        Ok(())
    }
}

/// Cluster-wide membership as reported by a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClusterTopology {
    pub topology_id: String,
    pub all_nodes: HashMap<String, String>,
    pub members: HashMap<String, String>,
    pub promotables: HashMap<String, String>,
    pub watchers: HashMap<String, String>,
    pub last_node_id: String,
    pub etag: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClusterTopologyResponse {
    pub leader: String,
    pub node_tag: String,
    pub topology: ClusterTopology,
}

#[derive(Debug, Default)]
pub struct GetClusterTopologyCommand {
    pub result: Option<ClusterTopologyResponse>,
}

impl GetClusterTopologyCommand {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Command for GetClusterTopologyCommand {
    fn is_read_request(&self) -> bool {
        true
    }

    fn create_request(&self, node: &ServerNode) -> Result<HttpRequest> {
        Ok(HttpRequest::get(format!("{}/cluster/topology", node.url)))
    }

    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        self.result = Some(parse_json(body)?);
        Ok(())
    }
}
