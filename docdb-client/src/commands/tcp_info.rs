use serde::{Deserialize, Serialize};

use crate::command::{parse_json, url_with_query, Command};
use crate::errors::Result;
use crate::topology::ServerNode;
use crate::transport::HttpRequest;

/// Where a node accepts persistent TCP connections (subscriptions).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TcpConnectionInfo {
    pub url: String,
    pub certificate: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug)]
pub struct GetTcpInfoCommand {
    tag: String,
    pub result: Option<TcpConnectionInfo>,
}

impl GetTcpInfoCommand {
    pub fn new(tag: impl Into<String>) -> Self {
        GetTcpInfoCommand {
            tag: tag.into(),
            result: None,
        }
    }
}

impl Command for GetTcpInfoCommand {
    fn is_read_request(&self) -> bool {
        true
    }

    fn create_request(&self, node: &ServerNode) -> Result<HttpRequest> {
        let url = url_with_query(
            &format!("{}/databases/{}/info/tcp", node.url, node.database),
            &[("tag", self.tag.as_str())],
        )?;
        Ok(HttpRequest::get(url))
    }

    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        self.result = Some(parse_json(body)?);
        Ok(())
    }
}
