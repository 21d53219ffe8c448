use std::time::Duration;
use thiserror::Error;

use crate::topology::ServerNode;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Failure recorded against a single node while a command was being dispatched.
#[derive(Debug, Clone)]
pub struct NodeError {
    pub node_tag: String,
    pub url: String,
    pub error: ClientError,
}

impl NodeError {
    pub(crate) fn new(node: &ServerNode, error: ClientError) -> Self {
        NodeError {
            node_tag: node.cluster_tag.clone(),
            url: node.url.clone(),
            error,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("node responded with status {status}: {message}")]
    NodeFailure { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request rejected with status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("no node is available to serve the request")]
    NoNodesAvailable,

    #[error("all {} attempted nodes failed, last error: {}", .failures.len(), last_failure(.failures))]
    AllNodesFailed { failures: Vec<NodeError> },

    #[error("unable to parse the address: {0}")]
    InvalidUrl(String),

    #[error("unable to serialize the request: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Transport and node-side failures say nothing about the request itself,
    /// so a read may be sent again to another node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::NodeFailure { .. }
        )
    }

    /// The per-node errors collected before giving up, if any.
    pub fn node_failures(&self) -> &[NodeError] {
        match self {
            ClientError::AllNodesFailed { failures } => failures,
            _ => &[],
        }
    }
}

fn last_failure(failures: &[NodeError]) -> String {
    match failures.last() {
        Some(failure) => format!("{} ({}): {}", failure.node_tag, failure.url, failure.error),
        None => "none".to_string(),
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_yaml::Error> for ClientError {
    fn from(err: serde_yaml::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
