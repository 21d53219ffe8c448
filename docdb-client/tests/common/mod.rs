#![allow(dead_code)]

use async_trait::async_trait;
use docdb_client::{
    ClientError, ExecutorConfig, HttpRequest, HttpResponse, HttpTransport, RequestExecutor,
    Result,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DATABASE: &str = "northwind";
pub const NODE_A: &str = "http://a:8080";
pub const NODE_B: &str = "http://b:8080";
pub const NODE_C: &str = "http://c:8080";

/// What the scripted server answers to one request.
pub struct Reply {
    pub delay: Duration,
    pub outcome: Result<HttpResponse>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Reply::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Reply {
            delay: Duration::ZERO,
            outcome: Ok(HttpResponse::new(status, body)),
        }
    }

    pub fn refused() -> Self {
        Reply {
            delay: Duration::ZERO,
            outcome: Err(ClientError::Transport("connection refused".to_string())),
        }
    }

    pub fn with_etag(mut self, etag: &str) -> Self {
        if let Ok(response) = self.outcome {
            self.outcome = Ok(response.with_header("ETag", etag));
        }
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Handler = dyn Fn(&HttpRequest) -> Reply + Send + Sync;

/// In-memory transport answering requests with a test supplied handler and
/// recording every request it receives.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&HttpRequest) -> bool) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| predicate(r)).count()
    }

    pub fn topology_requests(&self) -> usize {
        self.count(is_topology_request)
    }

    pub fn requests_to(&self, node_url: &str) -> usize {
        self.count(|r| r.url.starts_with(node_url) && !is_topology_request(r))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest, _timeout: Duration) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = (self.handler)(&request);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.outcome
    }
}

pub fn is_topology_request(request: &HttpRequest) -> bool {
    request.url.contains("/topology?name=")
}

pub fn topology_body(etag: i64, nodes: &[(&str, &str)]) -> String {
    let nodes: Vec<_> = nodes
        .iter()
        .map(|(tag, url)| {
            json!({"Url": url, "ClusterTag": tag, "Database": DATABASE, "ServerRole": "Member"})
        })
        .collect();
    json!({"Nodes": nodes, "Etag": etag}).to_string()
}

pub fn document_body(doc: serde_json::Value) -> String {
    json!({"Results": [doc], "Includes": {}}).to_string()
}

/// Config that never fetches the topology, so nodes keep their bootstrap urls as tags.
pub fn static_config() -> ExecutorConfig {
    ExecutorConfig {
        topology_updates: false,
        ..ExecutorConfig::default()
    }
}

pub async fn executor(
    urls: &[&str],
    config: ExecutorConfig,
    transport: Arc<ScriptedTransport>,
) -> RequestExecutor {
    RequestExecutor::builder()
        .urls(urls.iter().copied())
        .database(DATABASE)
        .config(config)
        .transport(transport)
        .build()
        .await
        .expect("executor should build")
}
