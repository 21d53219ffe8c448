//! docdb-client
//!
//! Client-side execution engine for a document database cluster: picks the
//! node that serves each command, fails over on errors, keeps the topology
//! fresh and caches read responses.

mod executor;
pub use executor::{RequestExecutor, RequestExecutorBuilder};

pub mod errors;
pub use errors::{ClientError, NodeError, Result};

mod command;
pub use command::{parse_json, url_with_query, Command};

pub mod commands;

mod completion;
mod completion_test;
pub use completion::CompletionCell;

mod config;
pub use config::{ExecutorConfig, ReadBalancePolicy};

mod topology;
pub use topology::{ServerNode, ServerRole, Topology, TopologyHolder, BOOTSTRAP_ETAG};

mod health;
pub use health::{NodeHealth, NodeHealthTracker};

mod selector;
pub use selector::{NodeSelector, Selection};

mod cache;
pub use cache::{normalize_key, CachedResponse, PendingRead, ResponseCache};

mod transport;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
