use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    cache::{normalize_key, CachedResponse, PendingRead, ResponseCache},
    command::Command,
    commands::GetDatabaseTopologyCommand,
    completion::CompletionCell,
    config::{ExecutorConfig, ReadBalancePolicy},
    errors::{ClientError, NodeError, Result},
    health::NodeHealthTracker,
    selector::{eligible_nodes, NodeSelector, Selection},
    topology::{ServerNode, Topology, TopologyHolder},
    transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, HEADER_IF_NONE_MATCH},
};

/// Dispatches commands to the nodes of a database cluster.
///
/// The executor is cheap to clone and meant to be shared by every task of the
/// application. It keeps the cluster topology fresh, tracks node health,
/// applies the read balance policy, and caches read responses.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    database: String,
    bootstrap: Topology,
    config: ExecutorConfig,
    transport: Arc<dyn HttpTransport>,
    topology: TopologyHolder,
    health: NodeHealthTracker,
    cache: Arc<ResponseCache>,
    selector: NodeSelector,
    // the only serialization point of the engine: one refresh at a time
    refresh_in_flight: Mutex<Option<Arc<CompletionCell<()>>>>,
}

// What an attempt does to the cache once its response arrives.
#[derive(Debug)]
enum CacheEffect {
    None,
    Store {
        read: PendingRead,
        validation_token: Option<String>,
    },
    Invalidate(String),
}

// Cache state of a read, looked up once before any node is contacted.
#[derive(Debug, Default)]
struct ReadContext {
    key: Option<String>,
    cached: Option<CachedResponse>,
}

enum CacheLookup {
    Fresh(CachedResponse),
    Revalidate(ReadContext),
}

impl RequestExecutor {
    pub fn builder() -> RequestExecutorBuilder {
        RequestExecutorBuilder::default()
    }

    /// Runs `command` against the cluster and leaves its result in the command.
    ///
    /// Reads fail over to the next candidate on transport or node failures, and
    /// after exhausting the candidates refresh the topology and go through
    /// the list once more. Writes are sent once; their failures are returned
    /// as they are.
    pub async fn execute<C: Command + ?Sized>(&self, command: &mut C) -> Result<()> {
        let is_read = command.is_read_request();

        let read_ctx = if is_read {
            match self.lookup_cache(command)? {
                CacheLookup::Revalidate(ctx) => ctx,
                CacheLookup::Fresh(entry) => {
                    debug!("serving cached response without revalidation");
                    return command.set_response(&entry.payload, true);
                }
            }
        } else {
            ReadContext::default()
        };

        let mut failures: Vec<NodeError> = Vec::new();

        for round in 0..2 {
            let topology = self.inner.topology.current();
            let selection = self
                .inner
                .selector
                .select(&topology, &self.inner.health, is_read);

            if !selection.is_empty() {
                if !is_read {
                    return self.dispatch_write(command, &selection.candidates[0]).await;
                }
                if self
                    .dispatch_read(command, selection, &read_ctx, &mut failures)
                    .await?
                {
                    return Ok(());
                }
            } else {
                debug!(round, "no eligible node for the command");
            }

            if round > 0 || !self.inner.config.topology_updates {
                break;
            }
            if let Err(err) = self.refresh_topology().await {
                warn!(error = %err, "topology refresh after exhausting candidates failed");
            }
        }

        if failures.is_empty() {
            Err(ClientError::NoNodesAvailable)
        } else {
            Err(ClientError::AllNodesFailed { failures })
        }
    }

    /// Like `execute`, but gives up waiting after `timeout`. Requests already
    /// sent keep running and still update health and cache state.
    pub async fn execute_with_timeout<C: Command + ?Sized>(
        &self,
        command: &mut C,
        timeout: Duration,
    ) -> Result<()> {
        tokio::time::timeout(timeout, self.execute(command))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Fetches the database topology from any reachable node.
    ///
    /// Callers arriving while a refresh is running wait for that refresh
    /// instead of starting another one.
    pub async fn refresh_topology(&self) -> Result<()> {
        let (refresh, leader) = {
            let mut in_flight = self.inner.refresh_in_flight.lock().await;
            match in_flight.as_ref() {
                Some(refresh) => (Arc::clone(refresh), false),
                None => {
                    let refresh = Arc::new(CompletionCell::new());
                    *in_flight = Some(Arc::clone(&refresh));
                    (refresh, true)
                }
            }
        };

        if leader {
            let inner = Arc::clone(&self.inner);
            let done = Arc::clone(&refresh);
            tokio::spawn(async move {
                let outcome = ExecutorInner::fetch_topology(Arc::clone(&inner)).await;
                inner.refresh_in_flight.lock().await.take();
                match outcome {
                    Ok(()) => done.complete(()),
                    Err(err) => done.complete_with_error(err),
                };
            });
        } else {
            debug!("joining the topology refresh already in flight");
        }

        refresh.get().await
    }

    /// Node a persistent connection (e.g. a subscription) should start with.
    pub fn preferred_node(&self) -> Result<ServerNode> {
        let topology = self.inner.topology.current();
        eligible_nodes(&topology, &self.inner.health, Instant::now())
            .into_iter()
            .next()
            .or_else(|| topology.nodes.first().cloned())
            .ok_or(ClientError::NoNodesAvailable)
    }

    pub fn topology(&self) -> Arc<Topology> {
        self.inner.topology.current()
    }

    pub fn health(&self) -> &NodeHealthTracker {
        &self.inner.health
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn fastest_node(&self) -> Option<String> {
        self.inner.selector.fastest_node()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    fn lookup_cache<C: Command + ?Sized>(&self, command: &C) -> Result<CacheLookup> {
        if !command.is_cacheable() || !self.inner.cache.is_enabled() {
            return Ok(CacheLookup::Revalidate(ReadContext::default()));
        }
        let topology = self.inner.topology.current();
        let Some(node) = topology.nodes.first() else {
            return Ok(CacheLookup::Revalidate(ReadContext::default()));
        };

        let request = command.create_request(node)?;
        let key = normalize_key(&request.url);
        let cached = self.inner.cache.get(&key);

        if let Some(entry) = &cached {
            if entry.age() < self.inner.config.cache_freshness() {
                return Ok(CacheLookup::Fresh(entry.clone()));
            }
        }
        Ok(CacheLookup::Revalidate(ReadContext {
            key: Some(key),
            cached,
        }))
    }

    // Returns true once the command got its response, false when every
    // candidate failed with a retryable error.
    async fn dispatch_read<C: Command + ?Sized>(
        &self,
        command: &mut C,
        selection: Selection,
        ctx: &ReadContext,
        failures: &mut Vec<NodeError>,
    ) -> Result<bool> {
        let mut candidates = selection.candidates.into_iter();

        if selection.race {
            if let (Some(first), Some(second)) = (candidates.next(), candidates.next()) {
                let first_request = prepare_read(command, &first, ctx)?;
                let second_request = prepare_read(command, &second, ctx)?;
                let attempts = [(first, first_request), (second, second_request)];
                if let Some(response) = self.race(attempts, ctx, failures).await {
                    deliver(command, &response, ctx.cached.as_ref())?;
                    return Ok(true);
                }
            }
        }

        for node in candidates {
            let request = prepare_read(command, &node, ctx)?;
            let effect = self.store_effect(ctx);
            match self.spawn_attempt(node.clone(), request, effect).await {
                Ok(response) => {
                    deliver(command, &response, ctx.cached.as_ref())?;
                    return Ok(true);
                }
                Err(err) if err.is_retryable() => {
                    debug!(node = %node.cluster_tag, error = %err, "read failed, trying next candidate");
                    failures.push(NodeError::new(&node, err));
                }
                Err(err) => return Err(err),
            }
        }

        Ok(false)
    }

    async fn dispatch_write<C: Command + ?Sized>(
        &self,
        command: &mut C,
        node: &ServerNode,
    ) -> Result<()> {
        let request = command.create_request(node)?;
        let effect = if command.is_cacheable() && self.inner.cache.is_enabled() {
            CacheEffect::Invalidate(normalize_key(&request.url))
        } else {
            CacheEffect::None
        };

        let response = self.spawn_attempt(node.clone(), request, effect).await?;
        deliver(command, &response, None)
    }

    // Sends the same read to two nodes and keeps the first successful answer.
    // The slower attempt runs to completion but its answer is dropped, and
    // neither attempt writes the cache on its own: only the winner is stored.
    async fn race(
        &self,
        contenders: [(ServerNode, HttpRequest); 2],
        ctx: &ReadContext,
        failures: &mut Vec<NodeError>,
    ) -> Option<HttpResponse> {
        let effect = self.store_effect(ctx);
        let winner: Arc<CompletionCell<(ServerNode, HttpResponse)>> =
            Arc::new(CompletionCell::new());
        let pending = Arc::new(AtomicUsize::new(2));
        let mut attempts = Vec::with_capacity(2);

        for (node, request) in contenders {
            let attempt: Arc<CompletionCell<HttpResponse>> = Arc::new(CompletionCell::new());
            attempts.push((node.clone(), Arc::clone(&attempt)));

            let inner = Arc::clone(&self.inner);
            let winner = Arc::clone(&winner);
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                let outcome =
                    ExecutorInner::send_to_node(inner, node.clone(), request, CacheEffect::None)
                        .await;
                match outcome {
                    Ok(response) => {
                        winner.complete((node, response.clone()));
                        attempt.complete(response);
                    }
                    Err(err) => {
                        attempt.complete_with_error(err);
                    }
                }
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    // both failed; a no-op when one of them already won
                    winner.cancel();
                }
            });
        }

        match winner
            .get_with_timeout(self.inner.config.request_timeout())
            .await
        {
            Ok((node, response)) => {
                debug!(node = %node.cluster_tag, "won the fastest node race");
                self.inner.selector.record_fastest(&node.cluster_tag);
                self.inner.apply_cache_effect(&effect, &response);
                Some(response)
            }
            Err(_) => {
                for (node, attempt) in attempts {
                    if let Some(Err(err)) = attempt.try_get() {
                        failures.push(NodeError::new(&node, err));
                    }
                }
                None
            }
        }
    }

    fn store_effect(&self, ctx: &ReadContext) -> CacheEffect {
        match &ctx.key {
            Some(key) => CacheEffect::Store {
                read: self.inner.cache.begin_read(key),
                validation_token: ctx.cached.as_ref().map(|c| c.validation_token.clone()),
            },
            None => CacheEffect::None,
        }
    }

    // The attempt runs in its own task so that a caller giving up does not
    // cancel it.
    async fn spawn_attempt(
        &self,
        node: ServerNode,
        request: HttpRequest,
        effect: CacheEffect,
    ) -> Result<HttpResponse> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(ExecutorInner::send_to_node(inner, node, request, effect))
            .await
            .map_err(|e| ClientError::Transport(format!("request task failed: {}", e)))?
    }
}

impl ExecutorInner {
    async fn send_to_node(
        inner: Arc<ExecutorInner>,
        node: ServerNode,
        request: HttpRequest,
        effect: CacheEffect,
    ) -> Result<HttpResponse> {
        let started = Instant::now();
        let method = request.method;
        let outcome = inner
            .transport
            .send(request, inner.config.request_timeout())
            .await;

        if let CacheEffect::Invalidate(key) = &effect {
            inner.cache.invalidate(key);
        }

        match outcome {
            Err(err) => {
                inner.health.on_failure(&node.cluster_tag);
                debug!(node = %node.cluster_tag, %method, error = %err, "request failed");
                Err(err)
            }
            Ok(response) if response.status >= 500 => {
                inner.health.on_failure(&node.cluster_tag);
                debug!(node = %node.cluster_tag, %method, status = response.status, "node reported a failure");
                Err(ClientError::NodeFailure {
                    status: response.status,
                    message: response.body_text(),
                })
            }
            Ok(response) => {
                inner.health.on_success(&node.cluster_tag);
                inner.apply_cache_effect(&effect, &response);
                debug!(
                    node = %node.cluster_tag,
                    %method,
                    status = response.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request completed"
                );
                Ok(response)
            }
        }
    }

    fn apply_cache_effect(&self, effect: &CacheEffect, response: &HttpResponse) {
        let CacheEffect::Store {
            read,
            validation_token,
        } = effect
        else {
            return;
        };

        match response.status {
            200 => {
                if let Some(etag) = response.etag() {
                    read.put(&response.body, etag);
                }
            }
            304 => {
                if let Some(token) = validation_token {
                    read.touch(token);
                }
            }
            _ => {}
        }
    }

    async fn fetch_topology(inner: Arc<ExecutorInner>) -> Result<()> {
        let mut failures = Vec::new();

        for node in inner.refresh_candidates() {
            let mut command = GetDatabaseTopologyCommand::new();
            let request = command.create_request(&node)?;
            let outcome = ExecutorInner::send_to_node(
                Arc::clone(&inner),
                node.clone(),
                request,
                CacheEffect::None,
            )
            .await
            .and_then(|response| deliver(&mut command, &response, None))
            .and_then(|()| {
                command.result.take().ok_or_else(|| {
                    ClientError::InvalidResponse("topology response carried no nodes".to_string())
                })
            });

            match outcome {
                Ok(topology) => {
                    inner.install_topology(topology);
                    return Ok(());
                }
                Err(err) => {
                    warn!(node = %node.url, error = %err, "failed to fetch topology");
                    failures.push(NodeError::new(&node, err));
                }
            }
        }

        if failures.is_empty() {
            Err(ClientError::NoNodesAvailable)
        } else {
            Err(ClientError::AllNodesFailed { failures })
        }
    }

    // Every known node is worth asking, suspect or not, and the bootstrap
    // urls come last in case the whole topology moved.
    fn refresh_candidates(&self) -> Vec<ServerNode> {
        let mut candidates = self.topology.current().nodes.clone();
        for node in &self.bootstrap.nodes {
            if !candidates.iter().any(|n| n.url == node.url) {
                candidates.push(node.clone());
            }
        }
        candidates
    }

    // Nodes listed by a successful refresh are reconfirmed as healthy even
    // when the snapshot itself is not newer than the installed one.
    fn install_topology(&self, mut topology: Topology) {
        for node in &mut topology.nodes {
            if node.database.is_empty() {
                node.database = self.database.clone();
            }
            self.health.on_success(&node.cluster_tag);
        }
        let etag = topology.etag;
        if !self.topology.try_update(topology) {
            debug!(etag, "refresh returned no newer topology");
        }
    }
}

fn prepare_read<C: Command + ?Sized>(
    command: &C,
    node: &ServerNode,
    ctx: &ReadContext,
) -> Result<HttpRequest> {
    let request = command.create_request(node)?;
    Ok(match &ctx.cached {
        Some(entry) => request.with_header(HEADER_IF_NONE_MATCH, entry.validation_token.clone()),
        None => request,
    })
}

fn deliver<C: Command + ?Sized>(
    command: &mut C,
    response: &HttpResponse,
    cached: Option<&CachedResponse>,
) -> Result<()> {
    match response.status {
        304 => match cached {
            Some(entry) => command.set_response(&entry.payload, true),
            None => Err(ClientError::InvalidResponse(
                "not modified returned for a request without a cached response".to_string(),
            )),
        },
        200..=299 => command.set_response(&response.body, false),
        404 => command.set_not_found(),
        409 | 412 => Err(ClientError::Conflict(response.body_text())),
        status => Err(ClientError::Server {
            status,
            message: response.body_text(),
        }),
    }
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("database", &self.inner.database)
            .field("topology_etag", &self.inner.topology.etag())
            .field("read_balance", &self.inner.selector.policy())
            .finish()
    }
}

/// Builder for a `RequestExecutor`.
///
/// At least one url and a database name are required. Unless topology updates
/// are disabled, `build` asks the cluster for its topology and falls back to
/// the given urls when no node answers.
#[derive(Default)]
pub struct RequestExecutorBuilder {
    urls: Vec<String>,
    database: String,
    config: ExecutorConfig,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl RequestExecutorBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn read_balance(mut self, policy: ReadBalancePolicy) -> Self {
        self.config.read_balance = policy;
        self
    }

    /// Replaces the default reqwest transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub async fn build(self) -> Result<RequestExecutor> {
        if self.urls.is_empty() {
            return Err(ClientError::Config("at least one url is required".to_string()));
        }
        if self.database.is_empty() {
            return Err(ClientError::Config("database name is required".to_string()));
        }
        self.config.validate()?;
        for url in &self.urls {
            Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))?;
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let config = self.config;
        let bootstrap = Topology::bootstrap(&self.urls, &self.database);

        let executor = RequestExecutor {
            inner: Arc::new(ExecutorInner {
                database: self.database,
                topology: TopologyHolder::new(bootstrap.clone()),
                bootstrap,
                transport,
                health: NodeHealthTracker::new(config.failure_threshold, config.health_cooldown()),
                cache: Arc::new(ResponseCache::new(config.cache_enabled)),
                selector: NodeSelector::new(config.read_balance, config.fastest_node_race_interval),
                refresh_in_flight: Mutex::new(None),
                config,
            }),
        };

        if executor.inner.config.topology_updates {
            match executor.refresh_topology().await {
                Ok(()) => info!(
                    database = %executor.inner.database,
                    etag = executor.inner.topology.etag(),
                    "request executor ready"
                ),
                Err(err) => warn!(
                    error = %err,
                    "initial topology fetch failed, using the configured urls"
                ),
            }
        }

        Ok(executor)
    }
}
