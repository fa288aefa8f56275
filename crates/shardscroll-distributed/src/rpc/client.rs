//! tarpc client utilities.
//!
//! This module provides client utilities for connecting to shard nodes and
//! to the scroll coordinator. It includes connection functions, retry
//! logic, a connection pool for node clients, and `RemoteShardExecutor`,
//! which lets a coordinator reach shards over the network.

use crate::rpc::protocol::{ScrollServiceClient, ShardServiceClient};
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tarpc::client::Config;
use tokio::sync::RwLock;
use tokio_serde::formats::Bincode;
use tracing::{debug, error, info, warn};

/// Default connection timeout in milliseconds.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default number of connection attempts.
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between retry attempts in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Configuration for client connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Number of connection attempts.
    pub retry_attempts: u32,
    /// Delay between retries.
    pub retry_delay: Duration,
    /// Maximum in-flight requests per client.
    pub max_pending_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_pending_requests: 100,
        }
    }
}

impl ClientConfig {
    /// One connection attempt bounded by `connect_timeout`. Used on the
    /// shard request path, where a failed node must be reported, not retried.
    pub fn single_attempt(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            retry_attempts: 1,
            ..Self::default()
        }
    }

    fn tarpc_config(&self) -> Config {
        let mut config = Config::default();
        config.max_in_flight_requests = self.max_pending_requests;
        config
    }
}

fn connect_timed_out(_: tokio::time::error::Elapsed) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout")
}

/// Run `connect` up to `config.retry_attempts` times, sleeping
/// `config.retry_delay` between attempts.
async fn retrying<T, F, Fut>(
    peer: &str,
    addr: SocketAddr,
    config: &ClientConfig,
    mut connect: F,
) -> Result<T, std::io::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, std::io::Error>>,
{
    let attempts = config.retry_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(config.retry_delay).await;
        }
        match connect().await {
            Ok(client) => return Ok(client),
            Err(e) => {
                warn!(
                    "Attempt {}/{} to reach {} at {} failed: {}",
                    attempt, attempts, peer, addr, e
                );
                last_error = Some(e);
            }
        }
    }

    if attempts > 1 {
        error!("Giving up on {} at {} after {} attempts", peer, addr, attempts);
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "connection failed")
    }))
}

/// Create a client connection to a shard node.
///
/// # Example
///
/// ```rust,ignore
/// use shardscroll_distributed::rpc::client::connect_to_node;
///
/// let client = connect_to_node("127.0.0.1:7001".parse()?).await?;
/// let health = client.health_check(tarpc::context::current()).await?;
/// ```
pub async fn connect_to_node(addr: SocketAddr) -> Result<ShardServiceClient, std::io::Error> {
    connect_to_node_with_config(addr, &ClientConfig::default()).await
}

/// Single connection attempt to a shard node.
pub async fn connect_to_node_with_config(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<ShardServiceClient, std::io::Error> {
    debug!("Connecting to shard node at {}", addr);
    let transport = tokio::time::timeout(
        config.connect_timeout,
        tarpc::serde_transport::tcp::connect(addr, Bincode::default),
    )
    .await
    .map_err(connect_timed_out)??;
    let client = ShardServiceClient::new(config.tarpc_config(), transport).spawn();
    info!("Connected to shard node at {}", addr);
    Ok(client)
}

/// Connect to a shard node, retrying according to `config`.
///
/// # Errors
///
/// Returns the last error if every attempt fails.
pub async fn connect_to_node_with_retry(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<ShardServiceClient, std::io::Error> {
    retrying("shard node", addr, config, || {
        connect_to_node_with_config(addr, config)
    })
    .await
}

/// Create a client connection to the scroll coordinator.
///
/// ```rust,ignore
/// use shardscroll_distributed::rpc::client::connect_to_scroll_service;
///
/// let client = connect_to_scroll_service("127.0.0.1:7100".parse()?).await?;
/// let page = client
///     .open_scroll(tarpc::context::current(), OpenScrollRequest::new("logs", 100))
///     .await??;
/// ```
pub async fn connect_to_scroll_service(
    addr: SocketAddr,
) -> Result<ScrollServiceClient, std::io::Error> {
    connect_to_scroll_service_with_config(addr, &ClientConfig::default()).await
}

pub async fn connect_to_scroll_service_with_config(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<ScrollServiceClient, std::io::Error> {
    debug!("Connecting to scroll coordinator at {}", addr);
    let transport = tokio::time::timeout(
        config.connect_timeout,
        tarpc::serde_transport::tcp::connect(addr, Bincode::default),
    )
    .await
    .map_err(connect_timed_out)??;
    let client = ScrollServiceClient::new(config.tarpc_config(), transport).spawn();
    info!("Connected to scroll coordinator at {}", addr);
    Ok(client)
}

pub async fn connect_to_scroll_service_with_retry(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<ScrollServiceClient, std::io::Error> {
    retrying("scroll coordinator", addr, config, || {
        connect_to_scroll_service_with_config(addr, config)
    })
    .await
}

/// A pool of shard node client connections.
///
/// Connections are created lazily on first use and cached per node.
///
/// # Example
///
/// ```rust,ignore
/// let pool = NodeClientPool::new();
/// pool.register_node(NodeId::new("node-0"), "127.0.0.1:7001".parse().unwrap()).await;
///
/// let client = pool.get_client(&NodeId::new("node-0")).await?;
/// ```
#[derive(Clone)]
pub struct NodeClientPool {
    addresses: Arc<RwLock<HashMap<NodeId, SocketAddr>>>,
    clients: Arc<RwLock<HashMap<NodeId, ShardServiceClient>>>,
    config: ClientConfig,
}

impl NodeClientPool {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            addresses: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Register a node's address. No connection is made until
    /// `get_client` is called.
    pub async fn register_node(&self, node: NodeId, addr: SocketAddr) {
        debug!("Registered node {} at {}", node, addr);
        self.addresses.write().await.insert(node, addr);
    }

    /// Unregister a node and drop any cached connection.
    pub async fn unregister_node(&self, node: &NodeId) {
        self.addresses.write().await.remove(node);
        self.clients.write().await.remove(node);
        debug!("Unregistered node {}", node);
    }

    /// Get a client for `node`, connecting if no cached client exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not registered or the connection
    /// fails.
    pub async fn get_client(&self, node: &NodeId) -> Result<ShardServiceClient, std::io::Error> {
        if let Some(client) = self.clients.read().await.get(node) {
            return Ok(client.clone());
        }

        let addr = self
            .addresses
            .read()
            .await
            .get(node)
            .copied()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("node {} not registered", node),
                )
            })?;

        let client = connect_to_node_with_retry(addr, &self.config).await?;
        self.clients
            .write()
            .await
            .insert(node.clone(), client.clone());
        Ok(client)
    }

    pub async fn has_node(&self, node: &NodeId) -> bool {
        self.addresses.read().await.contains_key(node)
    }

    pub async fn node_count(&self) -> usize {
        self.addresses.read().await.len()
    }

    pub async fn cached_connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Drop the cached connection for `node`, forcing a reconnect next time.
    pub async fn invalidate_client(&self, node: &NodeId) {
        self.clients.write().await.remove(node);
        debug!("Invalidated cached client for node {}", node);
    }
}

impl Default for NodeClientPool {
    fn default() -> Self {
        Self::new()
    }
}

/// `ShardQueryExecutor` over tarpc.
///
/// Transport errors become `Unreachable` (or `Timeout` when the RPC
/// deadline passed) and drop the cached connection, so a restarted node is
/// reconnected on the next scroll.
#[derive(Clone)]
pub struct RemoteShardExecutor {
    pool: NodeClientPool,
}

impl RemoteShardExecutor {
    pub fn new(pool: NodeClientPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &NodeClientPool {
        &self.pool
    }

    async fn client(&self, node: &NodeId) -> Result<ShardServiceClient, ShardFailure> {
        self.pool.get_client(node).await.map_err(|e| {
            debug!("No connection to node {}: {}", node, e);
            ShardFailure::Unreachable
        })
    }

    async fn transport_failure(&self, node: &NodeId, err: tarpc::client::RpcError) -> ShardFailure {
        warn!("RPC to node {} failed: {}", node, err);
        self.pool.invalidate_client(node).await;
        match err {
            tarpc::client::RpcError::DeadlineExceeded => ShardFailure::Timeout,
            _ => ShardFailure::Unreachable,
        }
    }
}

#[async_trait]
impl ShardQueryExecutor for RemoteShardExecutor {
    async fn execute_initial(
        &self,
        node: &NodeId,
        request: InitialShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let client = self.client(node).await?;
        match client
            .execute_initial(tarpc::context::current(), request)
            .await
        {
            Ok(result) => result,
            Err(e) => Err(self.transport_failure(node, e).await),
        }
    }

    async fn execute_resume(
        &self,
        node: &NodeId,
        request: ResumeShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let client = self.client(node).await?;
        match client
            .execute_resume(tarpc::context::current(), request)
            .await
        {
            Ok(result) => result,
            Err(e) => Err(self.transport_failure(node, e).await),
        }
    }

    async fn release(
        &self,
        node: &NodeId,
        request: ReleaseShardRequest,
    ) -> Result<bool, ShardFailure> {
        let client = self.client(node).await?;
        match client
            .release_context(tarpc::context::current(), request)
            .await
        {
            Ok(released) => Ok(released),
            Err(e) => Err(self.transport_failure(node, e).await),
        }
    }
}
