//! tarpc server implementations.
//!
//! `ShardServer` exposes a `LocalShardNode` and `ScrollServer` exposes a
//! `ScrollCoordinator`. Both accept connections concurrently and spawn a
//! task per in-flight request.

use crate::coordinator::ScrollCoordinator;
use crate::rpc::protocol::{RpcResult, ScrollService, ShardService};
use crate::shard::{LocalShardNode, NodeHealth};
use crate::types::*;
use futures::{Future, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tarpc::context::Context;
use tarpc::server::{self, Channel};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_serde::formats::Bincode;
use tracing::{debug, info, instrument, warn};

/// Connections served at once per server.
const MAX_CONCURRENT_CONNECTIONS: usize = 64;

/// Largest frame accepted from a peer.
const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Server implementation for a shard node.
///
/// The node sits behind `Arc<RwLock<_>>` so the server can share it with
/// an embedding process that keeps indexing documents.
///
/// # Example
///
/// ```rust,ignore
/// use shardscroll_distributed::rpc::server::ShardServer;
/// use shardscroll_distributed::shard::LocalShardNode;
///
/// let node = Arc::new(RwLock::new(LocalShardNode::new(NodeId::new("node-0"))));
/// let server = ShardServer::new(node);
/// server.start("127.0.0.1:7001".parse().unwrap()).await?;
/// ```
#[derive(Clone)]
pub struct ShardServer {
    node: Arc<RwLock<LocalShardNode>>,
}

impl ShardServer {
    pub fn new(node: Arc<RwLock<LocalShardNode>>) -> Self {
        Self { node }
    }

    /// Serve on `addr` until the listener closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the address.
    pub async fn start(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let (_, task) = self.bind(addr).await?;
        task.await.map_err(std::io::Error::other)
    }

    /// Bind `addr` and serve in a background task.
    ///
    /// Returns the bound address (useful with port 0) and the serving task.
    pub async fn bind(
        self,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let mut listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        listener.config_mut().max_frame_length(MAX_FRAME_LENGTH);
        let local_addr = listener.local_addr();
        info!("Shard server listening on {}", local_addr);

        let task = tokio::spawn(async move {
            listener
                .filter_map(|r| futures::future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .for_each_concurrent(MAX_CONCURRENT_CONNECTIONS, |channel| {
                    let server = self.clone();
                    channel.execute(server.serve()).for_each(spawn)
                })
                .await;
        });

        Ok((local_addr, task))
    }

    /// Spawn a task that drops the node's expired search contexts every
    /// `period`. It stops once the node is dropped.
    pub fn spawn_context_reaper(&self, period: Duration) -> JoinHandle<()> {
        let node: Weak<RwLock<LocalShardNode>> = Arc::downgrade(&self.node);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(node) = node.upgrade() else {
                    break;
                };
                let reaped = node.write().await.reap_expired_contexts();
                if reaped > 0 {
                    debug!("Reaped {} expired search contexts", reaped);
                }
            }
        })
    }
}

impl ShardService for ShardServer {
    #[instrument(skip(self, _ctx, request), fields(index = %request.index, shard = %request.shard))]
    async fn execute_initial(
        self,
        _ctx: Context,
        request: InitialShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let mut node = self.node.write().await;
        let result = node.execute_initial(&request);
        if let Err(e) = &result {
            warn!("Initial request failed: {}", e);
        }
        result
    }

    #[instrument(skip(self, _ctx, request), fields(index = %request.index, shard = %request.shard))]
    async fn execute_resume(
        self,
        _ctx: Context,
        request: ResumeShardRequest,
    ) -> Result<ShardPage, ShardFailure> {
        let mut node = self.node.write().await;
        let result = node.execute_resume(&request);
        if let Err(e) = &result {
            warn!("Resume request failed: {}", e);
        }
        result
    }

    #[instrument(skip(self, _ctx, request), fields(index = %request.index, shard = %request.shard))]
    async fn release_context(self, _ctx: Context, request: ReleaseShardRequest) -> bool {
        self.node.write().await.release(&request)
    }

    #[instrument(skip(self, _ctx))]
    async fn health_check(self, _ctx: Context) -> NodeHealth {
        let health = self.node.read().await.health();
        debug!(
            "Health: healthy={}, open_contexts={}",
            health.healthy, health.open_contexts
        );
        health
    }
}

/// Server implementation for the scroll coordinator.
///
/// # Example
///
/// ```rust,ignore
/// use shardscroll_distributed::rpc::server::ScrollServer;
///
/// let coordinator = Arc::new(ScrollCoordinator::new(config, topology, executor));
/// let _reaper = coordinator.spawn_reaper();
/// ScrollServer::new(coordinator)
///     .start("127.0.0.1:7100".parse().unwrap())
///     .await?;
/// ```
#[derive(Clone)]
pub struct ScrollServer {
    coordinator: Arc<ScrollCoordinator>,
}

impl ScrollServer {
    pub fn new(coordinator: Arc<ScrollCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Serve on `addr` until the listener closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the address.
    pub async fn start(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let (_, task) = self.bind(addr).await?;
        task.await.map_err(std::io::Error::other)
    }

    /// Bind `addr` and serve in a background task.
    pub async fn bind(
        self,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let mut listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        listener.config_mut().max_frame_length(MAX_FRAME_LENGTH);
        let local_addr = listener.local_addr();
        info!("Scroll server listening on {}", local_addr);

        let task = tokio::spawn(async move {
            listener
                .filter_map(|r| futures::future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .for_each_concurrent(MAX_CONCURRENT_CONNECTIONS, |channel| {
                    let server = self.clone();
                    channel.execute(server.serve()).for_each(spawn)
                })
                .await;
        });

        Ok((local_addr, task))
    }
}

impl ScrollService for ScrollServer {
    #[instrument(skip(self, _ctx, request), fields(index = %request.index, page_size = request.page_size))]
    async fn open_scroll(self, _ctx: Context, request: OpenScrollRequest) -> RpcResult<Page> {
        Ok(self.coordinator.open(request).await?)
    }

    #[instrument(skip(self, _ctx, request), fields(cursor_id = %request.cursor_id))]
    async fn continue_scroll(
        self,
        _ctx: Context,
        request: ContinueScrollRequest,
    ) -> RpcResult<Page> {
        Ok(self.coordinator.continue_scroll(request).await?)
    }

    #[instrument(skip(self, _ctx))]
    async fn clear_scroll(self, _ctx: Context, cursor_id: CursorId) -> ClearScrollResponse {
        self.coordinator.clear(cursor_id).await
    }

    #[instrument(skip(self, _ctx))]
    async fn clear_all_scrolls(self, _ctx: Context) -> ClearScrollResponse {
        let response = self.coordinator.clear_all().await;
        info!("Cleared {} scroll cursors", response.freed);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InProcessCluster;
    use crate::rpc::protocol::RpcError;

    fn node_with_docs(count: usize) -> Arc<RwLock<LocalShardNode>> {
        let mut node = LocalShardNode::new(NodeId::new("node-0"));
        node.create_shard("logs", ShardId::new(0));
        for i in 0..count {
            node.index_document("logs", ShardId::new(0), &format!("doc-{i}"), "{}")
                .unwrap();
        }
        Arc::new(RwLock::new(node))
    }

    #[tokio::test]
    async fn test_shard_server_scroll_handlers() {
        let node = node_with_docs(5);
        let server = ShardServer::new(node.clone());

        let page = server
            .clone()
            .execute_initial(
                tarpc::context::current(),
                InitialShardRequest {
                    index: "logs".into(),
                    shard: ShardId::new(0),
                    query: Query::MatchAll,
                    page_size: 3,
                    keep_alive: DEFAULT_SHARD_KEEP_ALIVE,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.hits.len(), 3);
        assert!(page.has_more);

        let page = server
            .clone()
            .execute_resume(
                tarpc::context::current(),
                ResumeShardRequest {
                    index: "logs".into(),
                    shard: ShardId::new(0),
                    handle: page.handle,
                    page_size: 3,
                    keep_alive: DEFAULT_SHARD_KEEP_ALIVE,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.hits.len(), 2);
        assert!(!page.has_more);

        let released = server
            .clone()
            .release_context(
                tarpc::context::current(),
                ReleaseShardRequest {
                    index: "logs".into(),
                    shard: ShardId::new(0),
                    handle: page.handle,
                },
            )
            .await;
        assert!(released);

        let health = server.health_check(tarpc::context::current()).await;
        assert_eq!(health.document_count, 5);
        assert_eq!(health.open_contexts, 0);
    }

    #[tokio::test]
    async fn test_shard_server_unknown_shard_rejected() {
        let server = ShardServer::new(node_with_docs(1));
        let err = server
            .execute_initial(
                tarpc::context::current(),
                InitialShardRequest {
                    index: "metrics".into(),
                    shard: ShardId::new(0),
                    query: Query::MatchAll,
                    page_size: 3,
                    keep_alive: DEFAULT_SHARD_KEEP_ALIVE,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShardFailure::Rejected(_)));
    }

    #[tokio::test]
    async fn test_scroll_server_handlers() {
        let cluster = Arc::new(InProcessCluster::with_nodes(["node-0"]));
        cluster.create_index("logs", 1).await.unwrap();
        for i in 0..4 {
            cluster
                .index_document("logs", &format!("doc-{i}"), "{}")
                .await
                .unwrap();
        }
        let coordinator = Arc::new(ScrollCoordinator::new(
            ScrollConfig::default(),
            cluster.clone(),
            cluster.clone(),
        ));
        let server = ScrollServer::new(coordinator);

        let page = server
            .clone()
            .open_scroll(tarpc::context::current(), OpenScrollRequest::new("logs", 3))
            .await
            .unwrap();
        assert_eq!(page.hits.len(), 3);
        let cursor_id = page.cursor_id.unwrap();

        let cleared = server
            .clone()
            .clear_scroll(tarpc::context::current(), cursor_id)
            .await;
        assert!(cleared.acknowledged);
        assert_eq!(cleared.freed, 1);

        let err = server
            .clone()
            .continue_scroll(
                tarpc::context::current(),
                ContinueScrollRequest::new(cursor_id),
            )
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::CursorNotFound(cursor_id));

        let err = server
            .open_scroll(
                tarpc::context::current(),
                OpenScrollRequest::new("missing", 3),
            )
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::IndexNotFound("missing".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_reaper_drops_abandoned_contexts() {
        let node = node_with_docs(5);
        let server = ShardServer::new(node.clone());
        let reaper = server.spawn_context_reaper(Duration::from_secs(10));

        server
            .clone()
            .execute_initial(
                tarpc::context::current(),
                InitialShardRequest {
                    index: "logs".into(),
                    shard: ShardId::new(0),
                    query: Query::MatchAll,
                    page_size: 2,
                    keep_alive: Duration::from_secs(15),
                },
            )
            .await
            .unwrap();
        assert_eq!(node.read().await.context_stats().open, 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        let stats = node.read().await.context_stats();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.expired_total, 1);

        drop(server);
        drop(node);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(reaper.is_finished());
    }
}
