//! RPC layer using tarpc.
//!
//! Shard nodes and the scroll coordinator talk over tarpc with bincode
//! framing on TCP:
//!
//! - **Protocol**: `ShardService` (node side) and `ScrollService`
//!   (coordinator side)
//! - **Server**: `ShardServer` and `ScrollServer`, wrapping a
//!   `LocalShardNode` and a `ScrollCoordinator`
//! - **Client**: connection helpers, `NodeClientPool`, and
//!   `RemoteShardExecutor`, the executor a networked coordinator uses
//!
//! # Example: Serving a Node
//!
//! ```rust,ignore
//! use shardscroll_distributed::rpc::ShardServer;
//!
//! let node = Arc::new(RwLock::new(LocalShardNode::new(NodeId::new("node-0"))));
//! ShardServer::new(node).start("127.0.0.1:7001".parse().unwrap()).await?;
//! ```
//!
//! # Example: A Networked Coordinator
//!
//! ```rust,ignore
//! use shardscroll_distributed::rpc::{ClientConfig, NodeClientPool, RemoteShardExecutor};
//!
//! let pool = NodeClientPool::with_config(ClientConfig::single_attempt(timeout));
//! pool.register_node(NodeId::new("node-0"), "127.0.0.1:7001".parse().unwrap()).await;
//! let executor = Arc::new(RemoteShardExecutor::new(pool));
//! let coordinator = ScrollCoordinator::new(config, topology, executor);
//! ```

pub mod client;
pub mod protocol;
pub mod server;

pub use protocol::{
    RpcError, RpcResult, ScrollService, ScrollServiceClient, ShardService, ShardServiceClient,
};

pub use client::{
    connect_to_node, connect_to_node_with_config, connect_to_node_with_retry,
    connect_to_scroll_service, connect_to_scroll_service_with_config,
    connect_to_scroll_service_with_retry, ClientConfig, NodeClientPool, RemoteShardExecutor,
};

pub use server::{ScrollServer, ShardServer};
