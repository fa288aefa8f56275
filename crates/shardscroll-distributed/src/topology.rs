//! Static cluster layout.
//!
//! For deployments where shard placement is fixed in configuration. The
//! layout never changes at runtime, so a node that is down still appears as
//! the shard's location; the transport reports it unreachable when the
//! request fails.

use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// Address of a shard node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub id: String,
    pub addr: SocketAddr,
}

/// Placement of one index: shard `i` lives on `shards[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLayout {
    pub name: String,
    pub shards: Vec<String>,
}

/// Nodes and index placements of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLayout {
    #[serde(default)]
    pub nodes: Vec<NodeAddress>,
    #[serde(default)]
    pub indices: Vec<IndexLayout>,
}

impl ClusterLayout {
    /// Check that every placement names a known node.
    pub fn validate(&self) -> ClusterResult<()> {
        for index in &self.indices {
            for node in &index.shards {
                if !self.nodes.iter().any(|n| &n.id == node) {
                    return Err(ClusterError::NodeNotFound(NodeId::new(node.clone())));
                }
            }
        }
        Ok(())
    }
}

/// `ClusterTopology` answered from a fixed layout.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    indices: HashMap<String, BTreeMap<ShardId, NodeId>>,
    addresses: BTreeMap<NodeId, SocketAddr>,
}

impl StaticTopology {
    pub fn from_layout(layout: &ClusterLayout) -> ClusterResult<Self> {
        layout.validate()?;
        let indices = layout
            .indices
            .iter()
            .map(|index| {
                let shards = index
                    .shards
                    .iter()
                    .enumerate()
                    .map(|(i, node)| (ShardId::new(i as u32), NodeId::new(node.clone())))
                    .collect();
                (index.name.clone(), shards)
            })
            .collect();
        let addresses = layout
            .nodes
            .iter()
            .map(|node| (NodeId::new(node.id.clone()), node.addr))
            .collect();
        Ok(Self { indices, addresses })
    }

    /// Node ids and their addresses, sorted by id.
    pub fn addresses(&self) -> impl Iterator<Item = (&NodeId, &SocketAddr)> {
        self.addresses.iter()
    }

    pub fn index_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.indices.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ClusterTopology for StaticTopology {
    async fn current_shards(&self, index: &str) -> Option<Vec<ShardId>> {
        self.indices
            .get(index)
            .map(|shards| shards.keys().copied().collect())
    }

    async fn node_for(&self, index: &str, shard: ShardId) -> Option<NodeId> {
        self.indices.get(index)?.get(&shard).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ClusterLayout {
        ClusterLayout {
            nodes: vec![
                NodeAddress {
                    id: "node-0".into(),
                    addr: "127.0.0.1:7001".parse().unwrap(),
                },
                NodeAddress {
                    id: "node-1".into(),
                    addr: "127.0.0.1:7002".parse().unwrap(),
                },
            ],
            indices: vec![IndexLayout {
                name: "logs".into(),
                shards: vec!["node-0".into(), "node-1".into()],
            }],
        }
    }

    #[tokio::test]
    async fn test_static_topology() {
        let topology = StaticTopology::from_layout(&layout()).unwrap();
        assert_eq!(
            topology.current_shards("logs").await,
            Some(vec![ShardId::new(0), ShardId::new(1)])
        );
        assert_eq!(
            topology.node_for("logs", ShardId::new(1)).await,
            Some(NodeId::new("node-1"))
        );
        assert!(topology.node_for("logs", ShardId::new(2)).await.is_none());
        assert!(topology.current_shards("other").await.is_none());
        assert_eq!(topology.addresses().count(), 2);
        assert_eq!(topology.index_names(), vec!["logs"]);
    }

    #[test]
    fn test_layout_rejects_unknown_node() {
        let mut layout = layout();
        layout.indices[0].shards.push("node-9".into());
        assert_eq!(
            StaticTopology::from_layout(&layout).unwrap_err(),
            ClusterError::NodeNotFound(NodeId::new("node-9"))
        );
    }

    #[test]
    fn test_layout_json_shape() {
        let json = serde_json::to_value(layout()).unwrap();
        assert_eq!(json["nodes"][0]["addr"], "127.0.0.1:7001");
        assert_eq!(json["indices"][0]["shards"][1], "node-1");
    }
}
