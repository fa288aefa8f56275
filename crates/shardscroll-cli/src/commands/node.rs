//! Serve an in-memory shard node.

use anyhow::{Context, Result};
use colored::Colorize;
use shardscroll_distributed::rpc::ShardServer;
use shardscroll_distributed::shard::LocalShardNode;
use shardscroll_distributed::types::{NodeId, ShardId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// How often expired search contexts are dropped.
const CONTEXT_REAP_INTERVAL: Duration = Duration::from_secs(10);

/// Start a node hosting `shards` of `index`, each filled with generated
/// documents.
pub fn run(id: &str, port: u16, index: &str, shards: &[u32], documents: usize) -> Result<()> {
    let mut node = LocalShardNode::new(NodeId::new(id));
    for &shard in shards {
        let shard = ShardId::new(shard);
        node.create_shard(index, shard);
        for i in 0..documents {
            let doc_id = format!("{id}-{shard}-doc-{i}");
            let source = format!(r#"{{"node":"{id}","shard":{},"seq":{i}}}"#, shard.as_u32());
            node.index_document(index, shard, &doc_id, &source)
                .with_context(|| format!("Failed to index {doc_id}"))?;
        }
    }

    println!(
        "{} node {} with {} shard(s) of [{}], {} documents each",
        "Starting".green().bold(),
        id,
        shards.len(),
        index,
        documents
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = ShardServer::new(Arc::new(RwLock::new(node)));
        let _reaper = server.spawn_context_reaper(CONTEXT_REAP_INTERVAL);
        let addr: std::net::SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        println!("{} Node {} listening on {}", "ready".green().bold(), id, addr);

        server.start(addr).await?;
        Ok(())
    })
}
