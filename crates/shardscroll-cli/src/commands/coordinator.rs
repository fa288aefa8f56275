//! Serve the scroll coordinator.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use shardscroll_distributed::rpc::{ClientConfig, NodeClientPool, RemoteShardExecutor, ScrollServer};
use shardscroll_distributed::{ScrollCoordinator, StaticTopology};
use std::sync::Arc;

use crate::config::Config;

/// Start a coordinator over the static cluster layout from shardscroll.toml.
pub fn run(port: u16) -> Result<()> {
    let config = Config::load()?;
    if config.cluster.nodes.is_empty() {
        bail!(
            "No cluster nodes configured. Add [[cluster.nodes]] entries to {}.",
            "shardscroll.toml".cyan()
        );
    }
    let topology =
        StaticTopology::from_layout(&config.cluster).context("Invalid cluster layout")?;

    println!(
        "{} Starting coordinator for {} node(s), indices: {}",
        "cluster".green().bold(),
        config.cluster.nodes.len(),
        topology.index_names().join(", ")
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        // Shard requests are never retried: a node that does not answer is
        // recorded as failed for the scroll.
        let pool = NodeClientPool::with_config(ClientConfig::single_attempt(
            config.scroll.shard_request_timeout(),
        ));
        for (node, addr) in topology.addresses() {
            pool.register_node(node.clone(), *addr).await;
            println!("    {} -- {}", node.to_string().cyan(), addr);
        }

        let coordinator = Arc::new(ScrollCoordinator::new(
            config.scroll.clone(),
            Arc::new(topology),
            Arc::new(RemoteShardExecutor::new(pool)),
        ));
        let _reaper = coordinator.spawn_reaper();

        let addr: std::net::SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        println!("{} Coordinator listening on {}", "ready".green().bold(), addr);

        ScrollServer::new(coordinator).start(addr).await?;
        Ok(())
    })
}
