//! In-process failure demo.
//!
//! Builds a cluster, indexes generated documents, and scrolls through them
//! while one node is stopped partway. Pages keep coming; the shard counts
//! show the degradation.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use shardscroll_distributed::prelude::*;
use std::sync::Arc;

use crate::config::DemoConfig;

const INDEX: &str = "demo";

pub fn run(demo: &DemoConfig) -> Result<()> {
    if demo.nodes < 2 {
        bail!("The demo needs at least 2 nodes so one can fail.");
    }
    if demo.shards == 0 || demo.page_size == 0 {
        bail!("Shards and page size must be greater than 0.");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let ids: Vec<String> = (0..demo.nodes).map(|i| format!("node-{i}")).collect();
        let cluster = Arc::new(InProcessCluster::with_nodes(ids.iter().cloned()));
        cluster
            .create_index(INDEX, demo.shards)
            .await
            .context("Failed to create demo index")?;

        println!(
            "{} {} documents into [{}] ({} shards on {} nodes)",
            "Indexing".green().bold(),
            demo.documents,
            INDEX,
            demo.shards,
            demo.nodes
        );
        let pb = ProgressBar::new(demo.documents as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} documents")?
                .progress_chars("=>-"),
        );
        for i in 0..demo.documents {
            let level = if i % 5 == 0 { "warn" } else { "info" };
            let source = format!(r#"{{"seq":{i},"level":"{level}"}}"#);
            cluster
                .index_document(INDEX, &format!("doc-{i}"), &source)
                .await?;
            pb.inc(1);
        }
        pb.finish_with_message("done");

        // The node hosting the last shard is the one that fails
        let victim = cluster
            .assigned_node(INDEX, ShardId::new(demo.shards - 1))
            .await
            .context("Demo index has no shards")?;

        if demo.fail_after_pages == 0 {
            stop(&cluster, &victim).await?;
        }

        let coordinator =
            ScrollCoordinator::new(ScrollConfig::default(), cluster.clone(), cluster.clone());
        let mut page = coordinator
            .open(OpenScrollRequest::new(INDEX, demo.page_size))
            .await?;

        println!();
        println!(
            "{:>6}  {:>6}  {:>10}  {}",
            "page".bold(),
            "hits".bold(),
            "shards".bold(),
            "failures".bold()
        );
        println!("{}", "─".repeat(48).dimmed());

        let mut number = 1;
        let mut total = 0;
        loop {
            total += page.hits.len();
            print_row(number, &page);

            let Some(cursor_id) = page.cursor_id else {
                break;
            };
            if number == demo.fail_after_pages {
                stop(&cluster, &victim).await?;
            }
            page = coordinator
                .continue_scroll(ContinueScrollRequest::new(cursor_id))
                .await?;
            number += 1;
        }

        println!("{}", "─".repeat(48).dimmed());
        println!(
            "  Scrolled {} of {} documents in {} pages",
            total.to_string().cyan(),
            demo.documents,
            number
        );
        println!(
            "  Open cursors: {}, open shard contexts: {}",
            coordinator.open_cursors().await,
            cluster.open_contexts().await
        );
        Ok(())
    })
}

async fn stop(cluster: &InProcessCluster, node: &NodeId) -> Result<()> {
    let dropped = cluster.stop_node(node).await?;
    println!(
        "{} {} ({} search contexts lost)",
        "Stopping".red().bold(),
        node,
        dropped
    );
    Ok(())
}

fn print_row(number: usize, page: &Page) {
    let shards = format!("{}/{}", page.successful_shards, page.total_shards);
    let failures = page
        .shard_failures
        .iter()
        .map(|f| format!("{} ({})", f.shard_id, f.failure))
        .collect::<Vec<_>>()
        .join(", ");

    if page.is_degraded() {
        println!(
            "{:>6}  {:>6}  {:>10}  {}",
            number,
            page.hits.len(),
            shards.yellow(),
            failures.yellow()
        );
    } else {
        println!(
            "{:>6}  {:>6}  {:>10}  {}",
            number,
            page.hits.len(),
            shards.green(),
            "-".dimmed()
        );
    }
}
