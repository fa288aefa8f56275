//! Shardscroll CLI - run shard nodes, a scroll coordinator, and scroll clients.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardscroll")]
#[command(author, version, about = "Shardscroll - scroll pagination over a sharded index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scroll an in-process cluster while one of its nodes fails
    Demo {
        /// Number of nodes
        #[arg(short, long)]
        nodes: Option<u32>,

        /// Number of shards
        #[arg(short, long)]
        shards: Option<u32>,

        /// Number of documents to index
        #[arg(short, long)]
        documents: Option<usize>,

        /// Hits per page
        #[arg(short, long)]
        page_size: Option<usize>,

        /// Stop a node after this many pages
        #[arg(short, long)]
        fail_after: Option<usize>,
    },

    /// Serve an in-memory shard node over RPC
    Node {
        /// Node identifier
        #[arg(long)]
        id: String,

        /// Port to listen on
        #[arg(short, long)]
        port: u16,

        /// Index the shards belong to
        #[arg(short, long, default_value = "logs")]
        index: String,

        /// Shards to host (repeat or comma-separate)
        #[arg(short, long, value_delimiter = ',', required = true)]
        shards: Vec<u32>,

        /// Generated documents per shard
        #[arg(short, long, default_value = "100")]
        documents: usize,
    },

    /// Serve the scroll coordinator over the cluster in shardscroll.toml
    Coordinator {
        /// Port to listen on
        #[arg(short, long, default_value = "7100")]
        port: u16,
    },

    /// Open a scroll against a coordinator and page through it
    Scroll {
        /// Coordinator address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:7100")]
        coordinator: String,

        /// Index to scroll
        index: String,

        /// Hits per page
        #[arg(short, long, default_value = "10")]
        page_size: usize,

        /// Term filter as field=value
        #[arg(short, long)]
        term: Option<String>,

        /// Stop (and clear the scroll) after this many pages
        #[arg(short, long)]
        max_pages: Option<usize>,

        /// Print every hit's source
        #[arg(long)]
        show_hits: bool,
    },

    /// Show or write the configuration
    Config {
        /// Write the default configuration to this path
        #[arg(long)]
        init: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Demo {
            nodes,
            shards,
            documents,
            page_size,
            fail_after,
        } => {
            let mut demo = config::Config::load()?.demo;
            demo.nodes = nodes.unwrap_or(demo.nodes);
            demo.shards = shards.unwrap_or(demo.shards);
            demo.documents = documents.unwrap_or(demo.documents);
            demo.page_size = page_size.unwrap_or(demo.page_size);
            demo.fail_after_pages = fail_after.unwrap_or(demo.fail_after_pages);
            commands::demo::run(&demo)
        }
        Commands::Node {
            id,
            port,
            index,
            shards,
            documents,
        } => commands::node::run(&id, port, &index, &shards, documents),
        Commands::Coordinator { port } => commands::coordinator::run(port),
        Commands::Scroll {
            coordinator,
            index,
            page_size,
            term,
            max_pages,
            show_hits,
        } => commands::scroll::run(commands::scroll::ScrollArgs {
            coordinator,
            index,
            page_size,
            term,
            max_pages,
            show_hits,
        }),
        Commands::Config { init } => commands::config::run(init.as_deref()),
    }
}
