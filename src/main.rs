//! Peer Relay CLI Application
//!
//! Runs a relay node or talks to one.

use clap::{Parser, Subcommand};
use peer_relay::cli::{self, StartOptions};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relay")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A minimal peer-to-peer message relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a relay node
    Start {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Interface to bind (IPv4 or IPv6)
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// Port to listen on, shared by all peers
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen backlog
        #[arg(long)]
        backlog: Option<u32>,

        /// Seed peers to announce to (comma-separated)
        #[arg(long)]
        peers: Option<String>,

        /// Merge discovered peers instead of replacing the registry
        #[arg(long)]
        merge: bool,

        /// Ask peers for their peer list after starting
        #[arg(long)]
        discover: bool,

        /// Keep relayed data in memory and answer data queries
        #[arg(long)]
        store: bool,
    },

    /// Push data to a node
    Send {
        /// Node address (host or host:port)
        #[arg(short, long)]
        node: String,

        /// Payload text
        #[arg(short, long)]
        data: String,
    },

    /// Query a node for data
    Get {
        /// Node address (host or host:port)
        #[arg(short, long)]
        node: String,

        /// Payload prefix to look for
        #[arg(short, long, default_value = "")]
        query: String,
    },

    /// List a node's known peers
    Peers {
        /// Node address (host or host:port)
        #[arg(short, long)]
        node: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        match cli.command {
            Commands::Start {
                config,
                bind,
                port,
                backlog,
                peers,
                merge,
                discover,
                store,
            } => {
                let opts = StartOptions {
                    config,
                    bind,
                    port,
                    backlog,
                    peers,
                    merge,
                    discover,
                    store,
                };
                cli::cmd_start(&opts).await
            }
            Commands::Send { node, data } => cli::cmd_send(&node, &data).await,
            Commands::Get { node, query } => cli::cmd_get(&node, &query).await,
            Commands::Peers { node } => cli::cmd_peers(&node).await,
        }
    })?;

    Ok(())
}
