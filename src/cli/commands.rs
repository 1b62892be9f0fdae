//! CLI commands for the relay
//!
//! Implements the handlers behind each subcommand of the `relay` binary.

use crate::network::{
    decode_strings, pull_request, Category, Envelope, Node, NodeConfig, PeerClient,
};
use crate::storage::MemoryStore;
use bytes::Bytes;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Options for `relay start`. Flags override values from the config file.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub config: Option<PathBuf>,
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub backlog: Option<u32>,
    pub peers: Option<String>,
    pub merge: bool,
    pub discover: bool,
    pub store: bool,
}

/// Split a comma-separated peer list
pub fn parse_peers(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Resolve the node configuration for `relay start`
pub fn build_config(opts: &StartOptions) -> CliResult<NodeConfig> {
    let mut config = match &opts.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    if let Some(bind) = opts.bind {
        config.interface = bind;
    }
    if let Some(port) = opts.port {
        config.port = port;
    }
    if let Some(backlog) = opts.backlog {
        config.backlog = backlog;
    }
    if let Some(peers) = &opts.peers {
        config.seed_peers = parse_peers(peers);
    }
    if opts.merge {
        config.merge_discovered = true;
    }

    Ok(config)
}

/// Run a node until Ctrl+C
pub async fn cmd_start(opts: &StartOptions) -> CliResult<()> {
    let config = build_config(opts)?;

    println!("🌐 Starting relay node on {}:{}...", config.interface, config.port);
    if !config.seed_peers.is_empty() {
        println!("   Announcing to seed peers: {:?}", config.seed_peers);
    }

    let mut node = if opts.store {
        Node::with_backend(config, Arc::new(MemoryStore::new()))
    } else {
        Node::new(config)
    };
    let addr = node.start().await?;
    println!("✅ Listening on {}", addr);

    if opts.discover {
        let count = node.connected().await?;
        println!("🔎 Discovery complete: {} known peer(s)", count);
    }

    for peer in node.peers().await {
        println!("   peer {}", peer);
    }

    tokio::signal::ctrl_c().await?;
    println!("\n📴 Shutting down node...");
    node.shutdown().await;

    Ok(())
}

fn one_shot_client() -> PeerClient {
    PeerClient::new(&NodeConfig::default())
}

/// Push a payload to a single node, which floods it on if it is new
pub async fn cmd_send(node: &str, data: &str) -> CliResult<()> {
    let envelope = Envelope::request(Category::Data, false, Bytes::copy_from_slice(data.as_bytes()));
    one_shot_client().deliver(node, envelope).await?;
    println!("📤 Sent {} bytes to {}", data.len(), node);
    Ok(())
}

/// Query a single node for data
pub async fn cmd_get(node: &str, query: &str) -> CliResult<()> {
    let request = pull_request(Category::Data, Bytes::copy_from_slice(query.as_bytes()));
    let reply = one_shot_client().request(node, request).await?;

    if !reply.is_ok_response() {
        println!("❌ No data for {:?} on {}", query, node);
        return Ok(());
    }
    println!("📥 {}", render_payload(&reply.payload));
    Ok(())
}

/// Print the peer list of a single node
pub async fn cmd_peers(node: &str) -> CliResult<()> {
    let reply = one_shot_client()
        .request(node, pull_request(Category::Connections, Bytes::new()))
        .await?;

    if !reply.is_ok_response() {
        println!("❌ {} reported no peers", node);
        return Ok(());
    }

    let peers = decode_strings(&reply.payload)?;
    println!("🌐 Peers of {} ({}):", node, peers.len());
    for peer in peers {
        println!("   {}", peer);
    }
    Ok(())
}

/// UTF-8 text when possible, hex otherwise
pub fn render_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(payload)),
    }
}
