//! Peer Relay: a minimal peer-to-peer message relay
//!
//! This crate provides a small relay node featuring:
//! - A one-byte flag envelope protocol over TCP
//! - Peer discovery through a deduplicated, gossiped peer list
//! - Best-effort fan-out of pushes to every known peer
//! - First-answer polling of peers for queries
//! - A pluggable application data backend
//!
//! # Example
//!
//! ```rust,no_run
//! use peer_relay::network::{Node, NodeConfig};
//! use peer_relay::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), peer_relay::network::NetworkError> {
//! let config = NodeConfig {
//!     seed_peers: vec!["10.0.0.5".to_string()],
//!     ..Default::default()
//! };
//! let mut node = Node::with_backend(config, Arc::new(MemoryStore::new()));
//! node.start().await?;
//! node.connected().await?;
//!
//! node.publish(&b"greeting=hello"[..]).await;
//! let answer = node.fetch(&b"greeting="[..]).await;
//! println!("{} peers, answer {:?}", node.peers().await.len(), answer);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use network::{Envelope, Flags, NetworkError, Node, NodeConfig, PeerClient, PeerRegistry};
pub use storage::{DataBackend, MemoryStore};
