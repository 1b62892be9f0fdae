//! P2P relay networking
//!
//! Provides the wire protocol and the node that relays it.
//!
//! # Features
//! - One flag-byte envelope per TCP connection
//! - Deduplicated peer registry with TLV-encoded exchange
//! - Best-effort fan-out and first-answer polling
//! - Sequential accept loop with explicit start/stop

pub mod client;
pub mod dispatch;
pub mod message;
pub mod node;
pub mod registry;
pub mod server;
pub mod tlv;

pub use client::PeerClient;
pub use dispatch::{dispatch, pull_request, Dispatch};
pub use message::{Category, Envelope, Flags, MessageKind, ProtocolError};
pub use node::{Lifecycle, Node, NodeConfig, DEFAULT_PORT};
pub use registry::{PeerRegistry, LOOPBACK};
pub use server::{EnvelopeCodec, NetworkError, Server, MAX_PAYLOAD_SIZE};
pub use tlv::{decode_strings, encode_strings, TlvError, STRING_TAG};
