//! Per-envelope protocol dispatch
//!
//! Decides what an inbound envelope means for this node: grow the peer
//! registry, hand data to the backend, build a reply, and whether the
//! envelope should be flooded on to every known peer.

use crate::network::message::{Category, Envelope, Flags, MessageKind, ProtocolError};
use crate::network::registry::PeerRegistry;
use crate::storage::DataBackend;
use bytes::Bytes;
use std::net::SocketAddr;

/// Result of handling one inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub kind: MessageKind,
    /// Reply envelope. Only written back for pulls.
    pub response: Envelope,
    /// Envelope to push to all peers once the connection is closed
    pub propagate: Option<Envelope>,
}

impl Dispatch {
    /// Whether the requester is waiting for `response`
    pub fn should_reply(&self) -> bool {
        self.kind.is_pull()
    }
}

/// Handle one envelope received from `remote`
pub fn dispatch(
    registry: &mut PeerRegistry,
    backend: Option<&dyn DataBackend>,
    remote: SocketAddr,
    envelope: Envelope,
) -> Result<Dispatch, ProtocolError> {
    let kind = envelope.kind()?;
    let category = kind.category();

    let (payload, propagate) = match kind {
        MessageKind::ConnectionsPush => {
            // An empty announce means "add the sender"
            let (addr, forward) = if envelope.payload.is_empty() {
                let addr = remote.ip().to_string();
                let forward = Envelope::new(envelope.flags, addr.clone().into_bytes());
                (addr, forward)
            } else {
                let addr = std::str::from_utf8(&envelope.payload)
                    .map_err(|_| ProtocolError::InvalidAddress(hex::encode(&envelope.payload)))?
                    .to_string();
                (addr, envelope.clone())
            };

            let propagate = if registry.add(&addr) {
                log::info!("Learned peer {} (registry size {})", addr, registry.len());
                Some(forward)
            } else {
                log::debug!("Peer {} already known, not propagating", addr);
                None
            };
            (Bytes::new(), propagate)
        }
        MessageKind::ConnectionsPull => {
            let payload = if registry.is_empty() {
                Bytes::new()
            } else {
                registry.serialize()
            };
            (payload, None)
        }
        MessageKind::DataPush => {
            let accepted = backend.is_some_and(|b| b.send(&envelope.payload));
            let propagate = accepted.then(|| envelope.clone());
            (Bytes::new(), propagate)
        }
        MessageKind::DataPull => {
            let payload = backend
                .map(|b| b.get(&envelope.payload))
                .unwrap_or_default();
            (payload, None)
        }
        MessageKind::Response { .. } => {
            return Err(ProtocolError::UnsolicitedResponse(category));
        }
    };

    let mut flags = category.flag() | Flags::RESPONSE;
    if kind.is_pull() {
        flags |= Flags::GET;
        if payload.is_empty() {
            flags |= Flags::ERROR;
        }
    }

    Ok(Dispatch {
        kind,
        response: Envelope::new(flags, payload),
        propagate,
    })
}

/// Build the pull request for `category`
pub fn pull_request(category: Category, query: impl Into<Bytes>) -> Envelope {
    Envelope::request(category, true, query)
}
