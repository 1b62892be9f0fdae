//! Peer registry
//!
//! Ordered, deduplicated list of known peer addresses. Entries are never
//! pruned; they live for as long as the node does.

use crate::network::tlv::{self, TlvError};
use bytes::Bytes;

/// Address every node seeds its registry with
pub const LOOPBACK: &str = "127.0.0.1";

/// Known peer addresses in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRegistry {
    peers: Vec<String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-match membership test
    pub fn contains(&self, addr: &str) -> bool {
        self.peers.iter().any(|p| p == addr)
    }

    /// Append an address unless it is already known.
    ///
    /// Returns true when the address was new.
    pub fn add(&mut self, addr: &str) -> bool {
        if self.contains(addr) {
            return false;
        }
        self.peers.push(addr.to_string());
        true
    }

    /// TLV-encode all entries in order
    pub fn serialize(&self) -> Bytes {
        tlv::encode_strings(self.peers.as_slice())
    }

    /// Replace the whole registry with a decoded peer list.
    ///
    /// On a decode error the current contents are left untouched.
    pub fn replace_from(&mut self, data: &[u8]) -> Result<usize, TlvError> {
        let decoded = tlv::decode_strings(data)?;
        self.peers.clear();
        for addr in &decoded {
            self.add(addr);
        }
        Ok(self.peers.len())
    }

    /// Append every decoded address not already known.
    ///
    /// Returns the number of addresses added.
    pub fn merge_from(&mut self, data: &[u8]) -> Result<usize, TlvError> {
        let decoded = tlv::decode_strings(data)?;
        Ok(decoded.iter().filter(|addr| self.add(addr)).count())
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
