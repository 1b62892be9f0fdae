//! Application data backends
//!
//! The relay core never interprets data payloads. It hands them to a
//! [`DataBackend`] and only decides when to call it.

pub mod memory;

pub use memory::{MemoryStore, DEFAULT_STORE_CAPACITY};

use bytes::Bytes;

/// Storage behind DATA envelopes
pub trait DataBackend: Send + Sync {
    /// Answer a DATA|GET query. An empty result means "nothing here".
    fn get(&self, query: &[u8]) -> Bytes;

    /// Accept a DATA|SEND payload. Returning true re-floods it to all peers.
    fn send(&self, payload: &[u8]) -> bool;
}
