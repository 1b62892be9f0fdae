//! Wire envelope and protocol vocabulary
//!
//! Every exchange carries a single envelope: one flag byte followed by an
//! opaque payload. The flag byte is decoded into a [`MessageKind`] at the
//! boundary so the dispatcher can match on it exhaustively.

use bitflags::bitflags;
use bytes::Bytes;
use thiserror::Error;

bitflags! {
    /// Flag byte at the front of every envelope.
    ///
    /// A request combines one category bit with one direction bit.
    /// Replies carry `RESPONSE`, and `ERROR` when they have nothing to offer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        /// Message concerns the peer registry
        const CONNECTIONS = 0x01;
        /// Message concerns opaque application payload
        const DATA = 0x02;
        /// Push/store semantics
        const SEND = 0x04;
        /// Pull/query semantics
        const GET = 0x08;
        /// Envelope is a reply
        const RESPONSE = 0x10;
        /// Reply is empty or failed
        const ERROR = 0x20;
    }
}

/// Protocol errors raised while classifying an envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown flag bits in {0:#04x}")]
    UnknownBits(u8),
    #[error("Invalid flag combination {flags:#04x}: {reason}")]
    InvalidCombination { flags: u8, reason: &'static str },
    #[error("Unsolicited {0:?} response")]
    UnsolicitedResponse(Category),
    #[error("Peer address is not valid UTF-8: 0x{0}")]
    InvalidAddress(String),
}

/// What an envelope is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Connections,
    Data,
}

impl Category {
    /// The flag bit that marks this category on the wire
    pub fn flag(self) -> Flags {
        match self {
            Category::Connections => Flags::CONNECTIONS,
            Category::Data => Flags::DATA,
        }
    }
}

/// Decoded meaning of a flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Announce a peer address
    ConnectionsPush,
    /// Ask for the peer list
    ConnectionsPull,
    /// Store application payload
    DataPush,
    /// Query application payload
    DataPull,
    /// Reply to a pull
    Response { category: Category, ok: bool },
}

impl MessageKind {
    pub fn category(&self) -> Category {
        match self {
            MessageKind::ConnectionsPush | MessageKind::ConnectionsPull => Category::Connections,
            MessageKind::DataPush | MessageKind::DataPull => Category::Data,
            MessageKind::Response { category, .. } => *category,
        }
    }

    /// Whether the sender expects an envelope back on the same connection
    pub fn is_pull(&self) -> bool {
        matches!(self, MessageKind::ConnectionsPull | MessageKind::DataPull)
    }

    pub fn is_push(&self) -> bool {
        matches!(self, MessageKind::ConnectionsPush | MessageKind::DataPush)
    }

    /// Get kind name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageKind::ConnectionsPush => "ConnectionsPush",
            MessageKind::ConnectionsPull => "ConnectionsPull",
            MessageKind::DataPush => "DataPush",
            MessageKind::DataPull => "DataPull",
            MessageKind::Response { ok: true, .. } => "Response",
            MessageKind::Response { ok: false, .. } => "ErrorResponse",
        }
    }
}

/// Flag byte plus opaque payload, exchanged once per connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub flags: Flags,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(flags: Flags, payload: impl Into<Bytes>) -> Self {
        Self {
            flags,
            payload: payload.into(),
        }
    }

    /// Envelope with no payload
    pub fn empty(flags: Flags) -> Self {
        Self {
            flags,
            payload: Bytes::new(),
        }
    }

    /// Request of the given kind. Responses are built by the dispatcher.
    pub fn request(category: Category, pull: bool, payload: impl Into<Bytes>) -> Self {
        let direction = if pull { Flags::GET } else { Flags::SEND };
        Self::new(category.flag() | direction, payload)
    }

    /// Classify the flag byte
    pub fn kind(&self) -> Result<MessageKind, ProtocolError> {
        let flags = self.flags;
        let raw = flags.bits();
        let invalid = |reason| ProtocolError::InvalidCombination { flags: raw, reason };

        if Flags::from_bits(raw).is_none() {
            return Err(ProtocolError::UnknownBits(raw));
        }

        let category = match (
            flags.contains(Flags::CONNECTIONS),
            flags.contains(Flags::DATA),
        ) {
            (true, false) => Category::Connections,
            (false, true) => Category::Data,
            (false, false) => return Err(invalid("no category bit")),
            (true, true) => return Err(invalid("both category bits")),
        };

        if flags.contains(Flags::RESPONSE) {
            if flags.contains(Flags::SEND) {
                return Err(invalid("SEND on a response"));
            }
            return Ok(MessageKind::Response {
                category,
                ok: !flags.contains(Flags::ERROR),
            });
        }

        if flags.contains(Flags::ERROR) {
            return Err(invalid("ERROR without RESPONSE"));
        }

        match (flags.contains(Flags::SEND), flags.contains(Flags::GET), category) {
            (true, false, Category::Connections) => Ok(MessageKind::ConnectionsPush),
            (false, true, Category::Connections) => Ok(MessageKind::ConnectionsPull),
            (true, false, Category::Data) => Ok(MessageKind::DataPush),
            (false, true, Category::Data) => Ok(MessageKind::DataPull),
            (false, false, _) => Err(invalid("no direction bit")),
            (true, true, _) => Err(invalid("both SEND and GET")),
        }
    }

    /// Whether this is a reply that carries a usable answer
    pub fn is_ok_response(&self) -> bool {
        matches!(self.kind(), Ok(MessageKind::Response { ok: true, .. }))
    }
}
