//! TCP server and envelope framing
//!
//! Binds the listening socket and frames envelopes on the wire.

use crate::network::message::{Envelope, Flags, ProtocolError};
use crate::network::tlv::TlvError;
use bytes::{Buf, BufMut, BytesMut};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum payload accepted in a single envelope (16 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Flag (1) + Length (4)
const HEADER_LEN: usize = 5;

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Peer list error: {0}")]
    Tlv(#[from] TlvError),
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Connection closed before a full envelope arrived")]
    ConnectionClosed,
    #[error("Node already running")]
    AlreadyRunning,
    #[error("Config error: {0}")]
    Config(String),
}

/// Codec for `[flag: u8][len: u32 BE][payload]` frames
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_payload: usize,
}

impl EnvelopeCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len();
        if len > self.max_payload {
            return Err(NetworkError::FrameTooLarge(len, self.max_payload));
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_u8(item.flags.bits());
        dst.put_u32(len as u32);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_payload {
            return Err(NetworkError::FrameTooLarge(len, self.max_payload));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        // Unknown bits are kept so classification can report them
        let flags = Flags::from_bits_retain(src.get_u8());
        src.advance(4);
        let payload = src.split_to(len).freeze();

        Ok(Some(Envelope { flags, payload }))
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind and listen. The interface address picks the address family.
    pub fn bind(interface: IpAddr, port: u16, backlog: u32) -> Result<Self, NetworkError> {
        let addr = SocketAddr::new(interface, port);
        let socket = match interface {
            IpAddr::V4(_) => TcpSocket::new_v4()?,
            IpAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;
        let local_addr = listener.local_addr()?;
        log::info!("Server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept the next incoming connection
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), NetworkError> {
        Ok(self.listener.accept().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_codec() {
        let mut codec = EnvelopeCodec::default();
        let env = Envelope::new(Flags::DATA | Flags::SEND, &b"payload"[..]);

        let mut buf = BytesMut::new();
        codec.encode(env.clone(), &mut buf).unwrap();
        assert_eq!(buf[0], 0x06);
        assert_eq!(&buf[1..5], &[0, 0, 0, 7]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, env);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = EnvelopeCodec::default();
        let mut full = BytesMut::new();
        codec
            .encode(Envelope::new(Flags::CONNECTIONS | Flags::SEND, &b"10.0.0.5"[..]), &mut full)
            .unwrap();

        let mut buf = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[3..8]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[8..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded.payload[..], b"10.0.0.5");
    }

    #[test]
    fn test_empty_payload() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Envelope::empty(Flags::CONNECTIONS | Flags::GET), &mut buf)
            .unwrap();
        assert_eq!(buf.len(), HEADER_LEN);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_unknown_bits_survive_decoding() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::from(&[0x81u8, 0, 0, 0, 0][..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.flags.bits(), 0x81);
        assert!(decoded.kind().is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = EnvelopeCodec::new(4);
        let mut buf = BytesMut::from(&[0x06u8, 0, 0, 0, 5][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NetworkError::FrameTooLarge(5, 4))
        ));

        let mut out = BytesMut::new();
        assert!(codec
            .encode(Envelope::new(Flags::DATA | Flags::SEND, &b"12345"[..]), &mut out)
            .is_err());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::bind("127.0.0.1".parse().unwrap(), 0, 16).unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
