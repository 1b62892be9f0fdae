//! Outbound peer connections
//!
//! Every exchange opens a fresh connection, sends one envelope and, for
//! pulls, reads one envelope back. Fan-out walks the peer list one peer
//! at a time and never surfaces individual peer failures.

use crate::network::message::Envelope;
use crate::network::node::NodeConfig;
use crate::network::server::{EnvelopeCodec, NetworkError};
use bytes::Bytes;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// Short-lived client used for fan-out and one-shot requests
#[derive(Debug, Clone)]
pub struct PeerClient {
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
    max_payload: usize,
}

impl PeerClient {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            port: config.port,
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
            max_payload: config.max_payload,
        }
    }

    /// Turn a registry entry into a dialable `host:port`.
    ///
    /// Bare hosts get the shared port; entries that already name a port
    /// are used as-is.
    pub fn resolve(&self, peer: &str) -> String {
        if peer.parse::<SocketAddr>().is_ok() {
            return peer.to_string();
        }
        if let Ok(ip) = peer.parse::<IpAddr>() {
            return SocketAddr::new(ip, self.port).to_string();
        }
        match peer.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
                peer.to_string()
            }
            _ => format!("{}:{}", peer, self.port),
        }
    }

    async fn connect(&self, peer: &str) -> Result<Framed<TcpStream, EnvelopeCodec>, NetworkError> {
        let addr = self.resolve(peer);
        let stream = within(self.connect_timeout, "connect to", &addr, async {
            Ok::<_, NetworkError>(TcpStream::connect(&addr).await?)
        })
        .await?;
        Ok(Framed::new(stream, EnvelopeCodec::new(self.max_payload)))
    }

    /// Send one envelope and close the connection
    pub async fn deliver(&self, peer: &str, envelope: Envelope) -> Result<(), NetworkError> {
        let mut framed = self.connect(peer).await?;
        within(self.io_timeout, "send to", peer, async {
            framed.send(envelope).await?;
            framed.close().await
        })
        .await
    }

    /// Send one envelope and wait for the reply
    pub async fn request(&self, peer: &str, envelope: Envelope) -> Result<Envelope, NetworkError> {
        let mut framed = self.connect(peer).await?;
        within(self.io_timeout, "request from", peer, async {
            framed.send(envelope).await?;
            match framed.next().await {
                Some(reply) => reply,
                None => Err(NetworkError::ConnectionClosed),
            }
        })
        .await
    }

    /// Best-effort delivery to every peer in order
    pub async fn push(&self, peers: &[String], envelope: &Envelope) {
        for peer in peers {
            if let Err(e) = self.deliver(peer, envelope.clone()).await {
                log::debug!("Push to {} failed: {}", peer, e);
            }
        }
    }

    /// Ask peers in order; the first non-error reply wins.
    ///
    /// Unreachable peers and error replies are skipped alike, and an empty
    /// payload comes back once the list is exhausted.
    pub async fn poll(&self, peers: &[String], envelope: &Envelope) -> Bytes {
        for peer in peers {
            match self.request(peer, envelope.clone()).await {
                Ok(reply) if reply.is_ok_response() => {
                    log::debug!("Poll answered by {} ({} bytes)", peer, reply.payload.len());
                    return reply.payload;
                }
                Ok(reply) => {
                    log::debug!("Poll: {} has no answer (flags {:?})", peer, reply.flags);
                }
                Err(e) => {
                    log::debug!("Poll of {} failed: {}", peer, e);
                }
            }
        }
        Bytes::new()
    }
}

async fn within<T, F>(limit: Duration, what: &str, peer: &str, fut: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, NetworkError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| NetworkError::Timeout(format!("{} {}", what, peer)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::Flags;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn client() -> PeerClient {
        PeerClient::new(&NodeConfig {
            connect_timeout_ms: 500,
            io_timeout_ms: 300,
            ..Default::default()
        })
    }

    /// Accept one connection, record what arrived and optionally answer
    async fn responder(reply: Option<Envelope>) -> (String, JoinHandle<Option<Envelope>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, EnvelopeCodec::default());
            let received = framed.next().await.and_then(|r| r.ok());
            if let Some(reply) = reply {
                framed.send(reply).await.unwrap();
            }
            received
        });
        (addr, handle)
    }

    async fn unreachable() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    fn data_reply(payload: &'static [u8], error: bool) -> Envelope {
        let mut flags = Flags::DATA | Flags::GET | Flags::RESPONSE;
        if error {
            flags |= Flags::ERROR;
        }
        Envelope::new(flags, payload)
    }

    #[test]
    fn test_resolve() {
        let client = PeerClient::new(&NodeConfig {
            port: 7000,
            ..Default::default()
        });
        assert_eq!(client.resolve("10.0.0.5"), "10.0.0.5:7000");
        assert_eq!(client.resolve("10.0.0.5:9000"), "10.0.0.5:9000");
        assert_eq!(client.resolve("::1"), "[::1]:7000");
        assert_eq!(client.resolve("node-a"), "node-a:7000");
        assert_eq!(client.resolve("node-a:7100"), "node-a:7100");
    }

    #[tokio::test]
    async fn test_poll_first_success_wins() {
        let (p1, h1) = responder(Some(data_reply(b"", true))).await;
        let (p2, h2) = responder(Some(data_reply(b"X", false))).await;
        let p3_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let p3 = p3_listener.local_addr().unwrap().to_string();

        let query = Envelope::new(Flags::DATA | Flags::GET, &b"key"[..]);
        let result = client().poll(&[p1, p2, p3], &query).await;

        assert_eq!(&result[..], b"X");
        assert_eq!(h1.await.unwrap(), Some(query.clone()));
        assert_eq!(h2.await.unwrap(), Some(query));

        let contacted =
            tokio::time::timeout(Duration::from_millis(100), p3_listener.accept()).await;
        assert!(contacted.is_err(), "third peer must not be contacted");
    }

    #[tokio::test]
    async fn test_poll_exhausted_returns_empty() {
        let (p1, _h1) = responder(Some(data_reply(b"", true))).await;
        let p2 = unreachable().await;

        let query = Envelope::new(Flags::DATA | Flags::GET, &b"key"[..]);
        let result = client().poll(&[p1, p2], &query).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_poll_skips_peer_without_reply() {
        let (mute, _h) = responder(None).await;
        let (p2, _h2) = responder(Some(data_reply(b"late", false))).await;

        let query = Envelope::new(Flags::DATA | Flags::GET, &b""[..]);
        let result = client().poll(&[mute, p2], &query).await;
        assert_eq!(&result[..], b"late");
    }

    #[tokio::test]
    async fn test_push_continues_past_unreachable() {
        let p1 = unreachable().await;
        let (p2, h2) = responder(None).await;
        let (p3, h3) = responder(None).await;

        let announce = Envelope::new(Flags::CONNECTIONS | Flags::SEND, &b"10.0.0.9"[..]);
        client().push(&[p1, p2, p3], &announce).await;

        assert_eq!(h2.await.unwrap(), Some(announce.clone()));
        assert_eq!(h3.await.unwrap(), Some(announce));
    }

    #[tokio::test]
    async fn test_request_surfaces_errors() {
        let peer = unreachable().await;
        let query = Envelope::new(Flags::CONNECTIONS | Flags::GET, Bytes::new());
        assert!(client().request(&peer, query).await.is_err());
    }
}
