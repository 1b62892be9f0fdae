//! Relay node
//!
//! Owns the peer registry, runs the accept loop and drives bootstrap
//! (announce + discovery) and application-level publish/fetch.

use crate::network::client::PeerClient;
use crate::network::dispatch::{dispatch, pull_request, Dispatch};
use crate::network::message::{Category, Envelope};
use crate::network::registry::{PeerRegistry, LOOPBACK};
use crate::network::server::{EnvelopeCodec, NetworkError, Server, MAX_PAYLOAD_SIZE};
use crate::storage::DataBackend;
use bytes::Bytes;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Default listening port, shared by every peer
pub const DEFAULT_PORT: u16 = 7777;

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interface to bind; its family selects IPv4 or IPv6
    pub interface: IpAddr,
    /// Port to listen on, also used to dial peers listed without one
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Peers announced to on startup
    pub seed_peers: Vec<String>,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    /// Largest accepted envelope payload
    pub max_payload: usize,
    /// Merge discovery answers into the registry instead of replacing it
    pub merge_discovered: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: 128,
            seed_peers: Vec::new(),
            connect_timeout_ms: 3_000,
            io_timeout_ms: 5_000,
            max_payload: MAX_PAYLOAD_SIZE,
            merge_discovered: false,
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, NetworkError> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| NetworkError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Running flag shared between the node and its accept task
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<bool>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Mark as running. Returns false if it already was.
    pub fn start(&self) -> bool {
        self.state.send_if_modified(|running| {
            if *running {
                return false;
            }
            *running = true;
            true
        })
    }

    /// Mark as stopped and wake anyone waiting in [`Lifecycle::stopped`]
    pub fn stop(&self) {
        self.state.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the flag is cleared
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// State handed to the accept task
#[derive(Clone)]
struct Shared {
    config: Arc<NodeConfig>,
    registry: Arc<RwLock<PeerRegistry>>,
    backend: Option<Arc<dyn DataBackend>>,
    client: PeerClient,
}

impl Shared {
    /// Run the dispatcher under the registry write lock
    async fn route(
        &self,
        remote: SocketAddr,
        envelope: Envelope,
    ) -> Result<Dispatch, NetworkError> {
        let mut registry = self.registry.write().await;
        Ok(dispatch(&mut registry, self.backend.as_deref(), remote, envelope)?)
    }

    /// Read one envelope, answer it, then fan out once the connection is closed
    async fn handle_connection(&self, stream: TcpStream, remote: SocketAddr) {
        let io_timeout = self.config.io_timeout();
        let mut framed = Framed::new(stream, EnvelopeCodec::new(self.config.max_payload));

        let envelope = match tokio::time::timeout(io_timeout, framed.next()).await {
            Ok(Some(Ok(envelope))) => envelope,
            Ok(Some(Err(e))) => {
                log::warn!("Bad frame from {}: {}", remote, e);
                return;
            }
            Ok(None) => {
                log::debug!("{} closed without sending", remote);
                return;
            }
            Err(_) => {
                log::warn!("Timed out reading from {}", remote);
                return;
            }
        };

        let outcome = match self.route(remote, envelope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Rejected envelope from {}: {}", remote, e);
                return;
            }
        };
        log::debug!("Handled {} from {}", outcome.kind.type_name(), remote);

        if outcome.should_reply() {
            match tokio::time::timeout(io_timeout, framed.send(outcome.response)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Failed to reply to {}: {}", remote, e),
                Err(_) => log::warn!("Timed out replying to {}", remote),
            }
        }
        drop(framed);

        if let Some(envelope) = outcome.propagate {
            let peers = self.registry.read().await.peers().to_vec();
            log::debug!("Propagating to {} peer(s)", peers.len());
            self.client.push(&peers, &envelope).await;
        }
    }
}

/// One connection at a time, until the lifecycle is stopped
async fn accept_loop(server: Server, shared: Shared, lifecycle: Lifecycle) {
    while lifecycle.is_running() {
        let accepted = tokio::select! {
            _ = lifecycle.stopped() => break,
            accepted = server.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => shared.handle_connection(stream, addr).await,
            Err(e) => log::error!("Accept error: {}", e),
        }
    }
    log::info!("Accept loop on {} stopped", server.local_addr());
}

/// A relay node
pub struct Node {
    shared: Shared,
    lifecycle: Lifecycle,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Node {
    /// Create a node without a data backend; DATA pushes are not re-flooded
    /// and DATA pulls answer with an error reply.
    pub fn new(config: NodeConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_backend(config: NodeConfig, backend: Arc<dyn DataBackend>) -> Self {
        Self::build(config, Some(backend))
    }

    fn build(config: NodeConfig, backend: Option<Arc<dyn DataBackend>>) -> Self {
        let client = PeerClient::new(&config);
        Self {
            shared: Shared {
                config: Arc::new(config),
                registry: Arc::new(RwLock::new(PeerRegistry::new())),
                backend,
                client,
            },
            lifecycle: Lifecycle::new(),
            accept_task: None,
            local_addr: None,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    pub fn client(&self) -> &PeerClient {
        &self.shared.client
    }

    /// Handle for stopping the node from another task
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Address the accept loop is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Snapshot of the registry in order
    pub async fn peers(&self) -> Vec<String> {
        self.shared.registry.read().await.peers().to_vec()
    }

    /// Add a peer directly. Returns true when it was new.
    pub async fn add_peer(&self, addr: &str) -> bool {
        self.shared.registry.write().await.add(addr)
    }

    /// Bind, spawn the accept loop and announce ourselves to the seed peers.
    ///
    /// Bind failures are returned to the caller and leave the node stopped.
    pub async fn start(&mut self) -> Result<SocketAddr, NetworkError> {
        if self.lifecycle.is_running() {
            return Err(NetworkError::AlreadyRunning);
        }
        // a loop left over from stop() still owns the old listener
        self.join_accept_task().await;
        if !self.lifecycle.start() {
            return Err(NetworkError::AlreadyRunning);
        }

        let config = &self.shared.config;
        let server = match Server::bind(config.interface, config.port, config.backlog) {
            Ok(server) => server,
            Err(e) => {
                self.lifecycle.stop();
                return Err(e);
            }
        };
        let local_addr = server.local_addr();
        self.local_addr = Some(local_addr);

        self.accept_task = Some(tokio::spawn(accept_loop(
            server,
            self.shared.clone(),
            self.lifecycle.clone(),
        )));
        log::info!("Node started on {}", local_addr);

        self.connect().await;
        Ok(local_addr)
    }

    /// Seed the registry with loopback and announce to the seed peers
    pub async fn connect(&self) {
        self.add_peer(LOOPBACK).await;

        let seeds = &self.shared.config.seed_peers;
        if seeds.is_empty() {
            return;
        }
        log::info!("Announcing to {} seed peer(s)", seeds.len());
        let announce = Envelope::request(Category::Connections, false, Bytes::new());
        self.shared.client.push(seeds, &announce).await;
    }

    /// One-shot discovery: ask seed peers, then known peers, for their peer
    /// list and install the first answer.
    ///
    /// Returns the registry size afterwards. An empty answer leaves the
    /// registry untouched.
    pub async fn connected(&self) -> Result<usize, NetworkError> {
        let mut targets = self.shared.config.seed_peers.clone();
        for peer in self.peers().await {
            if !targets.contains(&peer) {
                targets.push(peer);
            }
        }

        let answer = self
            .shared
            .client
            .poll(&targets, &pull_request(Category::Connections, Bytes::new()))
            .await;

        let mut registry = self.shared.registry.write().await;
        if answer.is_empty() {
            log::warn!("Discovery found no peers");
            return Ok(registry.len());
        }

        if self.shared.config.merge_discovered {
            let added = registry.merge_from(&answer)?;
            log::info!("Discovery merged {} new peer(s)", added);
        } else {
            registry.replace_from(&answer)?;
            log::info!("Discovery replaced registry ({} peers)", registry.len());
        }
        Ok(registry.len())
    }

    /// Store locally and, if new, flood to every known peer.
    ///
    /// Returns false when the local backend already had the payload.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> bool {
        let payload = payload.into();
        let fresh = self
            .shared
            .backend
            .as_ref()
            .map_or(true, |backend| backend.send(&payload));
        if !fresh {
            return false;
        }

        let peers = self.peers().await;
        let envelope = Envelope::request(Category::Data, false, payload);
        self.shared.client.push(&peers, &envelope).await;
        true
    }

    /// Answer locally if possible, otherwise poll peers in order.
    ///
    /// Empty means nobody had an answer or nobody was reachable.
    pub async fn fetch(&self, query: impl Into<Bytes>) -> Bytes {
        let query = query.into();
        if let Some(backend) = &self.shared.backend {
            let local = backend.get(&query);
            if !local.is_empty() {
                return local;
            }
        }

        let peers = self.peers().await;
        self.shared
            .client
            .poll(&peers, &pull_request(Category::Data, query))
            .await
    }

    /// Ask the accept loop to stop without waiting for it.
    ///
    /// A later `start()` joins the old loop before binding again.
    pub fn stop(&self) {
        self.lifecycle.stop();
    }

    /// Stop and wait for the accept loop to finish
    pub async fn shutdown(&mut self) {
        self.stop();
        self.join_accept_task().await;
    }

    async fn join_accept_task(&mut self) {
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                log::error!("Accept task failed: {}", e);
            }
        }
    }
}
