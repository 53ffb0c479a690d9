//! Memory Transport for Testing
//!
//! Deterministic in-process transport. Connecting registers a link between two
//! addresses; isolating an address severs all of its links and refuses new ones until
//! it is restored.

use arxen_core::{
    ArxenError, ArxenResult, Envelope, Listener, NodeAddress, Session, SessionReader,
    SessionWriter, Transport, TransportError,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

// ----------------------------------------------------------------------------
// Memory Network Configuration
// ----------------------------------------------------------------------------

/// Configuration for in-memory network behavior
#[derive(Debug, Clone)]
pub struct MemoryNetworkConfig {
    /// Buffer size of each direction of a link
    pub link_buffer: usize,
    /// Delay applied to every envelope write
    pub latency: Duration,
    /// Queue of not-yet-accepted sessions per listener
    pub accept_backlog: usize,
}

impl Default for MemoryNetworkConfig {
    fn default() -> Self {
        Self {
            link_buffer: 64,
            latency: Duration::ZERO,
            accept_backlog: 16,
        }
    }
}

/// Network-wide counters
#[derive(Debug, Default)]
pub struct MemoryNetworkStats {
    pub envelopes_sent: AtomicU64,
    pub connections_established: AtomicU64,
    pub connect_failures: AtomicU64,
    pub links_severed: AtomicU64,
}

impl MemoryNetworkStats {
    pub fn envelopes_sent(&self) -> u64 {
        self.envelopes_sent.load(Ordering::Relaxed)
    }

    pub fn connections_established(&self) -> u64 {
        self.connections_established.load(Ordering::Relaxed)
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }
}

// ----------------------------------------------------------------------------
// Memory Network
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct Link {
    dialer: NodeAddress,
    listener: NodeAddress,
    closed: CancellationToken,
}

#[derive(Debug, Default)]
struct NetworkState {
    listeners: RwLock<HashMap<NodeAddress, mpsc::Sender<Session>>>,
    offline: RwLock<HashSet<NodeAddress>>,
    links: Mutex<Vec<Link>>,
    stats: MemoryNetworkStats,
}

/// Shared in-memory network
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<NetworkState>,
    config: MemoryNetworkConfig,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemoryNetworkConfig) -> Self {
        Self {
            state: Arc::default(),
            config,
        }
    }

    /// Transport handle for one node on this network
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
        }
    }

    /// Take an address offline: sever its links and refuse new connections
    pub async fn isolate(&self, address: &NodeAddress) {
        self.state.offline.write().await.insert(address.clone());

        let mut links = self.state.links.lock().await;
        links.retain(|link| {
            let involved = &link.dialer == address || &link.listener == address;
            if involved {
                link.closed.cancel();
                let severed = &self.state.stats.links_severed;
                severed.fetch_add(1, Ordering::Relaxed);
            }
            !involved
        });
        debug!("Isolated {} from the memory network", address);
    }

    /// Bring an isolated address back online
    pub async fn restore(&self, address: &NodeAddress) {
        self.state.offline.write().await.remove(address);
        debug!("Restored {} on the memory network", address);
    }

    pub async fn is_online(&self, address: &NodeAddress) -> bool {
        !self.state.offline.read().await.contains(address)
    }

    /// Number of live links
    pub async fn link_count(&self) -> usize {
        let mut links = self.state.links.lock().await;
        links.retain(|link| !link.closed.is_cancelled());
        links.len()
    }

    pub fn stats(&self) -> &MemoryNetworkStats {
        &self.state.stats
    }

    async fn open_link(&self, local: &NodeAddress, remote: &NodeAddress) -> ArxenResult<Session> {
        let unreachable = {
            let offline = self.state.offline.read().await;
            offline.contains(local) || offline.contains(remote)
        };
        if unreachable {
            self.state.stats.connect_failed();
            return Err(ArxenError::connect_failure(remote, "host unreachable"));
        }

        let acceptor = self.state.listeners.read().await.get(remote).cloned();
        let Some(acceptor) = acceptor else {
            self.state.stats.connect_failed();
            return Err(ArxenError::connect_failure(remote, "connection refused"));
        };

        let (dial_tx, accept_rx) = mpsc::channel(self.config.link_buffer);
        let (accept_tx, dial_rx) = mpsc::channel(self.config.link_buffer);
        let closed = CancellationToken::new();

        let dialer_side = self.session(remote.clone(), dial_tx, dial_rx, closed.clone());
        // The accepting side sees the address the dialer announced
        let accepted_side = self.session(local.clone(), accept_tx, accept_rx, closed.clone());

        if acceptor.send(accepted_side).await.is_err() {
            self.state.stats.connect_failed();
            return Err(ArxenError::connect_failure(remote, "listener closed"));
        }

        self.state.links.lock().await.push(Link {
            dialer: local.clone(),
            listener: remote.clone(),
            closed,
        });
        self.state
            .stats
            .connections_established
            .fetch_add(1, Ordering::Relaxed);

        Ok(dialer_side)
    }

    fn session(
        &self,
        remote: NodeAddress,
        tx: mpsc::Sender<Envelope>,
        rx: mpsc::Receiver<Envelope>,
        closed: CancellationToken,
    ) -> Session {
        let writer = MemoryWriter {
            remote: remote.clone(),
            tx: Some(tx),
            closed: closed.clone(),
            latency: self.config.latency,
            network: self.state.clone(),
        };
        let reader = MemoryReader { rx, closed };
        Session::new(remote, Box::new(writer), Box::new(reader))
    }
}

// ----------------------------------------------------------------------------
// Memory Transport Implementation
// ----------------------------------------------------------------------------

/// Per-node handle implementing [`Transport`] over a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, local: &NodeAddress, remote: &NodeAddress) -> ArxenResult<Session> {
        self.network.open_link(local, remote).await
    }

    async fn listen(&self, local: &NodeAddress) -> ArxenResult<Box<dyn Listener>> {
        let mut listeners = self.network.state.listeners.write().await;
        let bound = listeners.get(local).is_some_and(|l| !l.is_closed());
        if bound {
            return Err(TransportError::NetworkIo(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{} is already listening", local),
            ))
            .into());
        }

        let (tx, rx) = mpsc::channel(self.network.config.accept_backlog);
        listeners.insert(local.clone(), tx);

        Ok(Box::new(MemoryListener {
            local: local.clone(),
            rx,
        }))
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

struct MemoryListener {
    local: NodeAddress,
    rx: mpsc::Receiver<Session>,
}

#[async_trait::async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> ArxenResult<Session> {
        self.rx.recv().await.ok_or_else(|| {
            TransportError::Shutdown {
                reason: format!("listener for {} closed", self.local),
            }
            .into()
        })
    }

    fn local_address(&self) -> &NodeAddress {
        &self.local
    }
}

struct MemoryWriter {
    remote: NodeAddress,
    tx: Option<mpsc::Sender<Envelope>>,
    closed: CancellationToken,
    latency: Duration,
    network: Arc<NetworkState>,
}

#[async_trait::async_trait]
impl SessionWriter for MemoryWriter {
    async fn send(&mut self, envelope: Envelope) -> ArxenResult<()> {
        if self.closed.is_cancelled() {
            return Err(ArxenError::session_closed(&self.remote));
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(ArxenError::session_closed(&self.remote));
        };
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        tx.send(envelope)
            .await
            .map_err(|_| ArxenError::session_closed(&self.remote))?;
        self.network
            .stats
            .envelopes_sent
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) -> ArxenResult<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryReader {
    rx: mpsc::Receiver<Envelope>,
    closed: CancellationToken,
}

#[async_trait::async_trait]
impl SessionReader for MemoryReader {
    async fn receive(&mut self) -> ArxenResult<Option<Envelope>> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(None),
            envelope = self.rx.recv() => Ok(envelope),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    fn envelope(tag: u8) -> Envelope {
        Envelope::from_parts(b"{}".to_vec(), vec![tag])
    }

    #[tokio::test]
    async fn test_connect_announces_dialer_address() {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        let mut listener = transport.listen(&addr("b")).await.unwrap();

        let mut dialer = transport.connect(&addr("a"), &addr("b")).await.unwrap();
        let mut accepted = listener.accept().await.unwrap();

        assert_eq!(dialer.remote, addr("b"));
        assert_eq!(accepted.remote, addr("a"));

        dialer.writer.send(envelope(1)).await.unwrap();
        accepted.writer.send(envelope(2)).await.unwrap();
        assert_eq!(accepted.reader.receive().await.unwrap(), Some(envelope(1)));
        assert_eq!(dialer.reader.receive().await.unwrap(), Some(envelope(2)));
        assert_eq!(network.stats().envelopes_sent(), 2);
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let network = MemoryNetwork::new();
        let err = network
            .transport()
            .connect(&addr("a"), &addr("nobody"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(network.stats().connect_failures(), 1);
    }

    #[tokio::test]
    async fn test_isolate_severs_links() {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        let mut listener = transport.listen(&addr("b")).await.unwrap();
        let mut dialer = transport.connect(&addr("a"), &addr("b")).await.unwrap();
        let mut accepted = listener.accept().await.unwrap();
        assert_eq!(network.link_count().await, 1);

        network.isolate(&addr("b")).await;

        assert_eq!(accepted.reader.receive().await.unwrap(), None);
        assert!(dialer.writer.send(envelope(1)).await.is_err());
        assert!(transport.connect(&addr("a"), &addr("b")).await.is_err());
        assert_eq!(network.link_count().await, 0);

        network.restore(&addr("b")).await;
        assert!(transport.connect(&addr("a"), &addr("b")).await.is_ok());
    }

    #[tokio::test]
    async fn test_double_listen_rejected() {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        let _listener = transport.listen(&addr("a")).await.unwrap();
        assert!(transport.listen(&addr("a")).await.is_err());
    }
}
