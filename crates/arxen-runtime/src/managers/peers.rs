//! Peer registry for the Arxen runtime
//!
//! This module contains the PeerRegistry that tracks every known peer address, its
//! connection status, and its outbound envelope queue. Entries are created lazily and
//! never removed; disconnects only toggle status.

use arxen_core::{ArxenError, ArxenResult, Envelope, NodeAddress, TransportError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::{
    sync::{
        mpsc,
        mpsc::error::{SendTimeoutError, TrySendError},
        Mutex,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shared receiving end of a peer's outbound queue
///
/// Whichever session currently writes to the peer holds the lock for its lifetime, so
/// there is a single consumer at a time and per-peer order is preserved.
pub type PeerQueue = Arc<Mutex<mpsc::Receiver<Envelope>>>;

// ----------------------------------------------------------------------------
// Peer Status
// ----------------------------------------------------------------------------

/// Read-only view of one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub address: NodeAddress,
    pub connected: bool,
    /// Envelopes waiting in the outbound queue
    pub queued: usize,
}

/// Per-peer delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub envelopes_enqueued: u64,
    pub envelopes_dropped: u64,
}

// ----------------------------------------------------------------------------
// Peer Slot
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct PeerSlot {
    /// An outbound session is dispatched or live
    outbound_active: bool,
    /// Number of live inbound sessions from this peer
    inbound_sessions: usize,
    /// Stop token of the newest inbound session
    inbound_stop: Option<CancellationToken>,
    /// A session holds the queue and is writing it out
    draining: bool,
    sender: mpsc::Sender<Envelope>,
    receiver: PeerQueue,
    stats: PeerStats,
}

impl PeerSlot {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            outbound_active: false,
            inbound_sessions: 0,
            inbound_stop: None,
            draining: false,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            stats: PeerStats::default(),
        }
    }

    fn connected(&self) -> bool {
        self.outbound_active || self.inbound_sessions > 0
    }

    fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

/// Tracks known peers and owns their outbound queues
#[derive(Debug)]
pub struct PeerRegistry {
    peers: DashMap<NodeAddress, PeerSlot>,
    queue_capacity: usize,
    send_timeout: Duration,
}

impl PeerRegistry {
    /// Create a registry whose queues hold `queue_capacity` envelopes
    pub fn new(queue_capacity: usize, send_timeout: Duration) -> Self {
        Self {
            peers: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
            send_timeout,
        }
    }

    /// Register a peer if not already present; returns `true` when newly tracked
    pub fn ensure_tracked(&self, address: &NodeAddress) -> bool {
        let mut created = false;
        self.peers.entry(address.clone()).or_insert_with(|| {
            created = true;
            PeerSlot::new(self.queue_capacity)
        });
        if created {
            debug!("Tracking new peer {}", address);
        }
        created
    }

    pub fn is_tracked(&self, address: &NodeAddress) -> bool {
        self.peers.contains_key(address)
    }

    /// Connection status, `None` for untracked peers
    pub fn is_connected(&self, address: &NodeAddress) -> Option<bool> {
        self.peers.get(address).map(|slot| slot.connected())
    }

    /// Set the outbound connection flag for a tracked peer
    pub fn mark_connected(&self, address: &NodeAddress, connected: bool) -> ArxenResult<()> {
        let mut slot = self
            .peers
            .get_mut(address)
            .ok_or_else(|| ArxenError::unknown_peer(address))?;
        slot.outbound_active = connected;
        Ok(())
    }

    /// Atomically claim a disconnected peer for an outbound attempt
    ///
    /// Returns `false` if the peer already has a live or pending session.
    pub fn claim_for_dispatch(&self, address: &NodeAddress) -> ArxenResult<bool> {
        let mut slot = self
            .peers
            .get_mut(address)
            .ok_or_else(|| ArxenError::unknown_peer(address))?;
        if slot.connected() {
            return Ok(false);
        }
        slot.outbound_active = true;
        Ok(true)
    }

    /// Claim every disconnected peer for dispatch in one pass
    pub fn claim_disconnected(&self) -> Vec<NodeAddress> {
        let mut claimed = Vec::new();
        for mut entry in self.peers.iter_mut() {
            if !entry.connected() {
                entry.outbound_active = true;
                claimed.push(entry.key().clone());
            }
        }
        claimed.sort();
        claimed
    }

    /// Record a newly accepted inbound session and return the token that stops it
    ///
    /// The newest inbound session from a peer supersedes older ones: their tokens are
    /// cancelled so a stale session (for example a half-open stream) releases the queue.
    pub fn inbound_opened(
        &self,
        address: &NodeAddress,
        parent: &CancellationToken,
    ) -> CancellationToken {
        self.ensure_tracked(address);
        let stop = parent.child_token();
        if let Some(mut slot) = self.peers.get_mut(address) {
            slot.inbound_sessions += 1;
            if let Some(previous) = slot.inbound_stop.replace(stop.clone()) {
                if !previous.is_cancelled() {
                    debug!("Inbound session from {} superseded", address);
                    previous.cancel();
                }
            }
        }
        stop
    }

    /// Record the end of an inbound session
    pub fn inbound_closed(&self, address: &NodeAddress) {
        if let Some(mut slot) = self.peers.get_mut(address) {
            slot.inbound_sessions = slot.inbound_sessions.saturating_sub(1);
            if slot.inbound_sessions == 0 {
                slot.inbound_stop = None;
            }
        }
    }

    /// Mark whether a session currently holds the peer's queue and writes it out
    pub fn set_draining(&self, address: &NodeAddress, draining: bool) {
        if let Some(mut slot) = self.peers.get_mut(address) {
            slot.draining = draining;
        }
    }

    /// Whether a session is writing the peer's queue, `None` for untracked peers
    pub fn is_draining(&self, address: &NodeAddress) -> Option<bool> {
        self.peers.get(address).map(|slot| slot.draining)
    }

    /// Place an envelope on a peer's outbound queue
    ///
    /// While a session drains the queue, waits at most the configured send timeout for
    /// room. Without one nothing frees space soon, so a full queue drops the new envelope
    /// at once. Either way a dropped envelope yields `QueueFull` and the caller moves on.
    pub async fn enqueue(&self, address: &NodeAddress, envelope: Envelope) -> ArxenResult<()> {
        let (sender, draining) = {
            let slot = self
                .peers
                .get(address)
                .ok_or_else(|| ArxenError::unknown_peer(address))?;
            (slot.sender.clone(), slot.draining)
        };

        let closed = || ArxenError::channel_error(format!("outbound queue for {} closed", address));

        let result = if draining {
            match sender.send_timeout(envelope, self.send_timeout).await {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(
                        "Outbound queue for {} stayed full for {:?}, dropping envelope",
                        address, self.send_timeout
                    );
                    Err(self.queue_full(address))
                }
                Err(SendTimeoutError::Closed(_)) => Err(closed()),
            }
        } else {
            match sender.try_send(envelope) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    debug!("Queue for offline {} is full, dropping envelope", address);
                    Err(self.queue_full(address))
                }
                Err(TrySendError::Closed(_)) => Err(closed()),
            }
        };

        if let Some(mut slot) = self.peers.get_mut(address) {
            match &result {
                Ok(()) => slot.stats.envelopes_enqueued += 1,
                Err(ArxenError::Transport(TransportError::QueueFull { .. })) => {
                    slot.stats.envelopes_dropped += 1
                }
                Err(_) => {}
            }
        }
        result
    }

    fn queue_full(&self, address: &NodeAddress) -> ArxenError {
        TransportError::QueueFull {
            address: address.to_string(),
            capacity: self.queue_capacity,
        }
        .into()
    }

    /// Receiving end of a peer's queue, for the session that writes to it
    pub fn queue(&self, address: &NodeAddress) -> ArxenResult<PeerQueue> {
        self.peers
            .get(address)
            .map(|slot| slot.receiver.clone())
            .ok_or_else(|| ArxenError::unknown_peer(address))
    }

    /// Number of envelopes waiting for a peer, `None` for untracked peers
    pub fn queued_len(&self, address: &NodeAddress) -> Option<usize> {
        self.peers.get(address).map(|slot| slot.queued())
    }

    pub fn stats(&self, address: &NodeAddress) -> Option<PeerStats> {
        self.peers.get(address).map(|slot| slot.stats.clone())
    }

    /// Copy of every peer's status, ordered by address
    pub fn snapshot(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self
            .peers
            .iter()
            .map(|entry| PeerStatus {
                address: entry.key().clone(),
                connected: entry.connected(),
                queued: entry.queued(),
            })
            .collect();
        statuses.sort_by(|a, b| a.address.cmp(&b.address));
        statuses
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use arxen_core::RegistryError;

    fn create_test_address(id: u8) -> NodeAddress {
        NodeAddress::parse(&format!("10.0.0.{}:7878", id)).unwrap()
    }

    fn envelope(tag: u8) -> Envelope {
        Envelope::from_parts(b"{}".to_vec(), vec![tag])
    }

    #[test]
    fn test_ensure_tracked_is_idempotent() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        let peer = create_test_address(2);

        assert!(registry.ensure_tracked(&peer));
        assert!(!registry.ensure_tracked(&peer));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.is_connected(&peer), Some(false));
    }

    #[tokio::test]
    async fn test_enqueue_requires_tracking() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        let err = registry
            .enqueue(&create_test_address(3), envelope(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ArxenError::Registry(RegistryError::UnknownPeer { .. })
        ));
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        let peer = create_test_address(2);
        registry.ensure_tracked(&peer);

        for tag in 0..3 {
            registry.enqueue(&peer, envelope(tag)).await.unwrap();
        }
        assert_eq!(registry.queued_len(&peer), Some(3));

        let queue = registry.queue(&peer).unwrap();
        let mut rx = queue.lock().await;
        for tag in 0..3 {
            assert_eq!(rx.recv().await, Some(envelope(tag)));
        }
    }

    #[tokio::test]
    async fn test_full_queue_of_draining_peer_drops_after_timeout() {
        let registry = PeerRegistry::new(1, Duration::from_millis(20));
        let peer = create_test_address(2);
        registry.ensure_tracked(&peer);
        registry.set_draining(&peer, true);

        registry.enqueue(&peer, envelope(1)).await.unwrap();
        let started = tokio::time::Instant::now();
        let err = registry.enqueue(&peer, envelope(2)).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(20));

        assert!(matches!(
            err,
            ArxenError::Transport(TransportError::QueueFull { capacity: 1, .. })
        ));
        let stats = registry.stats(&peer).unwrap();
        assert_eq!(stats.envelopes_enqueued, 1);
        assert_eq!(stats.envelopes_dropped, 1);
    }

    #[tokio::test]
    async fn test_full_queue_of_offline_peer_drops_without_waiting() {
        let registry = PeerRegistry::new(2, Duration::from_secs(30));
        let ghost = create_test_address(7);
        registry.ensure_tracked(&ghost);

        registry.enqueue(&ghost, envelope(1)).await.unwrap();
        registry.enqueue(&ghost, envelope(2)).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            registry.enqueue(&ghost, envelope(3)),
        )
        .await
        .expect("enqueue to an offline peer must not wait");
        assert!(matches!(
            result,
            Err(ArxenError::Transport(TransportError::QueueFull { .. }))
        ));

        // The oldest envelopes are kept
        let queue = registry.queue(&ghost).unwrap();
        let mut rx = queue.lock().await;
        assert_eq!(rx.recv().await, Some(envelope(1)));
        assert_eq!(rx.recv().await, Some(envelope(2)));
        assert_eq!(registry.stats(&ghost).unwrap().envelopes_dropped, 1);
    }

    #[test]
    fn test_claim_prevents_double_dispatch() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        let peer = create_test_address(2);
        registry.ensure_tracked(&peer);

        assert!(registry.claim_for_dispatch(&peer).unwrap());
        assert!(!registry.claim_for_dispatch(&peer).unwrap());
        assert!(registry.claim_disconnected().is_empty());

        registry.mark_connected(&peer, false).unwrap();
        assert_eq!(registry.claim_disconnected(), vec![peer.clone()]);
        assert_eq!(registry.is_connected(&peer), Some(true));
    }

    #[test]
    fn test_inbound_session_counts_as_connected() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        let peer = create_test_address(5);

        registry.inbound_opened(&peer, &CancellationToken::new());
        assert_eq!(registry.is_connected(&peer), Some(true));
        assert!(!registry.claim_for_dispatch(&peer).unwrap());

        registry.inbound_closed(&peer);
        assert_eq!(registry.is_connected(&peer), Some(false));
    }

    #[test]
    fn test_newer_inbound_session_supersedes_older() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        let peer = create_test_address(5);
        let node = CancellationToken::new();

        let first = registry.inbound_opened(&peer, &node);
        let second = registry.inbound_opened(&peer, &node);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        // The superseded session winds down; the newer one keeps the peer connected
        registry.inbound_closed(&peer);
        assert_eq!(registry.is_connected(&peer), Some(true));

        node.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_mark_connected_unknown_peer() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        assert!(registry
            .mark_connected(&create_test_address(9), true)
            .is_err());
    }

    #[test]
    fn test_snapshot_sorted() {
        let registry = PeerRegistry::new(4, Duration::from_millis(10));
        let connected = create_test_address(3);
        registry.ensure_tracked(&connected);
        registry.ensure_tracked(&create_test_address(1));
        registry.mark_connected(&connected, true).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].address, create_test_address(1));
        assert!(!snapshot[0].connected);
        assert!(snapshot[1].connected);
    }
}
