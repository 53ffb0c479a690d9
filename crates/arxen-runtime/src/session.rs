//! Peer sessions
//!
//! A session is one duplex stream to a peer. The pump runs two loops side by side: the
//! write loop drains the peer's outbound queue onto the stream and the read loop forwards
//! every received envelope to the router intake. Whichever loop ends first ends the
//! session. Sessions never reconnect; the supervisor dispatches a new attempt later.

use arxen_core::{
    ArxenError, NodeAddress, Session, SessionReader, SessionWriter, Transport,
    TransportError,
};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channels::{EventSender, Intake, IntakeSender, NodeEvent};
use crate::managers::{PeerQueue, PeerRegistry};

// ----------------------------------------------------------------------------
// Session Context
// ----------------------------------------------------------------------------

/// Handles every session task needs
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub local: NodeAddress,
    pub peers: Arc<PeerRegistry>,
    pub intake: IntakeSender,
    pub events: EventSender,
    pub shutdown: CancellationToken,
}

/// Why a session pump stopped
#[derive(Debug)]
pub enum SessionEnd {
    /// The remote closed its side
    RemoteClosed,
    /// The peer queue or the router intake went away
    QueueClosed,
    /// Reading or writing failed
    Failed(ArxenError),
    /// Node shutdown
    Shutdown,
    /// A newer session for the same peer took over
    Superseded,
}

// ----------------------------------------------------------------------------
// Outbound Session
// ----------------------------------------------------------------------------

/// One outbound connection attempt and, if it succeeds, its lifetime
pub struct OutboundSession {
    remote: NodeAddress,
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
    ctx: SessionContext,
}

impl OutboundSession {
    pub fn new(
        remote: NodeAddress,
        transport: Arc<dyn Transport>,
        connect_timeout: Duration,
        ctx: SessionContext,
    ) -> Self {
        Self {
            remote,
            transport,
            connect_timeout,
            ctx,
        }
    }

    /// Connect, pump until the session ends, then release the peer for the next attempt
    pub async fn run(self) {
        let connect = timeout(
            self.connect_timeout,
            self.transport.connect(&self.ctx.local, &self.remote),
        );

        let session = tokio::select! {
            _ = self.ctx.shutdown.cancelled() => None,
            result = connect => match result {
                Ok(Ok(session)) => Some(session),
                Ok(Err(e)) => {
                    debug!("Connect to {} failed: {}", self.remote, e);
                    None
                }
                Err(_) => {
                    let e: ArxenError = TransportError::Timeout {
                        duration_ms: self.connect_timeout.as_millis() as u64,
                    }
                    .into();
                    debug!("Connect to {} failed: {}", self.remote, e);
                    None
                }
            },
        };

        let Some(session) = session else {
            self.release();
            return;
        };

        info!("Connected to {}", self.remote);
        let _ = self
            .ctx
            .events
            .send(NodeEvent::PeerConnected(self.remote.clone()));

        let stop = self.ctx.shutdown.child_token();
        let end = pump(&self.ctx, &self.remote, session, stop).await;
        log_session_end(&self.remote, &end);

        self.release();
        let _ = self
            .ctx
            .events
            .send(NodeEvent::PeerDisconnected(self.remote.clone()));
    }

    fn release(&self) {
        if let Err(e) = self.ctx.peers.mark_connected(&self.remote, false) {
            warn!("Could not release {}: {}", self.remote, e);
        }
    }
}

// ----------------------------------------------------------------------------
// Session Pump
// ----------------------------------------------------------------------------

/// Run the read and write loops of one session until either ends
///
/// When one loop stops it cancels the other, and the writer is always closed before
/// this returns. Cancelling `stop` ends the session from outside; it must be a child of
/// the node's shutdown token.
pub async fn pump(
    ctx: &SessionContext,
    peer: &NodeAddress,
    session: Session,
    stop: CancellationToken,
) -> SessionEnd {
    let Session {
        writer, reader, ..
    } = session;

    let queue = match ctx.peers.queue(peer) {
        Ok(queue) => queue,
        Err(e) => return SessionEnd::Failed(e),
    };

    let (write_end, read_end) = tokio::join!(
        write_loop(peer, &ctx.peers, queue, writer, stop.clone()),
        read_loop(peer, reader, ctx.intake.clone(), stop.clone()),
    );

    // A loop returns None when its sibling, the node or a newer session stopped it
    write_end.or(read_end).unwrap_or_else(|| {
        if ctx.shutdown.is_cancelled() {
            SessionEnd::Shutdown
        } else {
            SessionEnd::Superseded
        }
    })
}

async fn write_loop(
    peer: &NodeAddress,
    peers: &PeerRegistry,
    queue: PeerQueue,
    mut writer: Box<dyn SessionWriter>,
    stop: CancellationToken,
) -> Option<SessionEnd> {
    let _stop_sibling = stop.clone().drop_guard();

    // Another session for the same peer may still hold the queue; wait for it
    let end = tokio::select! {
        _ = stop.cancelled() => None,
        mut rx = queue.lock_owned() => {
            peers.set_draining(peer, true);
            let end = loop {
                let envelope = tokio::select! {
                    _ = stop.cancelled() => break None,
                    envelope = rx.recv() => envelope,
                };
                let Some(envelope) = envelope else {
                    break Some(SessionEnd::QueueClosed);
                };
                tokio::select! {
                    _ = stop.cancelled() => break None,
                    result = writer.send(envelope) => {
                        if let Err(e) = result {
                            break Some(SessionEnd::Failed(e));
                        }
                    }
                }
            };
            // Cleared while still holding the queue so a successor's flag is never lost
            peers.set_draining(peer, false);
            drop(rx);
            end
        }
    };

    if let Err(e) = writer.close().await {
        debug!("Error closing writer to {}: {}", peer, e);
    }
    end
}

async fn read_loop(
    peer: &NodeAddress,
    mut reader: Box<dyn SessionReader>,
    intake: IntakeSender,
    stop: CancellationToken,
) -> Option<SessionEnd> {
    let _stop_sibling = stop.clone().drop_guard();

    loop {
        let received = tokio::select! {
            _ = stop.cancelled() => return None,
            received = reader.receive() => received,
        };
        match received {
            Ok(Some(envelope)) => {
                if intake.send(Intake::Envelope(envelope)).await.is_err() {
                    return Some(SessionEnd::QueueClosed);
                }
            }
            Ok(None) => return Some(SessionEnd::RemoteClosed),
            Err(e) => {
                debug!("Read from {} failed: {}", peer, e);
                return Some(SessionEnd::Failed(e));
            }
        }
    }
}

pub(crate) fn log_session_end(peer: &NodeAddress, end: &SessionEnd) {
    match end {
        SessionEnd::RemoteClosed => info!("Session with {} closed by remote", peer),
        SessionEnd::QueueClosed => debug!("Session with {} stopped, queue closed", peer),
        SessionEnd::Failed(e) => info!("Session with {} failed: {}", peer, e),
        SessionEnd::Shutdown => debug!("Session with {} stopped for shutdown", peer),
        SessionEnd::Superseded => info!("Session with {} replaced by a newer one", peer),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{create_event_channel, create_intake_channel};
    use arxen_core::{ChannelConfig, Envelope};
    use arxen_harness::MemoryNetwork;

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    fn create_context(local: &str) -> (SessionContext, crate::channels::IntakeReceiver) {
        let config = ChannelConfig::testing();
        let (intake, intake_rx) = create_intake_channel(&config);
        let (events, _) = create_event_channel(&config);
        let ctx = SessionContext {
            local: addr(local),
            peers: Arc::new(PeerRegistry::new(8, Duration::from_millis(20))),
            intake,
            events,
            shutdown: CancellationToken::new(),
        };
        (ctx, intake_rx)
    }

    #[tokio::test]
    async fn test_failed_connect_releases_peer() {
        let network = MemoryNetwork::new();
        let (ctx, _intake) = create_context("a");
        ctx.peers.ensure_tracked(&addr("b"));
        assert!(ctx.peers.claim_for_dispatch(&addr("b")).unwrap());

        OutboundSession::new(
            addr("b"),
            Arc::new(network.transport()),
            Duration::from_millis(100),
            ctx.clone(),
        )
        .run()
        .await;

        assert_eq!(ctx.peers.is_connected(&addr("b")), Some(false));
    }

    #[tokio::test]
    async fn test_pump_drains_queue_and_forwards_reads() {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        let mut listener = transport.listen(&addr("b")).await.unwrap();

        let (ctx, mut intake) = create_context("a");
        ctx.peers.ensure_tracked(&addr("b"));
        let queued = Envelope::from_parts(b"{}".to_vec(), vec![1]);
        ctx.peers.enqueue(&addr("b"), queued.clone()).await.unwrap();

        let session = transport.connect(&addr("a"), &addr("b")).await.unwrap();
        let mut remote = listener.accept().await.unwrap();

        let pump_ctx = ctx.clone();
        let stop = ctx.shutdown.child_token();
        let handle =
            tokio::spawn(async move { pump(&pump_ctx, &addr("b"), session, stop).await });

        assert_eq!(remote.reader.receive().await.unwrap(), Some(queued));
        assert_eq!(ctx.peers.is_draining(&addr("b")), Some(true));

        let reply = Envelope::from_parts(b"{}".to_vec(), vec![2]);
        remote.writer.send(reply.clone()).await.unwrap();
        match intake.recv().await {
            Some(Intake::Envelope(envelope)) => assert_eq!(envelope, reply),
            other => panic!("expected envelope, got {:?}", other),
        }

        network.isolate(&addr("b")).await;
        let end = handle.await.unwrap();
        assert!(matches!(end, SessionEnd::RemoteClosed | SessionEnd::Failed(_)));
        assert_eq!(ctx.peers.is_draining(&addr("b")), Some(false));
    }

    #[tokio::test]
    async fn test_cancelled_stop_ends_session_as_superseded() {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        let mut listener = transport.listen(&addr("b")).await.unwrap();

        let (ctx, _intake) = create_context("a");
        ctx.peers.ensure_tracked(&addr("b"));
        let session = transport.connect(&addr("a"), &addr("b")).await.unwrap();
        let _remote = listener.accept().await.unwrap();

        let stop = ctx.shutdown.child_token();
        let pump_ctx = ctx.clone();
        let pump_stop = stop.clone();
        let handle =
            tokio::spawn(async move { pump(&pump_ctx, &addr("b"), session, pump_stop).await });

        stop.cancel();
        let end = timeout(Duration::from_secs(1), handle)
            .await
            .expect("session did not stop")
            .unwrap();
        assert!(matches!(end, SessionEnd::Superseded));
        assert!(!ctx.shutdown.is_cancelled());
    }
}
