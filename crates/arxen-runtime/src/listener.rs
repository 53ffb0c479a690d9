//! Inbound listener
//!
//! Accepts sessions dialed by other nodes. The accepted session names the remote by the
//! address the dialer announced during setup, so an inbound session serves the same peer
//! queue an outbound session to that address would.

use arxen_core::{
    ArxenError, ArxenResult, Listener, NodeAddress, Session, Transport, TransportError,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channels::NodeEvent;
use crate::session::{log_session_end, pump, SessionContext, SessionEnd};

/// Accept loop bound to the node's address
pub struct InboundListener {
    listener: Box<dyn Listener>,
    ctx: SessionContext,
}

impl InboundListener {
    /// Bind the node's address on the given transport
    pub async fn bind(
        transport: Arc<dyn Transport>,
        ctx: SessionContext,
    ) -> ArxenResult<Self> {
        let listener = transport.listen(&ctx.local).await?;
        info!(
            "Listening on {} ({})",
            listener.local_address(),
            transport.transport_type()
        );
        Ok(Self { listener, ctx })
    }

    pub fn local_address(&self) -> &NodeAddress {
        self.listener.local_address()
    }

    /// Accept sessions until shutdown or until the listener closes
    pub async fn run(mut self) -> ArxenResult<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => {
                    debug!("Listener received shutdown signal");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok(session) => {
                    let ctx = self.ctx.clone();
                    tokio::spawn(handle_inbound(ctx, session));
                }
                Err(ArxenError::Transport(TransportError::Shutdown { reason })) => {
                    info!("Listener closed: {}", reason);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to accept session: {}", e);
                }
            }
        }
    }
}

async fn handle_inbound(ctx: SessionContext, session: Session) {
    let remote = session.remote.clone();
    if remote == ctx.local {
        warn!("Rejecting inbound session announcing our own address");
        return;
    }

    let stop = ctx.peers.inbound_opened(&remote, &ctx.shutdown);
    info!("Accepted session from {}", remote);
    let _ = ctx.events.send(NodeEvent::PeerConnected(remote.clone()));

    let end = pump(&ctx, &remote, session, stop).await;
    log_session_end(&remote, &end);

    ctx.peers.inbound_closed(&remote);
    // The session that replaced this one keeps the peer connected
    if !matches!(end, SessionEnd::Superseded) {
        let _ = ctx.events.send(NodeEvent::PeerDisconnected(remote));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{create_event_channel, create_intake_channel};
    use crate::managers::PeerRegistry;
    use arxen_core::{ChannelConfig, Envelope, SessionReader, SessionWriter};
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout, Duration};
    use tokio_util::sync::CancellationToken;

    /// Hands out sessions pushed by the test
    struct ScriptedListener {
        local: NodeAddress,
        sessions: mpsc::UnboundedReceiver<Session>,
    }

    #[async_trait::async_trait]
    impl Listener for ScriptedListener {
        async fn accept(&mut self) -> ArxenResult<Session> {
            self.sessions.recv().await.ok_or_else(|| {
                TransportError::Shutdown {
                    reason: "script finished".to_string(),
                }
                .into()
            })
        }

        fn local_address(&self) -> &NodeAddress {
            &self.local
        }
    }

    /// Accepts every write and delivers none of them
    struct BlackHoleWriter;

    #[async_trait::async_trait]
    impl SessionWriter for BlackHoleWriter {
        async fn send(&mut self, _envelope: Envelope) -> ArxenResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> ArxenResult<()> {
            Ok(())
        }
    }

    struct ForwardingWriter(mpsc::UnboundedSender<Envelope>);

    #[async_trait::async_trait]
    impl SessionWriter for ForwardingWriter {
        async fn send(&mut self, envelope: Envelope) -> ArxenResult<()> {
            let _ = self.0.send(envelope);
            Ok(())
        }

        async fn close(&mut self) -> ArxenResult<()> {
            Ok(())
        }
    }

    /// A remote that never sends and never closes
    struct SilentReader;

    #[async_trait::async_trait]
    impl SessionReader for SilentReader {
        async fn receive(&mut self) -> ArxenResult<Option<Envelope>> {
            std::future::pending().await
        }
    }

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_new_inbound_session_takes_queue_from_half_open_one() {
        let config = ChannelConfig::testing();
        let (intake, _intake_rx) = create_intake_channel(&config);
        let (events, _events_rx) = create_event_channel(&config);
        let ctx = SessionContext {
            local: addr("a"),
            peers: Arc::new(PeerRegistry::new(8, Duration::from_millis(20))),
            intake,
            events,
            shutdown: CancellationToken::new(),
        };

        let (push, sessions) = mpsc::unbounded_channel();
        let listener = InboundListener {
            listener: Box::new(ScriptedListener {
                local: addr("a"),
                sessions,
            }),
            ctx: ctx.clone(),
        };
        let accept_loop = tokio::spawn(listener.run());

        // The first stream from b is half-open: writes vanish and nothing is ever read
        push.send(Session::new(
            addr("b"),
            Box::new(BlackHoleWriter),
            Box::new(SilentReader),
        ))
        .unwrap();
        wait_until(|| ctx.peers.is_draining(&addr("b")) == Some(true)).await;

        let lost = Envelope::from_parts(b"{}".to_vec(), vec![1]);
        ctx.peers.enqueue(&addr("b"), lost).await.unwrap();
        wait_until(|| ctx.peers.queued_len(&addr("b")) == Some(0)).await;

        // b reconnects; the new session must get the queue
        let (delivered_tx, mut delivered) = mpsc::unbounded_channel();
        push.send(Session::new(
            addr("b"),
            Box::new(ForwardingWriter(delivered_tx)),
            Box::new(SilentReader),
        ))
        .unwrap();

        let fresh = Envelope::from_parts(b"{}".to_vec(), vec![2]);
        ctx.peers.enqueue(&addr("b"), fresh.clone()).await.unwrap();

        let received = timeout(Duration::from_secs(2), delivered.recv())
            .await
            .expect("live session never received the envelope");
        assert_eq!(received, Some(fresh));
        assert_eq!(ctx.peers.is_connected(&addr("b")), Some(true));

        ctx.shutdown.cancel();
        accept_loop.await.unwrap().unwrap();
    }
}
