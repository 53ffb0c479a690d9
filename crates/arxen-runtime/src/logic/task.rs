//! Gossip Router Task
//!
//! Contains the GossipRouter loop: decode each intake item, dispatch it to a handler,
//! execute the resulting effects against the peer registry and publish node events.

use arxen_core::{
    ArxenError, ArxenResult, EnvelopeError, GossipMessage, NodeAddress, RegistryError,
};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::{GossipHandlers, HandlerOutput};
use super::state::{GossipState, RouterStats};
use crate::channels::{Effect, EventSender, Intake, IntakeReceiver};
use crate::managers::{ChatRegistry, PeerRegistry};

// ----------------------------------------------------------------------------
// Gossip Router
// ----------------------------------------------------------------------------

/// Single consumer of the node's intake channel
pub struct GossipRouter {
    state: GossipState,
    peers: Arc<PeerRegistry>,
    intake: IntakeReceiver,
    events: EventSender,
    shutdown: CancellationToken,
    readvertise_interval: Option<Duration>,
}

impl GossipRouter {
    pub fn new(
        local: NodeAddress,
        chats: Arc<ChatRegistry>,
        peers: Arc<PeerRegistry>,
        intake: IntakeReceiver,
        events: EventSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state: GossipState::new(local, chats),
            peers,
            intake,
            events,
            shutdown,
            readvertise_interval: None,
        }
    }

    /// Periodically re-advertise owned chats
    pub fn with_readvertise_interval(mut self, interval: Option<Duration>) -> Self {
        self.readvertise_interval = interval;
        self
    }

    pub fn stats(&self) -> &RouterStats {
        &self.state.stats
    }

    /// Run until shutdown, intake closure, or an unrecoverable error
    pub async fn run(mut self) -> ArxenResult<()> {
        info!("Gossip router starting for {}", self.state.local);

        let mut readvertise = self.readvertise_interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        // The first tick is immediate and creation already advertised
        if let Some(ticker) = readvertise.as_mut() {
            ticker.tick().await;
        }

        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Gossip router received shutdown signal");
                    break Ok(());
                }

                item = self.intake.recv() => {
                    let Some(item) = item else {
                        info!("Router intake closed, shutting down");
                        break Ok(());
                    };
                    if let Err(e) = self.process(item).await {
                        if e.is_unrecoverable() {
                            error!("Unrecoverable error in gossip router, shutting down: {}", e);
                            break Err(e);
                        }
                        self.log_dropped(&e);
                    }
                }

                _ = async {
                    match readvertise.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Err(e) = self.readvertise().await {
                        warn!("Re-advertisement failed: {}", e);
                    }
                }
            }
        };

        let stats = &self.state.stats;
        info!(
            "Gossip router stopped: {} envelopes, {} posted, {} appended, {} dropped, {}/{} effects failed",
            stats.envelopes_processed,
            stats.messages_posted,
            stats.messages_appended,
            stats.envelopes_dropped,
            stats.effects_failed,
            stats.effects_executed + stats.effects_failed,
        );
        result
    }

    /// Decode, dispatch and apply one intake item
    pub async fn process(&mut self, item: Intake) -> ArxenResult<()> {
        let output = match item {
            Intake::Envelope(envelope) => {
                self.state.stats.envelopes_processed += 1;
                let (source, message) = GossipMessage::from_envelope(&envelope)?;
                debug!("Routing {} from {}", message.kind(), source);
                GossipHandlers::dispatch(&mut self.state, source, message).await?
            }
            Intake::Posted(message) => {
                GossipHandlers::handle_posted(&mut self.state, message).await?
            }
        };
        self.apply(output).await;
        Ok(())
    }

    async fn readvertise(&mut self) -> ArxenResult<()> {
        let output = GossipHandlers::readvertise(&mut self.state).await?;
        debug!("Re-advertising owned chats ({} adverts)", output.0.len());
        self.apply(output).await;
        Ok(())
    }

    async fn apply(&mut self, (effects, events): HandlerOutput) {
        for effect in effects {
            match self.execute(effect).await {
                Ok(()) => self.state.stats.effects_executed += 1,
                Err(e) => {
                    self.state.stats.effects_failed += 1;
                    warn!("Failed to execute effect: {}", e);
                }
            }
        }

        for event in events {
            // No observers is fine
            let _ = self.events.send(event);
        }
    }

    async fn execute(&self, effect: Effect) -> ArxenResult<()> {
        match effect {
            Effect::Send { to, message } => {
                if self.state.is_local(&to) {
                    debug!("Skipping self-addressed {}", message.kind());
                    return Ok(());
                }
                self.peers.ensure_tracked(&to);
                let envelope = message.to_envelope(&self.state.local)?;
                self.peers.enqueue(&to, envelope).await
            }
        }
    }

    fn log_dropped(&mut self, e: &ArxenError) {
        self.state.stats.envelopes_dropped += 1;
        match e {
            ArxenError::Registry(RegistryError::UnknownChat { chat_id }) => {
                warn!("Unknown chat {}, dropping envelope", chat_id);
            }
            ArxenError::Envelope(EnvelopeError::UnknownEnvelopeKind { kind }) => {
                warn!("Unknown envelope kind '{}', dropping envelope", kind);
            }
            ArxenError::Envelope(EnvelopeError::MalformedEnvelope { reason }) => {
                warn!("Malformed envelope ({}), dropping", reason);
            }
            _ => warn!("Error processing intake item: {}", e),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{create_event_channel, create_intake_channel, NodeEvent};
    use arxen_core::{ChannelConfig, ChatId, Envelope, TextMessage};

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    struct Fixture {
        router: GossipRouter,
        chats: Arc<ChatRegistry>,
        peers: Arc<PeerRegistry>,
        events: crate::channels::EventReceiver,
    }

    fn create_fixture(local: &str) -> Fixture {
        let config = ChannelConfig::testing();
        let (intake_tx, intake_rx) = create_intake_channel(&config);
        let (events_tx, events_rx) = create_event_channel(&config);
        let peers = Arc::new(PeerRegistry::new(8, Duration::from_millis(20)));
        let chats = Arc::new(ChatRegistry::new(addr(local), peers.clone(), intake_tx, 16));
        let router = GossipRouter::new(
            addr(local),
            chats.clone(),
            peers.clone(),
            intake_rx,
            events_tx,
            CancellationToken::new(),
        );
        Fixture {
            router,
            chats,
            peers,
            events: events_rx,
        }
    }

    /// Pull everything the registry pushed onto the intake and process it
    async fn drain(router: &mut GossipRouter) {
        while let Ok(item) = router.intake.try_recv() {
            let _ = router.process(item).await;
        }
    }

    #[tokio::test]
    async fn test_post_enqueues_one_envelope_per_remote_participant() {
        let mut f = create_fixture("a");
        let info = f.chats.create(&[addr("b"), addr("c")]).await.unwrap();
        drain(&mut f.router).await;
        // The creation advert went out to b and c
        assert_eq!(f.peers.queued_len(&addr("b")), Some(1));
        assert_eq!(f.peers.queued_len(&addr("c")), Some(1));

        f.chats.post(&info.id, addr("a"), "hi").await.unwrap();
        drain(&mut f.router).await;

        assert_eq!(f.peers.queued_len(&addr("b")), Some(2));
        assert_eq!(f.peers.queued_len(&addr("c")), Some(2));
        assert_eq!(f.peers.queued_len(&addr("a")), None);
        assert_eq!(f.chats.messages(&info.id).await.unwrap().len(), 1);

        let queue = f.peers.queue(&addr("b")).unwrap();
        let mut rx = queue.lock().await;
        let _advert = rx.recv().await.unwrap();
        let envelope = rx.recv().await.unwrap();
        let (source, message) = GossipMessage::from_envelope(&envelope).unwrap();
        assert_eq!(source, addr("a"));
        assert!(matches!(message, GossipMessage::ChatMessage(m) if m.text == "hi"));
    }

    #[tokio::test]
    async fn test_unknown_chat_dropped_without_stopping() {
        let mut f = create_fixture("b");
        let stray = TextMessage::new(ChatId::generate(), addr("a"), "lost");
        let envelope = GossipMessage::ChatMessage(stray)
            .to_envelope(&addr("a"))
            .unwrap();

        let err = f.router.process(Intake::Envelope(envelope)).await.unwrap_err();
        assert!(!err.is_unrecoverable());

        // The router keeps working afterwards
        let info = f.chats.create(&[addr("a")]).await.unwrap();
        drain(&mut f.router).await;
        assert_eq!(f.peers.queued_len(&addr("a")), Some(1));
        assert!(f.chats.contains(&info.id).await);
    }

    #[tokio::test]
    async fn test_malformed_envelope_dropped() {
        let mut f = create_fixture("b");
        let garbage = Envelope::from_parts(b"not json".to_vec(), Vec::new());
        let err = f.router.process(Intake::Envelope(garbage)).await.unwrap_err();
        assert!(matches!(err, ArxenError::Envelope(_)));
    }

    #[tokio::test]
    async fn test_remote_message_publishes_event() {
        let mut f = create_fixture("b");
        let chat_id = ChatId::generate();
        f.chats
            .create_replica(&[addr("a"), addr("b")], chat_id.clone(), "x")
            .await;

        let message = TextMessage::new(chat_id, addr("a"), "hello");
        let envelope = GossipMessage::ChatMessage(message.clone())
            .to_envelope(&addr("a"))
            .unwrap();
        f.router.process(Intake::Envelope(envelope)).await.unwrap();

        assert_eq!(
            f.events.recv().await.unwrap(),
            NodeEvent::MessageAppended(message)
        );
        assert_eq!(f.router.stats().envelopes_processed, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = create_fixture("a");
        let token = f.router.shutdown.clone();
        let handle = tokio::spawn(f.router.run());

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("router did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_readvertises_owned_chats() {
        let f = create_fixture("a");
        let token = f.router.shutdown.clone();
        let router = f
            .router
            .with_readvertise_interval(Some(Duration::from_millis(50)));
        let handle = tokio::spawn(router.run());

        let info = f.chats.create(&[addr("b")]).await.unwrap();

        // The creation advert plus at least two periodic ones
        let peers = f.peers.clone();
        tokio::time::timeout(Duration::from_secs(2), async move {
            while peers.queued_len(&addr("b")).unwrap_or(0) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("owned chat was not re-advertised");

        token.cancel();
        handle.await.unwrap().unwrap();

        let queue = f.peers.queue(&addr("b")).unwrap();
        let mut rx = queue.lock().await;
        for _ in 0..3 {
            let envelope = rx.recv().await.unwrap();
            let (source, message) = GossipMessage::from_envelope(&envelope).unwrap();
            assert_eq!(source, addr("a"));
            assert!(matches!(
                message,
                GossipMessage::Advert { ref chat_id, .. } if *chat_id == info.id
            ));
        }
    }
}
