//! Node Builder Pattern
//!
//! Provides a fluent API for configuring and starting an Arxen node, and the handle used
//! to drive and stop it.

use arxen_core::{
    ArxenError, ArxenResult, ChatId, NodeAddress, NodeConfig, TextMessage, Transport,
};
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{timeout, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channels::{
    create_event_channel, create_intake_channel, EventReceiver, EventSender, NodeEvent,
};
use crate::listener::InboundListener;
use crate::logic::GossipRouter;
use crate::managers::{ChatInfo, ChatRegistry, MessageSubscription, PeerRegistry, PeerStatus};
use crate::session::SessionContext;
use crate::supervisor::ConnectionSupervisor;

// ----------------------------------------------------------------------------
// Node Builder
// ----------------------------------------------------------------------------

/// Builder for configuring and starting a node
pub struct NodeBuilder {
    address: NodeAddress,
    config: NodeConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl NodeBuilder {
    /// Create a new builder for the node at `address`
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            config: NodeConfig::default(),
            transport: None,
        }
    }

    /// Use a complete configuration
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Transport used for both listening and dialing
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the supervisor reconciliation period
    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.config.supervisor.reconcile_interval = interval;
        self
    }

    /// Enable periodic re-advertisement of owned chats
    pub fn readvertise_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.gossip.readvertise_interval = interval;
        self
    }

    /// Bind the listener and spawn the router, supervisor and accept loop
    pub async fn start(self) -> ArxenResult<NodeHandle> {
        self.config.validate().map_err(ArxenError::config_error)?;
        let transport = self
            .transport
            .ok_or_else(|| ArxenError::config_error("no transport configured"))?;

        info!(
            "Starting node {} over {} transport",
            self.address,
            transport.transport_type()
        );

        let shutdown = CancellationToken::new();
        let (intake_tx, intake_rx) = create_intake_channel(&self.config.channels);
        let (events_tx, _) = create_event_channel(&self.config.channels);

        let peers = Arc::new(PeerRegistry::new(
            self.config.channels.peer_queue_size,
            self.config.delivery.send_timeout,
        ));
        let chats = Arc::new(ChatRegistry::new(
            self.address.clone(),
            peers.clone(),
            intake_tx.clone(),
            self.config.channels.subscriber_buffer_size,
        ));

        let ctx = SessionContext {
            local: self.address.clone(),
            peers: peers.clone(),
            intake: intake_tx,
            events: events_tx.clone(),
            shutdown: shutdown.clone(),
        };

        // Bind before spawning anything so a bind failure leaves nothing running
        let listener = InboundListener::bind(transport.clone(), ctx.clone()).await?;

        let router = GossipRouter::new(
            self.address.clone(),
            chats.clone(),
            peers.clone(),
            intake_rx,
            events_tx.clone(),
            shutdown.clone(),
        )
        .with_readvertise_interval(self.config.gossip.readvertise_interval);
        let supervisor = ConnectionSupervisor::new(transport, ctx, &self.config.supervisor);

        let handles = vec![
            tokio::spawn(router.run()),
            tokio::spawn(supervisor.run()),
            tokio::spawn(listener.run()),
        ];

        Ok(NodeHandle {
            address: self.address,
            chats,
            peers,
            events: events_tx,
            shutdown,
            shutdown_timeout: self.config.delivery.shutdown_timeout,
            handles,
        })
    }
}

// ----------------------------------------------------------------------------
// Node Handle
// ----------------------------------------------------------------------------

/// Handle to a running node
pub struct NodeHandle {
    address: NodeAddress,
    chats: Arc<ChatRegistry>,
    peers: Arc<PeerRegistry>,
    events: EventSender,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    handles: Vec<JoinHandle<ArxenResult<()>>>,
}

impl NodeHandle {
    /// Address of this node
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Create a chat with the given peers plus this node and advertise it
    pub async fn create_chat(&self, participants: &[NodeAddress]) -> ArxenResult<ChatInfo> {
        let info = self.chats.create(participants).await?;
        let _ = self.events.send(NodeEvent::ChatCreated(info.clone()));
        Ok(info)
    }

    /// Like [`create_chat`](Self::create_chat) with an explicit display name
    pub async fn create_named_chat(
        &self,
        participants: &[NodeAddress],
        name: impl Into<String>,
    ) -> ArxenResult<ChatInfo> {
        let info = self.chats.create_named(participants, name).await?;
        let _ = self.events.send(NodeEvent::ChatCreated(info.clone()));
        Ok(info)
    }

    /// Post a message authored by this node
    pub async fn post_message(
        &self,
        chat_id: &ChatId,
        text: impl Into<String>,
    ) -> ArxenResult<TextMessage> {
        self.chats.post(chat_id, self.address.clone(), text).await
    }

    pub async fn messages(&self, chat_id: &ChatId) -> ArxenResult<Vec<TextMessage>> {
        self.chats.messages(chat_id).await
    }

    pub async fn participants(&self, chat_id: &ChatId) -> ArxenResult<Vec<NodeAddress>> {
        self.chats.participants(chat_id).await
    }

    /// Live stream of messages appended to a chat
    pub async fn subscribe_messages(&self, chat_id: &ChatId) -> ArxenResult<MessageSubscription> {
        self.chats.subscribe(chat_id).await
    }

    pub async fn chats(&self) -> Vec<ChatInfo> {
        self.chats.chats().await
    }

    pub async fn chat(&self, chat_id: &ChatId) -> ArxenResult<ChatInfo> {
        self.chats.info(chat_id).await
    }

    /// Status of every known peer
    pub fn peers(&self) -> Vec<PeerStatus> {
        self.peers.snapshot()
    }

    /// Stream of node events from now on
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Check if the node's tasks are still running
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && self.handles.iter().all(|h| !h.is_finished())
    }

    /// Shutdown the node gracefully
    ///
    /// Cancels every task, waits up to the configured grace period and aborts whatever
    /// is still running afterwards.
    pub async fn shutdown(&mut self) -> ArxenResult<()> {
        info!("Shutting down node {}", self.address);
        self.shutdown.cancel();

        let mut first_error = None;
        for mut handle in self.handles.drain(..) {
            match timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    warn!("Task ended with error: {}", e);
                    first_error.get_or_insert(e);
                }
                Ok(Err(e)) => warn!("Task panicked or was cancelled: {}", e),
                Err(_) => {
                    warn!(
                        "Task did not stop within {:?}, aborting",
                        self.shutdown_timeout
                    );
                    handle.abort();
                }
            }
        }

        info!("Node {} shut down", self.address);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use arxen_harness::MemoryNetwork;

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_builder_requires_transport() {
        let result = NodeBuilder::new(addr("a")).start().await;
        assert!(matches!(result, Err(ArxenError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let network = MemoryNetwork::new();
        let result = NodeBuilder::new(addr("a"))
            .with_transport(Arc::new(network.transport()))
            .reconcile_interval(Duration::ZERO)
            .start()
            .await;
        assert!(matches!(result, Err(ArxenError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_bind_failure_fails_start() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.transport());
        let mut first = NodeBuilder::new(addr("a"))
            .with_config(NodeConfig::testing())
            .with_transport(transport.clone())
            .start()
            .await
            .unwrap();

        let second = NodeBuilder::new(addr("a"))
            .with_config(NodeConfig::testing())
            .with_transport(transport)
            .start()
            .await;
        assert!(second.is_err());

        first.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let network = MemoryNetwork::new();
        let mut node = NodeBuilder::new(addr("a"))
            .with_config(NodeConfig::testing())
            .with_transport(Arc::new(network.transport()))
            .start()
            .await
            .unwrap();
        assert!(node.is_running());

        let chat = node.create_chat(&[]).await.unwrap();
        assert_eq!(chat.participants, vec![addr("a")]);

        node.shutdown().await.unwrap();
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn test_post_to_unknown_chat() {
        let network = MemoryNetwork::new();
        let mut node = NodeBuilder::new(addr("a"))
            .with_config(NodeConfig::testing())
            .with_transport(Arc::new(network.transport()))
            .start()
            .await
            .unwrap();

        let err = node.post_message(&ChatId::generate(), "hi").await.unwrap_err();
        assert!(matches!(
            err,
            ArxenError::Registry(arxen_core::RegistryError::UnknownChat { .. })
        ));
        node.shutdown().await.unwrap();
    }
}
