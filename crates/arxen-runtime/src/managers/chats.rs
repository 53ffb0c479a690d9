//! Chat registry for the Arxen runtime
//!
//! Maps chat ids to chat replicas. Each chat keeps its participant set, its append-only
//! message log, and a broadcast sender for live subscribers. Creation and posting do not
//! send anything themselves; they hand work to the gossip router over the intake channel.

use arxen_core::{
    ArxenError, ArxenResult, ChatId, GossipMessage, MessageId, NodeAddress, TextMessage,
    Timestamp,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::channels::{Intake, IntakeSender};
use crate::managers::PeerRegistry;

// ----------------------------------------------------------------------------
// Chat Info
// ----------------------------------------------------------------------------

/// How a chat came to exist on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOrigin {
    /// Created here with a fresh id
    Owned,
    /// Built from a remote participant list
    Replica,
}

/// Snapshot of a chat's descriptive state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    pub name: String,
    pub participants: Vec<NodeAddress>,
    pub origin: ChatOrigin,
    pub message_count: usize,
    pub created_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Chat
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct Chat {
    id: ChatId,
    name: String,
    participants: Vec<NodeAddress>,
    origin: ChatOrigin,
    created_at: Timestamp,
    messages: Vec<TextMessage>,
    seen: HashSet<MessageId>,
    inbound_events: broadcast::Sender<TextMessage>,
}

impl Chat {
    fn new(
        id: ChatId,
        name: String,
        participants: Vec<NodeAddress>,
        origin: ChatOrigin,
        subscriber_capacity: usize,
    ) -> Self {
        let (inbound_events, _) = broadcast::channel(subscriber_capacity);
        Self {
            id,
            name,
            participants,
            origin,
            created_at: Timestamp::now(),
            messages: Vec::new(),
            seen: HashSet::new(),
            inbound_events,
        }
    }

    fn info(&self) -> ChatInfo {
        ChatInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            participants: self.participants.clone(),
            origin: self.origin,
            message_count: self.messages.len(),
            created_at: self.created_at,
        }
    }

    /// Merge participants, keeping first-seen order; returns the number added
    fn merge_participants(&mut self, participants: &[NodeAddress]) -> usize {
        let mut added = 0;
        for address in participants {
            if !self.participants.contains(address) {
                self.participants.push(address.clone());
                added += 1;
            }
        }
        added
    }
}

// ----------------------------------------------------------------------------
// Message Subscription
// ----------------------------------------------------------------------------

/// Live stream of messages appended to one chat
///
/// A subscriber that falls behind skips the messages it missed. Dropping the
/// subscription unsubscribes.
#[derive(Debug)]
pub struct MessageSubscription {
    chat_id: ChatId,
    rx: broadcast::Receiver<TextMessage>,
}

impl MessageSubscription {
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Next appended message, or `None` once the chat is gone
    pub async fn next(&mut self) -> Option<TextMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscriber to chat {} lagged, skipped {} messages",
                        self.chat_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Chat Registry
// ----------------------------------------------------------------------------

/// Registry of all chats known to this node
#[derive(Debug)]
pub struct ChatRegistry {
    local: NodeAddress,
    chats: RwLock<HashMap<ChatId, Chat>>,
    peers: Arc<PeerRegistry>,
    intake: IntakeSender,
    subscriber_capacity: usize,
}

impl ChatRegistry {
    pub fn new(
        local: NodeAddress,
        peers: Arc<PeerRegistry>,
        intake: IntakeSender,
        subscriber_capacity: usize,
    ) -> Self {
        Self {
            local,
            chats: RwLock::new(HashMap::new()),
            peers,
            intake,
            subscriber_capacity: subscriber_capacity.max(1),
        }
    }

    pub fn local_address(&self) -> &NodeAddress {
        &self.local
    }

    /// Create an owned chat named after its id and advertise it
    pub async fn create(&self, participants: &[NodeAddress]) -> ArxenResult<ChatInfo> {
        let id = ChatId::generate();
        let name = id.to_string();
        self.create_with_id(id, participants, name).await
    }

    /// Create an owned chat with an explicit display name and advertise it
    pub async fn create_named(
        &self,
        participants: &[NodeAddress],
        name: impl Into<String>,
    ) -> ArxenResult<ChatInfo> {
        self.create_with_id(ChatId::generate(), participants, name.into())
            .await
    }

    async fn create_with_id(
        &self,
        id: ChatId,
        participants: &[NodeAddress],
        name: String,
    ) -> ArxenResult<ChatInfo> {
        let participants = self.normalize(participants);
        self.track_participants(&participants);

        // Self-sourced trigger; the router fans adverts out to the other participants
        let chat_id = id.clone();
        let advert_request = GossipMessage::AdvertRequest { chat_id }.to_envelope(&self.local)?;

        let info = {
            let chat = Chat::new(
                id.clone(),
                name,
                participants,
                ChatOrigin::Owned,
                self.subscriber_capacity,
            );
            let info = chat.info();
            self.chats.write().await.insert(id.clone(), chat);
            info
        };

        if self.intake.send(Intake::Envelope(advert_request)).await.is_err() {
            // Nobody would ever advertise it
            self.chats.write().await.remove(&id);
            return Err(ArxenError::channel_error("router intake closed"));
        }

        info!(
            "Created chat {} with {} participants",
            info.id,
            info.participants.len()
        );
        Ok(info)
    }

    /// Create a replica from a remote participant list, or merge into an existing one
    ///
    /// Returns the chat info and whether the chat was newly created.
    pub async fn create_replica(
        &self,
        participants: &[NodeAddress],
        chat_id: ChatId,
        name: impl Into<String>,
    ) -> (ChatInfo, bool) {
        let participants = self.normalize(participants);
        self.track_participants(&participants);

        let mut chats = self.chats.write().await;
        if let Some(chat) = chats.get_mut(&chat_id) {
            let added = chat.merge_participants(&participants);
            if added > 0 {
                debug!("Merged {} new participants into chat {}", added, chat_id);
            }
            return (chat.info(), false);
        }

        let chat = Chat::new(
            chat_id.clone(),
            name.into(),
            participants,
            ChatOrigin::Replica,
            self.subscriber_capacity,
        );
        let info = chat.info();
        chats.insert(chat_id, chat);
        info!(
            "Joined chat {} with {} participants",
            info.id,
            info.participants.len()
        );
        (info, true)
    }

    /// Build a message for a chat and hand it to the router
    pub async fn post(
        &self,
        chat_id: &ChatId,
        author: NodeAddress,
        text: impl Into<String>,
    ) -> ArxenResult<TextMessage> {
        if !self.contains(chat_id).await {
            return Err(ArxenError::unknown_chat(chat_id));
        }

        let message = TextMessage::new(chat_id.clone(), author, text);
        self.intake
            .send(Intake::Posted(message.clone()))
            .await
            .map_err(|_| ArxenError::channel_error("router intake closed"))?;
        Ok(message)
    }

    /// Append a message to its chat's log and notify subscribers
    ///
    /// Returns `false` for a message id already in the log.
    pub async fn append(&self, chat_id: &ChatId, message: TextMessage) -> ArxenResult<bool> {
        let mut chats = self.chats.write().await;
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| ArxenError::unknown_chat(chat_id))?;

        if !chat.seen.insert(message.message_id.clone()) {
            debug!(
                "Message {} already in chat {}, skipping",
                message.message_id, chat_id
            );
            return Ok(false);
        }

        chat.messages.push(message.clone());
        // No receivers is fine
        let _ = chat.inbound_events.send(message);
        Ok(true)
    }

    pub async fn messages(&self, chat_id: &ChatId) -> ArxenResult<Vec<TextMessage>> {
        self.chats
            .read()
            .await
            .get(chat_id)
            .map(|chat| chat.messages.clone())
            .ok_or_else(|| ArxenError::unknown_chat(chat_id))
    }

    pub async fn participants(&self, chat_id: &ChatId) -> ArxenResult<Vec<NodeAddress>> {
        self.chats
            .read()
            .await
            .get(chat_id)
            .map(|chat| chat.participants.clone())
            .ok_or_else(|| ArxenError::unknown_chat(chat_id))
    }

    pub async fn info(&self, chat_id: &ChatId) -> ArxenResult<ChatInfo> {
        self.chats
            .read()
            .await
            .get(chat_id)
            .map(Chat::info)
            .ok_or_else(|| ArxenError::unknown_chat(chat_id))
    }

    /// All chats, oldest first
    pub async fn chats(&self) -> Vec<ChatInfo> {
        let mut infos: Vec<ChatInfo> = self.chats.read().await.values().map(Chat::info).collect();
        infos.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        infos
    }

    /// Chats created on this node
    pub async fn owned_chats(&self) -> Vec<ChatInfo> {
        self.chats()
            .await
            .into_iter()
            .filter(|info| info.origin == ChatOrigin::Owned)
            .collect()
    }

    pub async fn contains(&self, chat_id: &ChatId) -> bool {
        self.chats.read().await.contains_key(chat_id)
    }

    pub async fn subscribe(&self, chat_id: &ChatId) -> ArxenResult<MessageSubscription> {
        let chats = self.chats.read().await;
        let chat = chats
            .get(chat_id)
            .ok_or_else(|| ArxenError::unknown_chat(chat_id))?;
        Ok(MessageSubscription {
            chat_id: chat_id.clone(),
            rx: chat.inbound_events.subscribe(),
        })
    }

    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }

    /// De-duplicate in order and make sure the local address is present
    fn normalize(&self, participants: &[NodeAddress]) -> Vec<NodeAddress> {
        let mut normalized: Vec<NodeAddress> = Vec::with_capacity(participants.len() + 1);
        for address in participants {
            if !normalized.contains(address) {
                normalized.push(address.clone());
            }
        }
        if !normalized.contains(&self.local) {
            normalized.push(self.local.clone());
        }
        normalized
    }

    fn track_participants(&self, participants: &[NodeAddress]) {
        for address in participants.iter().filter(|a| **a != self.local) {
            self.peers.ensure_tracked(address);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::IntakeReceiver;
    use arxen_core::RegistryError;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    fn create_registry(local: &str) -> (ChatRegistry, Arc<PeerRegistry>, IntakeReceiver) {
        let peers = Arc::new(PeerRegistry::new(8, Duration::from_millis(10)));
        let (tx, rx) = mpsc::channel(16);
        let registry = ChatRegistry::new(addr(local), peers.clone(), tx, 16);
        (registry, peers, rx)
    }

    #[tokio::test]
    async fn test_create_fails_cleanly_without_router() {
        let (registry, _peers, intake) = create_registry("n1");
        drop(intake);

        let err = registry.create(&[addr("n2")]).await.unwrap_err();
        assert!(matches!(err, ArxenError::Channel { .. }));
        assert_eq!(registry.len().await, 0);
        assert!(registry.owned_chats().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_includes_self_and_tracks_peers() {
        let (registry, peers, mut intake) = create_registry("n1");

        let info = registry
            .create(&[addr("n2"), addr("n3"), addr("n2")])
            .await
            .unwrap();

        assert_eq!(info.participants, vec![addr("n2"), addr("n3"), addr("n1")]);
        assert_eq!(info.name, info.id.to_string());
        assert_eq!(info.origin, ChatOrigin::Owned);
        assert!(peers.is_tracked(&addr("n2")));
        assert!(peers.is_tracked(&addr("n3")));
        assert!(!peers.is_tracked(&addr("n1")));

        match intake.recv().await {
            Some(Intake::Envelope(envelope)) => {
                let (source, message) = GossipMessage::from_envelope(&envelope).unwrap();
                assert_eq!(source, addr("n1"));
                assert_eq!(message, GossipMessage::AdvertRequest { chat_id: info.id });
            }
            other => panic!("expected advert request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_ids_unique() {
        let (registry, _peers, _intake) = create_registry("n1");
        let a = registry.create(&[]).await.unwrap();
        let b = registry.create(&[]).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.participants, vec![addr("n1")]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let (registry, _peers, _intake) = create_registry("n1");
        let info = registry.create(&[addr("n2")]).await.unwrap();
        let mut subscription = registry.subscribe(&info.id).await.unwrap();

        let message = TextMessage::new(info.id.clone(), addr("n2"), "hello");
        assert!(registry.append(&info.id, message.clone()).await.unwrap());
        assert!(!registry.append(&info.id, message.clone()).await.unwrap());

        assert_eq!(
            registry.messages(&info.id).await.unwrap(),
            vec![message.clone()]
        );
        assert_eq!(subscription.next().await, Some(message));
        assert!(subscription.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_post_unknown_chat() {
        let (registry, _peers, _intake) = create_registry("n1");
        let err = registry
            .post(&ChatId::generate(), addr("n1"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ArxenError::Registry(RegistryError::UnknownChat { .. })
        ));
    }

    #[tokio::test]
    async fn test_post_goes_through_intake() {
        let (registry, _peers, mut intake) = create_registry("n1");
        let info = registry.create(&[addr("n2")]).await.unwrap();
        let _advert = intake.recv().await;

        let posted = registry.post(&info.id, addr("n1"), "hi").await.unwrap();

        match intake.recv().await {
            Some(Intake::Posted(message)) => assert_eq!(message, posted),
            other => panic!("expected posted message, got {:?}", other),
        }
        // Nothing is appended until the router processes it
        assert!(registry.messages(&info.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_replica_merges_participants() {
        let (registry, peers, mut intake) = create_registry("n2");
        let chat_id = ChatId::generate();

        let (info, created) = registry
            .create_replica(&[addr("n1"), addr("n2")], chat_id.clone(), "team")
            .await;
        assert!(created);
        assert_eq!(info.origin, ChatOrigin::Replica);
        assert_eq!(info.name, "team");

        let message = TextMessage::new(chat_id.clone(), addr("n1"), "kept");
        registry.append(&chat_id, message).await.unwrap();

        let (info, created) = registry
            .create_replica(&[addr("n1"), addr("n3")], chat_id.clone(), "ignored")
            .await;
        assert!(!created);
        assert_eq!(info.name, "team");
        assert_eq!(info.participants, vec![addr("n1"), addr("n2"), addr("n3")]);
        assert_eq!(info.message_count, 1);
        assert!(peers.is_tracked(&addr("n3")));

        // Replicas never advertise
        assert!(intake.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_create_fails_when_router_gone() {
        let (registry, _peers, intake) = create_registry("n1");
        drop(intake);

        let err = registry.create(&[addr("n2")]).await.unwrap_err();
        assert!(err.is_unrecoverable());
    }
}
