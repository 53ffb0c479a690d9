//! Gossip Handlers
//!
//! One handler per envelope kind plus one for locally posted messages. Handlers read and
//! update router state and the chat registry, and describe outgoing traffic as
//! [`Effect`]s instead of sending it.

use arxen_core::{ArxenResult, ChatId, GossipMessage, NodeAddress, TextMessage};
use std::time::Instant;
use tracing::{debug, warn};

use super::state::GossipState;
use crate::channels::{Effect, NodeEvent};

pub type HandlerOutput = (Vec<Effect>, Vec<NodeEvent>);

/// Gossip protocol handlers for the router task
pub struct GossipHandlers;

impl GossipHandlers {
    /// Route a decoded message to its handler
    pub async fn dispatch(
        state: &mut GossipState,
        source: NodeAddress,
        message: GossipMessage,
    ) -> ArxenResult<HandlerOutput> {
        match message {
            GossipMessage::ChatMessage(text) => {
                Self::handle_chat_message(state, source, text).await
            }
            GossipMessage::ParticipantsRequest { chat_id } => {
                Self::handle_participants_request(state, source, chat_id).await
            }
            GossipMessage::ParticipantsResponse {
                chat_id,
                participants,
            } => Self::handle_participants_response(state, source, chat_id, participants).await,
            GossipMessage::AdvertRequest { chat_id } => {
                Self::handle_advert_request(state, source, chat_id).await
            }
            GossipMessage::Advert { chat_id, chat_name } => {
                Self::handle_advert(state, source, chat_id, chat_name).await
            }
        }
    }

    /// Append a relayed chat line to its replica
    pub async fn handle_chat_message(
        state: &mut GossipState,
        source: NodeAddress,
        message: TextMessage,
    ) -> ArxenResult<HandlerOutput> {
        let chat_id = message.chat_id.clone();
        let appended = state.chats.append(&chat_id, message.clone()).await?;
        if !appended {
            debug!("Duplicate message {} from {}", message.message_id, source);
            return Ok((Vec::new(), Vec::new()));
        }

        state.stats.messages_appended += 1;
        Ok((Vec::new(), vec![NodeEvent::MessageAppended(message)]))
    }

    /// Answer with the participant list of a chat we hold
    pub async fn handle_participants_request(
        state: &mut GossipState,
        source: NodeAddress,
        chat_id: ChatId,
    ) -> ArxenResult<HandlerOutput> {
        let participants = state.chats.participants(&chat_id).await?;
        debug!(
            "Sending {} participants of chat {} to {}",
            participants.len(),
            chat_id,
            source
        );

        let effects = vec![Effect::Send {
            to: source,
            message: GossipMessage::ParticipantsResponse {
                chat_id,
                participants,
            },
        }];
        Ok((effects, Vec::new()))
    }

    /// Build or extend a replica from a participant list
    pub async fn handle_participants_response(
        state: &mut GossipState,
        source: NodeAddress,
        chat_id: ChatId,
        participants: Vec<NodeAddress>,
    ) -> ArxenResult<HandlerOutput> {
        let name = state
            .take_advert_name(&chat_id)
            .unwrap_or_else(|| chat_id.to_string());

        let (info, created) = state
            .chats
            .create_replica(&participants, chat_id, name)
            .await;

        if !created {
            debug!(
                "Chat {} already replicated, merged list from {}",
                info.id, source
            );
            return Ok((Vec::new(), Vec::new()));
        }
        Ok((Vec::new(), vec![NodeEvent::ChatJoined(info)]))
    }

    /// Fan a chat advert out to every other participant
    ///
    /// Only self-sourced requests are honored.
    pub async fn handle_advert_request(
        state: &mut GossipState,
        source: NodeAddress,
        chat_id: ChatId,
    ) -> ArxenResult<HandlerOutput> {
        if !state.is_local(&source) {
            warn!(
                "Ignoring advert request for chat {} from remote {}",
                chat_id, source
            );
            return Ok((Vec::new(), Vec::new()));
        }

        let info = state.chats.info(&chat_id).await?;
        let effects = Self::advert_effects(state, &chat_id, &info.name, &info.participants);
        Ok((effects, Vec::new()))
    }

    /// React to a remote advert by asking the advertiser for participants
    pub async fn handle_advert(
        state: &mut GossipState,
        source: NodeAddress,
        chat_id: ChatId,
        chat_name: String,
    ) -> ArxenResult<HandlerOutput> {
        if state.chats.contains(&chat_id).await {
            debug!("Chat {} already replicated, ignoring advert", chat_id);
            return Ok((Vec::new(), Vec::new()));
        }

        state.remember_advert(chat_id.clone(), chat_name, Instant::now());
        let effects = vec![Effect::Send {
            to: source,
            message: GossipMessage::ParticipantsRequest { chat_id },
        }];
        Ok((effects, Vec::new()))
    }

    /// Deliver a locally posted message to self, then to every other participant
    pub async fn handle_posted(
        state: &mut GossipState,
        message: TextMessage,
    ) -> ArxenResult<HandlerOutput> {
        let chat_id = message.chat_id.clone();
        let appended = state.chats.append(&chat_id, message.clone()).await?;
        if !appended {
            return Ok((Vec::new(), Vec::new()));
        }
        state.stats.messages_posted += 1;

        let participants = state.chats.participants(&chat_id).await?;
        let effects = participants
            .into_iter()
            .filter(|address| !state.is_local(address))
            .map(|to| Effect::Send {
                to,
                message: GossipMessage::ChatMessage(message.clone()),
            })
            .collect();

        Ok((effects, vec![NodeEvent::MessageAppended(message)]))
    }

    /// Advertise every owned chat again
    pub async fn readvertise(state: &mut GossipState) -> ArxenResult<HandlerOutput> {
        let mut effects = Vec::new();
        for info in state.chats.owned_chats().await {
            effects.extend(Self::advert_effects(
                state,
                &info.id,
                &info.name,
                &info.participants,
            ));
        }
        Ok((effects, Vec::new()))
    }

    fn advert_effects(
        state: &GossipState,
        chat_id: &ChatId,
        chat_name: &str,
        participants: &[NodeAddress],
    ) -> Vec<Effect> {
        participants
            .iter()
            .filter(|address| !state.is_local(address))
            .map(|to| Effect::Send {
                to: to.clone(),
                message: GossipMessage::Advert {
                    chat_id: chat_id.clone(),
                    chat_name: chat_name.to_string(),
                },
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::{ChatOrigin, ChatRegistry, PeerRegistry};
    use arxen_core::{ArxenError, RegistryError};
    use std::sync::Arc;
    use tokio::{sync::mpsc, time::Duration};

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    fn create_state(local: &str) -> (GossipState, mpsc::Receiver<crate::channels::Intake>) {
        let peers = Arc::new(PeerRegistry::new(8, Duration::from_millis(10)));
        let (tx, rx) = mpsc::channel(16);
        let chats = Arc::new(ChatRegistry::new(addr(local), peers, tx, 16));
        (GossipState::new(addr(local), chats), rx)
    }

    fn sends_to(effects: &[Effect]) -> Vec<NodeAddress> {
        effects
            .iter()
            .map(|Effect::Send { to, .. }| to.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_advert_request_fans_out_to_others() {
        let (mut state, _rx) = create_state("n1");
        let info = state
            .chats
            .create_named(&[addr("n2"), addr("n3")], "team")
            .await
            .unwrap();

        let (effects, events) =
            GossipHandlers::handle_advert_request(&mut state, addr("n1"), info.id.clone())
                .await
                .unwrap();

        assert!(events.is_empty());
        assert_eq!(sends_to(&effects), vec![addr("n2"), addr("n3")]);
        assert!(effects.iter().all(|Effect::Send { message, .. }| matches!(
            message,
            GossipMessage::Advert { chat_name, .. } if chat_name == "team"
        )));
    }

    #[tokio::test]
    async fn test_remote_advert_request_ignored() {
        let (mut state, _rx) = create_state("n1");
        let info = state.chats.create(&[addr("n2")]).await.unwrap();

        let (effects, events) =
            GossipHandlers::handle_advert_request(&mut state, addr("n2"), info.id)
                .await
                .unwrap();
        assert!(effects.is_empty());
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_advert_then_response_builds_replica() {
        let (mut state, _rx) = create_state("n2");
        let chat_id = ChatId::generate();

        let (effects, _) = GossipHandlers::handle_advert(
            &mut state,
            addr("n1"),
            chat_id.clone(),
            "team".into(),
        )
        .await
        .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Send {
                to: addr("n1"),
                message: GossipMessage::ParticipantsRequest {
                    chat_id: chat_id.clone()
                },
            }]
        );
        assert_eq!(
            state.awaiting.get(&chat_id).map(|p| p.name.as_str()),
            Some("team")
        );

        let participants = vec![addr("n1"), addr("n2"), addr("n3")];
        let (effects, events) = GossipHandlers::handle_participants_response(
            &mut state,
            addr("n1"),
            chat_id.clone(),
            participants.clone(),
        )
        .await
        .unwrap();

        assert!(effects.is_empty());
        assert!(state.awaiting.is_empty());
        match events.as_slice() {
            [NodeEvent::ChatJoined(info)] => {
                assert_eq!(info.name, "team");
                assert_eq!(info.origin, ChatOrigin::Replica);
                assert_eq!(info.participants, participants);
            }
            other => panic!("expected ChatJoined, got {:?}", other),
        }

        // Replicated is terminal: a repeat advert is ignored
        let (effects, _) =
            GossipHandlers::handle_advert(&mut state, addr("n1"), chat_id, "team".into())
                .await
                .unwrap();
        assert!(effects.is_empty());
    }

    #[tokio::test]
    async fn test_participants_request_unknown_chat() {
        let (mut state, _rx) = create_state("n1");
        let err = GossipHandlers::handle_participants_request(
            &mut state,
            addr("n2"),
            ChatId::generate(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ArxenError::Registry(RegistryError::UnknownChat { .. })
        ));
    }

    #[tokio::test]
    async fn test_posted_fans_out_and_self_delivers() {
        let (mut state, _rx) = create_state("n1");
        let info = state
            .chats
            .create(&[addr("n2"), addr("n3")])
            .await
            .unwrap();
        let message = TextMessage::new(info.id.clone(), addr("n1"), "hi");

        let (effects, events) = GossipHandlers::handle_posted(&mut state, message.clone())
            .await
            .unwrap();

        assert_eq!(sends_to(&effects), vec![addr("n2"), addr("n3")]);
        assert_eq!(events, vec![NodeEvent::MessageAppended(message.clone())]);
        assert_eq!(state.chats.messages(&info.id).await.unwrap(), vec![message]);
    }

    #[tokio::test]
    async fn test_duplicate_chat_message_emits_nothing() {
        let (mut state, _rx) = create_state("n2");
        let chat_id = ChatId::generate();
        state
            .chats
            .create_replica(&[addr("n1")], chat_id.clone(), "x")
            .await;
        let message = TextMessage::new(chat_id, addr("n1"), "once");

        let (_, first) =
            GossipHandlers::handle_chat_message(&mut state, addr("n1"), message.clone())
                .await
                .unwrap();
        let (_, second) = GossipHandlers::handle_chat_message(&mut state, addr("n1"), message)
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(state.stats.messages_appended, 1);
    }

    #[tokio::test]
    async fn test_readvertise_only_owned_chats() {
        let (mut state, _rx) = create_state("n1");
        state.chats.create(&[addr("n2")]).await.unwrap();
        state
            .chats
            .create_replica(&[addr("n3")], ChatId::generate(), "remote")
            .await;

        let (effects, _) = GossipHandlers::readvertise(&mut state).await.unwrap();
        assert_eq!(sends_to(&effects), vec![addr("n2")]);
    }
}
