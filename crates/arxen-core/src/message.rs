//! Typed gossip messages
//!
//! [`GossipMessage`] is the protocol-level view of an envelope: metadata fields and the
//! kind-specific payload (message text, chat id, or comma-joined participant list) are
//! parsed into one variant per kind.

use serde::{Deserialize, Serialize};

use crate::envelope::{
    AdvertFields, ChatMessageFields, DecodedEnvelope, Envelope, EnvelopeKind, MetadataFields,
    ParticipantsResponseFields,
};
use crate::errors::{ArxenError, ArxenResult};
use crate::types::{ChatId, MessageId, NodeAddress, Timestamp};

// ----------------------------------------------------------------------------
// Text Message
// ----------------------------------------------------------------------------

/// A chat message as stored in a chat log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub author: NodeAddress,
    pub timestamp: Timestamp,
    pub text: String,
}

impl TextMessage {
    /// Create a message with a fresh id stamped with the current time
    pub fn new(chat_id: ChatId, author: NodeAddress, text: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::generate(),
            chat_id,
            author,
            timestamp: Timestamp::now(),
            text: text.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Gossip Message
// ----------------------------------------------------------------------------

/// Protocol message carried by one envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipMessage {
    /// A chat line to append to a replica
    ChatMessage(TextMessage),
    /// Ask the receiver for the participant list of a chat
    ParticipantsRequest { chat_id: ChatId },
    /// Full participant list of a chat
    ParticipantsResponse {
        chat_id: ChatId,
        participants: Vec<NodeAddress>,
    },
    /// Self-addressed trigger to advertise a chat to its participants
    AdvertRequest { chat_id: ChatId },
    /// Announce a chat to one of its participants
    Advert { chat_id: ChatId, chat_name: String },
}

impl GossipMessage {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            GossipMessage::ChatMessage(_) => EnvelopeKind::ChatMessage,
            GossipMessage::ParticipantsRequest { .. } => EnvelopeKind::ChatParticipantsRequest,
            GossipMessage::ParticipantsResponse { .. } => EnvelopeKind::ChatParticipantsResponse,
            GossipMessage::AdvertRequest { .. } => EnvelopeKind::ChatAdvertRequest,
            GossipMessage::Advert { .. } => EnvelopeKind::ChatAdvert,
        }
    }

    /// Chat this message refers to
    pub fn chat_id(&self) -> &ChatId {
        match self {
            GossipMessage::ChatMessage(message) => &message.chat_id,
            GossipMessage::ParticipantsRequest { chat_id }
            | GossipMessage::ParticipantsResponse { chat_id, .. }
            | GossipMessage::AdvertRequest { chat_id }
            | GossipMessage::Advert { chat_id, .. } => chat_id,
        }
    }

    /// Encode into a wire envelope sent on behalf of `source`
    pub fn to_envelope(&self, source: &NodeAddress) -> ArxenResult<Envelope> {
        let (fields, payload) = match self {
            GossipMessage::ChatMessage(message) => (
                MetadataFields::ChatMessage(ChatMessageFields {
                    chat_id: message.chat_id.clone(),
                    author: message.author.clone(),
                    timestamp: message.timestamp,
                    message_id: message.message_id.clone(),
                }),
                message.text.as_bytes().to_vec(),
            ),
            GossipMessage::ParticipantsRequest { chat_id } => (
                MetadataFields::ChatParticipantsRequest,
                chat_id.as_str().as_bytes().to_vec(),
            ),
            GossipMessage::ParticipantsResponse {
                chat_id,
                participants,
            } => (
                MetadataFields::ChatParticipantsResponse(ParticipantsResponseFields {
                    chat_id: chat_id.clone(),
                }),
                NodeAddress::join_list(participants).into_bytes(),
            ),
            GossipMessage::AdvertRequest { chat_id } => (
                MetadataFields::ChatAdvertRequest,
                chat_id.as_str().as_bytes().to_vec(),
            ),
            GossipMessage::Advert { chat_id, chat_name } => (
                MetadataFields::ChatAdvert(AdvertFields {
                    chat_name: chat_name.clone(),
                }),
                chat_id.as_str().as_bytes().to_vec(),
            ),
        };

        Envelope::encode(source, &fields, payload)
    }

    /// Decode an envelope into its source address and typed message
    pub fn from_envelope(envelope: &Envelope) -> ArxenResult<(NodeAddress, Self)> {
        Self::from_decoded(envelope.decode()?)
    }

    /// Interpret the payload of an already-decoded envelope
    pub fn from_decoded(decoded: DecodedEnvelope) -> ArxenResult<(NodeAddress, Self)> {
        let DecodedEnvelope {
            source,
            fields,
            payload,
        } = decoded;
        let kind = fields.kind();
        let text = String::from_utf8(payload).map_err(|_| {
            ArxenError::malformed(format!("{} payload is not valid UTF-8", kind))
        })?;

        let message = match fields {
            MetadataFields::ChatMessage(f) => GossipMessage::ChatMessage(TextMessage {
                message_id: f.message_id,
                chat_id: f.chat_id,
                author: f.author,
                timestamp: f.timestamp,
                text,
            }),
            MetadataFields::ChatParticipantsRequest => GossipMessage::ParticipantsRequest {
                chat_id: ChatId::parse(&text)?,
            },
            MetadataFields::ChatParticipantsResponse(f) => {
                let participants = NodeAddress::parse_list(&text).map_err(|e| {
                    ArxenError::malformed(format!("invalid participant list: {}", e))
                })?;
                GossipMessage::ParticipantsResponse {
                    chat_id: f.chat_id,
                    participants,
                }
            }
            MetadataFields::ChatAdvertRequest => GossipMessage::AdvertRequest {
                chat_id: ChatId::parse(&text)?,
            },
            MetadataFields::ChatAdvert(f) => GossipMessage::Advert {
                chat_id: ChatId::parse(&text)?,
                chat_name: f.chat_name,
            },
        };

        Ok((source, message))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
