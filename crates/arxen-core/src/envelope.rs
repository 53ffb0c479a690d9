//! Envelope Codec
//!
//! An [`Envelope`] is the unit of transmission: opaque payload bytes plus a JSON metadata
//! record. The metadata always names the sending node (`source`) and the envelope kind
//! (`type`); each kind adds its own required fields, modelled here as one explicit struct
//! per kind inside [`MetadataFields`].
//!
//! Decoding validates strictly. Unparseable metadata or a missing required field yields
//! `MalformedEnvelope`; a `type` value outside [`EnvelopeKind`] yields `UnknownEnvelopeKind`.

use core::fmt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ArxenError, ArxenResult};
use crate::types::{ChatId, MessageId, NodeAddress, Timestamp};

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// Wire envelope: payload bytes plus serialized metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// JSON-encoded metadata record
    pub metadata: Vec<u8>,
    /// Kind-specific payload
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build an envelope from already-encoded parts
    pub fn from_parts(metadata: Vec<u8>, payload: Vec<u8>) -> Self {
        Self { metadata, payload }
    }

    /// Encode metadata fields and payload into an envelope
    pub fn encode(
        source: &NodeAddress,
        fields: &MetadataFields,
        payload: Vec<u8>,
    ) -> ArxenResult<Self> {
        encode(source, fields, payload)
    }

    /// Decode and validate this envelope
    pub fn decode(&self) -> ArxenResult<DecodedEnvelope> {
        decode(self)
    }
}

// ----------------------------------------------------------------------------
// Envelope Kind
// ----------------------------------------------------------------------------

/// Closed set of envelope kinds understood by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvelopeKind {
    ChatMessage,
    ChatParticipantsRequest,
    ChatParticipantsResponse,
    ChatAdvertRequest,
    ChatAdvert,
}

impl EnvelopeKind {
    /// Every recognized kind
    pub const ALL: [EnvelopeKind; 5] = [
        EnvelopeKind::ChatMessage,
        EnvelopeKind::ChatParticipantsRequest,
        EnvelopeKind::ChatParticipantsResponse,
        EnvelopeKind::ChatAdvertRequest,
        EnvelopeKind::ChatAdvert,
    ];

    /// Wire name carried in the `type` metadata field
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::ChatMessage => "CHAT_MESSAGE",
            EnvelopeKind::ChatParticipantsRequest => "CHAT_PARTICIPANTS_REQUEST",
            EnvelopeKind::ChatParticipantsResponse => "CHAT_PARTICIPANTS_RESPONSE",
            EnvelopeKind::ChatAdvertRequest => "CHAT_ADVERT_REQUEST",
            EnvelopeKind::ChatAdvert => "CHAT_ADVERT",
        }
    }

    /// Resolve a wire name, `None` for anything unrecognized
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Per-Kind Metadata Records
// ----------------------------------------------------------------------------

/// Metadata carried by CHAT_MESSAGE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageFields {
    pub chat_id: ChatId,
    pub author: NodeAddress,
    pub timestamp: Timestamp,
    pub message_id: MessageId,
}

/// Metadata carried by CHAT_PARTICIPANTS_RESPONSE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantsResponseFields {
    pub chat_id: ChatId,
}

/// Metadata carried by CHAT_ADVERT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertFields {
    pub chat_name: String,
}

/// Kind-specific metadata; the variant determines the envelope kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFields {
    ChatMessage(ChatMessageFields),
    ChatParticipantsRequest,
    ChatParticipantsResponse(ParticipantsResponseFields),
    ChatAdvertRequest,
    ChatAdvert(AdvertFields),
}

impl MetadataFields {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            MetadataFields::ChatMessage(_) => EnvelopeKind::ChatMessage,
            MetadataFields::ChatParticipantsRequest => EnvelopeKind::ChatParticipantsRequest,
            MetadataFields::ChatParticipantsResponse(_) => EnvelopeKind::ChatParticipantsResponse,
            MetadataFields::ChatAdvertRequest => EnvelopeKind::ChatAdvertRequest,
            MetadataFields::ChatAdvert(_) => EnvelopeKind::ChatAdvert,
        }
    }
}

/// Result of a successful decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEnvelope {
    pub source: NodeAddress,
    pub fields: MetadataFields,
    pub payload: Vec<u8>,
}

impl DecodedEnvelope {
    pub fn kind(&self) -> EnvelopeKind {
        self.fields.kind()
    }
}

// ----------------------------------------------------------------------------
// Wire Representation
// ----------------------------------------------------------------------------

/// Flat JSON view of the metadata; every field optional so decode can report
/// exactly which required field is missing
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_name: Option<String>,
}

fn required<T>(value: Option<T>, field: &str, kind: EnvelopeKind) -> ArxenResult<T> {
    value.ok_or_else(|| {
        ArxenError::malformed(format!("missing required field '{}' for {}", field, kind))
    })
}

fn address_field(raw: String, field: &str) -> ArxenResult<NodeAddress> {
    NodeAddress::parse(&raw)
        .map_err(|e| ArxenError::malformed(format!("invalid '{}' address: {}", field, e)))
}

// ----------------------------------------------------------------------------
// Codec Functions
// ----------------------------------------------------------------------------

/// Encode metadata and payload into a wire envelope
pub fn encode(
    source: &NodeAddress,
    fields: &MetadataFields,
    payload: Vec<u8>,
) -> ArxenResult<Envelope> {
    let mut wire = WireMetadata {
        source: Some(source.to_string()),
        kind: Some(fields.kind().as_str().to_string()),
        ..Default::default()
    };

    match fields {
        MetadataFields::ChatMessage(f) => {
            wire.chat_id = Some(f.chat_id.to_string());
            wire.author = Some(f.author.to_string());
            wire.timestamp = Some(f.timestamp.as_millis());
            wire.message_id = Some(f.message_id.to_string());
        }
        MetadataFields::ChatParticipantsResponse(f) => {
            wire.chat_id = Some(f.chat_id.to_string());
        }
        MetadataFields::ChatAdvert(f) => {
            wire.chat_name = Some(f.chat_name.clone());
        }
        MetadataFields::ChatParticipantsRequest | MetadataFields::ChatAdvertRequest => {}
    }

    let metadata = serde_json::to_vec(&wire)?;
    Ok(Envelope { metadata, payload })
}

/// Decode and validate a wire envelope
pub fn decode(envelope: &Envelope) -> ArxenResult<DecodedEnvelope> {
    let wire: WireMetadata = serde_json::from_slice(&envelope.metadata).map_err(|e| {
        debug!("Envelope metadata failed to parse: {}", e);
        ArxenError::malformed(format!("metadata is not a valid record: {}", e))
    })?;

    let kind_name = wire
        .kind
        .ok_or_else(|| ArxenError::malformed("missing required field 'type'"))?;
    let Some(kind) = EnvelopeKind::from_wire(&kind_name) else {
        debug!(
            "Envelope from {:?} has unknown kind '{}'",
            wire.source, kind_name
        );
        return Err(ArxenError::unknown_kind(kind_name));
    };

    let source = address_field(required(wire.source, "source", kind)?, "source")?;

    let fields = match kind {
        EnvelopeKind::ChatMessage => MetadataFields::ChatMessage(ChatMessageFields {
            chat_id: ChatId::parse(&required(wire.chat_id, "chatId", kind)?)?,
            author: address_field(required(wire.author, "author", kind)?, "author")?,
            timestamp: Timestamp::new(required(wire.timestamp, "timestamp", kind)?),
            message_id: MessageId::parse(&required(wire.message_id, "messageId", kind)?)?,
        }),
        EnvelopeKind::ChatParticipantsRequest => MetadataFields::ChatParticipantsRequest,
        EnvelopeKind::ChatParticipantsResponse => {
            MetadataFields::ChatParticipantsResponse(ParticipantsResponseFields {
                chat_id: ChatId::parse(&required(wire.chat_id, "chatId", kind)?)?,
            })
        }
        EnvelopeKind::ChatAdvertRequest => MetadataFields::ChatAdvertRequest,
        EnvelopeKind::ChatAdvert => MetadataFields::ChatAdvert(AdvertFields {
            chat_name: required(wire.chat_name, "chatName", kind)?,
        }),
    };

    Ok(DecodedEnvelope {
        source,
        fields,
        payload: envelope.payload.clone(),
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
