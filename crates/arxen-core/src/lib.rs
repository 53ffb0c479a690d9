//! Arxen Core Protocol Implementation
//!
//! This crate provides the foundational types for the Arxen peer-to-peer chat protocol:
//! node addresses and identifiers, the envelope codec and its typed gossip messages,
//! the transport traits implemented by concrete transports, and the shared configuration.
//!
//! Runtime orchestration (registries, router, sessions) lives in `arxen-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod envelope;
pub mod errors;
pub mod friends;
pub mod message;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ChannelConfig, DeliveryConfig, GossipConfig, NodeConfig, SupervisorConfig};
pub use envelope::{
    AdvertFields, ChatMessageFields, DecodedEnvelope, Envelope, EnvelopeKind, MetadataFields,
    ParticipantsResponseFields,
};
pub use errors::{
    ArxenError, ArxenResult, EnvelopeError, RegistryError, Result, TransportError,
};
pub use friends::{Friend, FriendList};
pub use message::{GossipMessage, TextMessage};
pub use transport::{Listener, Session, SessionReader, SessionWriter, Transport};
pub use types::{ChatId, MessageId, NodeAddress, Timestamp};
