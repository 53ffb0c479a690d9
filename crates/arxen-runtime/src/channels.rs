//! Runtime channel types
//!
//! Intake carries everything the gossip router must process (envelopes read from
//! sessions and locally posted messages). Node events fan out to any number of
//! observers over a broadcast channel.

use arxen_core::{ChannelConfig, Envelope, GossipMessage, NodeAddress, TextMessage};
use tokio::sync::{broadcast, mpsc};

use crate::managers::ChatInfo;

// ----------------------------------------------------------------------------
// Intake
// ----------------------------------------------------------------------------

/// Work item for the gossip router
#[derive(Debug, Clone)]
pub enum Intake {
    /// Raw envelope from a session or a self-addressed trigger
    Envelope(Envelope),
    /// Message written locally through the node API
    Posted(TextMessage),
}

pub type IntakeSender = mpsc::Sender<Intake>;
pub type IntakeReceiver = mpsc::Receiver<Intake>;

pub fn create_intake_channel(config: &ChannelConfig) -> (IntakeSender, IntakeReceiver) {
    mpsc::channel(config.intake_buffer_size)
}

// ----------------------------------------------------------------------------
// Effects
// ----------------------------------------------------------------------------

/// Side effect requested by a gossip handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Encode `message` with the local address as source and queue it for `to`
    Send {
        to: NodeAddress,
        message: GossipMessage,
    },
}

// ----------------------------------------------------------------------------
// Node Events
// ----------------------------------------------------------------------------

/// Observable change in node state
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A chat was created locally
    ChatCreated(ChatInfo),
    /// A replica was created from a remote advert
    ChatJoined(ChatInfo),
    /// A message not seen before was appended to a chat log
    MessageAppended(TextMessage),
    PeerConnected(NodeAddress),
    PeerDisconnected(NodeAddress),
}

pub type EventSender = broadcast::Sender<NodeEvent>;
pub type EventReceiver = broadcast::Receiver<NodeEvent>;

pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    broadcast::channel(config.event_buffer_size)
}
