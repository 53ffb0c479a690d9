//! Arxen Runtime Engine
//!
//! This crate contains the node runtime for the Arxen chat protocol, including:
//! - `NodeBuilder` / `NodeHandle`: start a node and drive it through its public API
//! - `GossipRouter`: the single consumer of inbound envelopes and posted messages
//! - `PeerRegistry` and `ChatRegistry`: the shared state behind the router and sessions
//! - `ConnectionSupervisor`, outbound sessions and the inbound listener
//!
//! `arxen-core` provides the protocol types and transport traits; this crate only
//! orchestrates them. Every task observes one shutdown token owned by the handle.

pub mod builder;
pub mod channels;
pub mod listener;
pub mod logic;
pub mod managers;
pub mod session;
pub mod supervisor;

pub use builder::{NodeBuilder, NodeHandle};
pub use channels::{
    create_event_channel, create_intake_channel, Effect, EventReceiver, EventSender, Intake,
    IntakeReceiver, IntakeSender, NodeEvent,
};
pub use listener::InboundListener;
pub use logic::{GossipHandlers, GossipRouter, RouterStats};
pub use managers::*;
pub use session::{OutboundSession, SessionContext, SessionEnd};
pub use supervisor::ConnectionSupervisor;

// Re-export core types for convenience
pub use arxen_core::{
    ArxenError, ArxenResult, ChatId, MessageId, NodeAddress, NodeConfig, TextMessage, Timestamp,
    Transport,
};
