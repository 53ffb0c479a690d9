//! Shared registries for the Arxen runtime
//!
//! The peer registry and the chat registry are the only state shared between tasks.
//! Both expose synchronized operations only; neither hands out its underlying map.

pub mod chats;
pub mod peers;

pub use chats::{ChatInfo, ChatOrigin, ChatRegistry, MessageSubscription};
pub use peers::{PeerQueue, PeerRegistry, PeerStats, PeerStatus};
