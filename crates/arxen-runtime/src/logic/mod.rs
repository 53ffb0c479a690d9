//! Gossip Router Module
//!
//! The router is the single consumer of every inbound envelope and every locally posted
//! message. It is split into focused components:
//! - `state`: router state (local address, chat registry handle, awaiting adverts) and statistics
//! - `handlers`: one handler per envelope kind, returning effects and node events
//! - `task`: the `GossipRouter` loop that decodes, dispatches and executes effects
//!
//! Processing is strictly sequential. Handlers never touch the network; the task turns
//! their `Effect::Send` values into envelopes on peer queues.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::GossipHandlers;
pub use state::{GossipState, PendingAdvert, RouterStats};
pub use task::GossipRouter;
