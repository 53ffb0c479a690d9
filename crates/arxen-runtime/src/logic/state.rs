//! Gossip Router State
//!
//! Contains the router's view of the node and its processing statistics.

use arxen_core::{ChatId, NodeAddress};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

use crate::managers::ChatRegistry;

// ----------------------------------------------------------------------------
// Gossip State
// ----------------------------------------------------------------------------

/// State owned by the gossip router
#[derive(Debug)]
pub struct GossipState {
    /// Address of this node, used as the source of every outgoing envelope
    pub local: NodeAddress,
    /// Shared chat registry
    pub chats: Arc<ChatRegistry>,
    /// Chats advertised to us whose participant list has not arrived yet
    pub awaiting: HashMap<ChatId, PendingAdvert>,
    pub stats: RouterStats,
}

impl GossipState {
    pub fn new(local: NodeAddress, chats: Arc<ChatRegistry>) -> Self {
        Self {
            local,
            chats,
            awaiting: HashMap::new(),
            stats: RouterStats::default(),
        }
    }

    pub fn is_local(&self, address: &NodeAddress) -> bool {
        *address == self.local
    }

    /// Remember an advertised chat until its participant list arrives
    ///
    /// Expired entries are pruned first; at capacity the oldest entry gives way.
    pub fn remember_advert(&mut self, chat_id: ChatId, name: String, now: Instant) {
        self.prune_awaiting(now);
        if self.awaiting.len() >= MAX_AWAITING && !self.awaiting.contains_key(&chat_id) {
            let oldest = self
                .awaiting
                .iter()
                .min_by_key(|(_, pending)| pending.since)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!("Too many pending adverts, forgetting chat {}", oldest);
                self.awaiting.remove(&oldest);
            }
        }
        self.awaiting.insert(chat_id, PendingAdvert { name, since: now });
    }

    /// Take the advertised name of a pending chat
    pub fn take_advert_name(&mut self, chat_id: &ChatId) -> Option<String> {
        self.awaiting.remove(chat_id).map(|pending| pending.name)
    }

    /// Drop adverts older than `AWAITING_TTL`, returning how many were dropped
    pub fn prune_awaiting(&mut self, now: Instant) -> usize {
        let before = self.awaiting.len();
        self.awaiting
            .retain(|_, p| now.saturating_duration_since(p.since) < AWAITING_TTL);
        before - self.awaiting.len()
    }
}

/// How long an advert waits for its participant list
pub const AWAITING_TTL: Duration = Duration::from_secs(300);

/// Upper bound on adverts waiting for participant lists
pub const MAX_AWAITING: usize = 256;

/// An advert whose participant list was requested but has not arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAdvert {
    pub name: String,
    pub since: Instant,
}

/// Router statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub envelopes_processed: u64,
    pub messages_posted: u64,
    pub messages_appended: u64,
    pub envelopes_dropped: u64,
    pub effects_executed: u64,
    pub effects_failed: u64,
}
