//! Friends list
//!
//! A friend is a named contact with a known node address. The CLI loads friends from
//! its configuration so chats can be created by name instead of by address.

use serde::{Deserialize, Serialize};

use crate::errors::{ArxenError, ArxenResult};
use crate::types::NodeAddress;

/// A named contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    /// Display name, unique within a [`FriendList`]
    pub name: String,
    /// Node address of the friend
    pub address: NodeAddress,
    /// Stable identifier, generated when absent
    #[serde(default = "generate_friend_id")]
    pub friend_id: String,
    /// Public key as published by the friend (informational only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

fn generate_friend_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Friend {
    pub fn new(name: impl Into<String>, address: NodeAddress) -> Self {
        Self {
            name: name.into(),
            address,
            friend_id: generate_friend_id(),
            public_key: None,
        }
    }
}

/// Ordered collection of friends with name lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FriendList {
    friends: Vec<Friend>,
}

impl FriendList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a friend; names must be unique (case-insensitive)
    pub fn add(&mut self, friend: Friend) -> ArxenResult<()> {
        if self.by_name(&friend.name).is_some() {
            return Err(ArxenError::config_error(format!(
                "duplicate friend name '{}'",
                friend.name
            )));
        }
        self.friends.push(friend);
        Ok(())
    }

    pub fn by_name(&self, name: &str) -> Option<&Friend> {
        self.friends
            .iter()
            .find(|friend| friend.name.eq_ignore_ascii_case(name))
    }

    pub fn by_address(&self, address: &NodeAddress) -> Option<&Friend> {
        self.friends.iter().find(|f| &f.address == address)
    }

    /// Resolve a friend name or a literal address
    pub fn resolve(&self, name_or_address: &str) -> ArxenResult<NodeAddress> {
        match self.by_name(name_or_address) {
            Some(friend) => Ok(friend.address.clone()),
            None => NodeAddress::parse(name_or_address),
        }
    }

    /// Display label for an address: the friend's name when known
    pub fn label(&self, address: &NodeAddress) -> String {
        self.by_address(address)
            .map(|friend| friend.name.clone())
            .unwrap_or_else(|| address.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Friend> {
        self.friends.iter()
    }

    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }
}
