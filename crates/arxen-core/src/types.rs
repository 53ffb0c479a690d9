//! Core types for the Arxen protocol
//!
//! This module defines the fundamental identifiers used throughout the protocol,
//! using newtype patterns for validation and type safety.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::{ArxenError, RegistryError};

// ----------------------------------------------------------------------------
// Node Address
// ----------------------------------------------------------------------------

/// Network address identifying a node (usually `host:port`)
///
/// Addresses are compared as plain strings. A leading `tcp://` scheme is stripped on
/// parse so that `tcp://127.0.0.2:7878` and `127.0.0.2:7878` name the same node.
/// Commas and whitespace are rejected since participant lists travel comma-joined.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress(String);

impl NodeAddress {
    /// Scheme prefix accepted (and dropped) by the parser
    pub const TCP_SCHEME: &'static str = "tcp://";

    /// Parse and validate an address
    pub fn parse(raw: &str) -> Result<Self, ArxenError> {
        let trimmed = raw.trim();
        let value = trimmed.strip_prefix(Self::TCP_SCHEME).unwrap_or(trimmed);

        let invalid = |reason: &str| {
            ArxenError::Registry(RegistryError::InvalidAddress {
                address: raw.to_string(),
                reason: reason.to_string(),
            })
        };

        if value.is_empty() {
            return Err(invalid("address is empty"));
        }
        if value.contains(',') {
            return Err(invalid("address must not contain ','"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(invalid("address must not contain whitespace"));
        }

        Ok(Self(value.to_string()))
    }

    /// Get the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a comma-joined address list, skipping empty segments
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ArxenError> {
        raw.split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Join addresses with commas (inverse of [`NodeAddress::parse_list`])
    pub fn join_list(addresses: &[NodeAddress]) -> String {
        addresses
            .iter()
            .map(NodeAddress::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeAddress {
    type Err = ArxenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = ArxenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeAddress> for String {
    fn from(address: NodeAddress) -> Self {
        address.0
    }
}

impl Deref for NodeAddress {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Chat and Message Identifiers
// ----------------------------------------------------------------------------

/// Opaque unique identifier of a chat
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identifier received from a peer
    pub fn parse(raw: &str) -> Result<Self, ArxenError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ArxenError::malformed("chat id is empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChatId {
    type Err = ArxenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Globally unique identifier of a text message
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ArxenError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ArxenError::malformed("message id is empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
