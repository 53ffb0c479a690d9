//! Error types for the Arxen protocol
//!
//! This module contains all error types used throughout the Arxen crates, including
//! envelope decoding errors, registry lookup errors, transport errors, and the main
//! ArxenError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while encoding or decoding wire envelopes
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },
    #[error("Unknown envelope kind: {kind}")]
    UnknownEnvelopeKind { kind: String },
}

/// Errors raised by the peer and chat registries
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown chat: {chat_id}")]
    UnknownChat { chat_id: String },
    #[error("Unknown peer: {address}")]
    UnknownPeer { address: String },
    #[error("Invalid node address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Specific transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {address} failed: {reason}")]
    ConnectFailure { address: String, reason: String },
    #[error("Session with {address} closed")]
    SessionClosed { address: String },
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
    #[error("Outbound queue for {address} is full (capacity: {capacity})")]
    QueueFull { address: String, capacity: usize },
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Connection setup with {address} failed: {reason}")]
    SetupFailed { address: String, reason: String },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error types for the Arxen protocol
#[derive(Debug, thiserror::Error)]
pub enum ArxenError {
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel communication error between runtime tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ArxenError {
    /// Create a malformed envelope error with a reason
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        ArxenError::Envelope(EnvelopeError::MalformedEnvelope {
            reason: reason.into(),
        })
    }

    /// Create an unknown envelope kind error
    pub fn unknown_kind<T: Into<String>>(kind: T) -> Self {
        ArxenError::Envelope(EnvelopeError::UnknownEnvelopeKind { kind: kind.into() })
    }

    /// Create an unknown chat error
    pub fn unknown_chat<T: ToString>(chat_id: T) -> Self {
        ArxenError::Registry(RegistryError::UnknownChat {
            chat_id: chat_id.to_string(),
        })
    }

    /// Create an unknown peer error
    pub fn unknown_peer<T: ToString>(address: T) -> Self {
        ArxenError::Registry(RegistryError::UnknownPeer {
            address: address.to_string(),
        })
    }

    /// Create a connect failure error
    pub fn connect_failure<A: ToString, R: Into<String>>(address: A, reason: R) -> Self {
        ArxenError::Transport(TransportError::ConnectFailure {
            address: address.to_string(),
            reason: reason.into(),
        })
    }

    /// Create a session closed error
    pub fn session_closed<A: ToString>(address: A) -> Self {
        ArxenError::Transport(TransportError::SessionClosed {
            address: address.to_string(),
        })
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        ArxenError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        ArxenError::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the next supervisor reconciliation may resolve this error on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArxenError::Transport(
                TransportError::ConnectFailure { .. }
                    | TransportError::SessionClosed { .. }
                    | TransportError::Timeout { .. }
                    | TransportError::NetworkIo(_)
                    | TransportError::SetupFailed { .. }
            )
        )
    }

    /// Whether this error must stop the task that observed it
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            ArxenError::Channel { .. } | ArxenError::Configuration { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ArxenError>;
pub type ArxenResult<T> = Result<T>;
