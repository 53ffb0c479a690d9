//! Error types for the TCP transport

use arxen_core::{ArxenError, TransportError};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the TCP transport
#[derive(Error, Debug)]
pub enum TcpTransportError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("Connecting to {address} timed out after {timeout_ms}ms")]
    ConnectTimeout { address: String, timeout_ms: u64 },

    #[error("Session setup with {address} failed: {reason}")]
    Setup { address: String, reason: String },

    #[error("Frame encoding error: {0}")]
    Frame(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TcpTransportError> for ArxenError {
    fn from(err: TcpTransportError) -> Self {
        match err {
            TcpTransportError::Bind { source, .. } => TransportError::NetworkIo(source).into(),
            TcpTransportError::Connect { address, reason } => {
                TransportError::ConnectFailure { address, reason }.into()
            }
            TcpTransportError::ConnectTimeout {
                address,
                timeout_ms,
            } => TransportError::ConnectFailure {
                address,
                reason: format!("timed out after {}ms", timeout_ms),
            }
            .into(),
            TcpTransportError::Setup { address, reason } => {
                TransportError::SetupFailed { address, reason }.into()
            }
            TcpTransportError::Frame(e) => ArxenError::Serialization(e),
            TcpTransportError::Io(e) => TransportError::NetworkIo(e).into(),
        }
    }
}

pub type TcpResult<T> = Result<T, TcpTransportError>;
