//! TCP transport configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the TCP transport
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TcpTransportConfig {
    /// Maximum time to establish the TCP connection
    pub connect_timeout: Duration,
    /// Maximum time for the dialer to announce its address after connecting
    pub setup_timeout: Duration,
    /// Largest accepted frame, in bytes
    pub max_frame_length: usize,
    /// Disable Nagle's algorithm on every stream
    pub nodelay: bool,
    /// Accepted sessions waiting for the node to pick them up
    pub accept_backlog: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(5),
            max_frame_length: 8 * 1024 * 1024, // 8 MiB
            nodelay: true,
            accept_backlog: 64,
        }
    }
}

impl TcpTransportConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set setup timeout
    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    /// Set maximum frame length
    pub fn with_max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = length;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn with_nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }
}
