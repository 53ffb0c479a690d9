//! TCP transport implementation for Arxen
//!
//! This crate provides a TCP transport that implements the `Transport` trait from
//! `arxen-core`, so nodes can run over a real network.
//!
//! ## Architecture
//!
//! - [`config`] - Transport configuration and settings
//! - [`error`] - Error types specific to the TCP transport
//! - [`protocol`] - Frame format and codec setup
//! - [`transport`] - Dialing, listening and the session halves
//!
//! Each connection is a `tokio-util` length-delimited stream of bincode frames. The
//! dialer's first frame announces the node address it listens on, and the accepting side
//! uses that address (not the ephemeral socket address) as the session's remote.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use arxen_core::NodeAddress;
//! use arxen_runtime::NodeBuilder;
//! use arxen_tcp::TcpTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let _node = NodeBuilder::new(NodeAddress::parse("127.0.0.1:7878")?)
//!     .with_transport(Arc::new(TcpTransport::new()))
//!     .start()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod protocol;
mod transport;

pub use config::TcpTransportConfig;
pub use error::{TcpResult, TcpTransportError};
pub use protocol::WireFrame;
pub use transport::{TcpListener, TcpTransport};

use std::net::{IpAddr, UdpSocket};

/// Address of the interface used for outbound traffic
///
/// "Connects" a UDP socket to a public address, which selects a route without sending
/// anything, and reports the socket's local IP.
pub fn detect_local_ip() -> TcpResult<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}
