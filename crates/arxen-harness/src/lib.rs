//! Arxen Harness - in-memory network for testing
//!
//! Provides [`MemoryNetwork`], a process-local stand-in for a real network. Every node
//! under test gets a [`MemoryTransport`] handle onto the same network; sessions between
//! them are pairs of bounded channels. The network supports fault injection
//! ([`MemoryNetwork::isolate`] / [`MemoryNetwork::restore`]) and keeps delivery counters.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let network = MemoryNetwork::new();
//! let node = NodeBuilder::new(address)
//!     .with_transport(Arc::new(network.transport()))
//!     .start()
//!     .await?;
//! ```

pub mod memory_transport;

pub use memory_transport::{MemoryNetwork, MemoryNetworkConfig, MemoryNetworkStats, MemoryTransport};
