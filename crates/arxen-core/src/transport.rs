//! Transport Trait Definitions
//!
//! Defines the interface between the runtime and a concrete byte transport. A transport
//! opens duplex sessions to a named address and accepts sessions on the local address.
//! Concrete implementations live in their own crates (`arxen-tcp`, `arxen-harness`).

use crate::{envelope::Envelope, types::NodeAddress, ArxenResult};

// ----------------------------------------------------------------------------
// Session Halves
// ----------------------------------------------------------------------------

/// Write side of a session
#[async_trait::async_trait]
pub trait SessionWriter: Send {
    /// Write one envelope to the remote node
    async fn send(&mut self, envelope: Envelope) -> ArxenResult<()>;

    /// Flush and close the write side
    async fn close(&mut self) -> ArxenResult<()>;
}

/// Read side of a session
#[async_trait::async_trait]
pub trait SessionReader: Send {
    /// Read the next envelope; `Ok(None)` once the remote has closed the session
    async fn receive(&mut self) -> ArxenResult<Option<Envelope>>;
}

/// An established duplex session with a remote node
///
/// The halves are separate so the runtime can read and write concurrently.
pub struct Session {
    /// Address the remote declared during connection setup
    pub remote: NodeAddress,
    pub writer: Box<dyn SessionWriter>,
    pub reader: Box<dyn SessionReader>,
}

impl Session {
    pub fn new(
        remote: NodeAddress,
        writer: Box<dyn SessionWriter>,
        reader: Box<dyn SessionReader>,
    ) -> Self {
        Self {
            remote,
            writer,
            reader,
        }
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// Source of incoming sessions bound to the local address
#[async_trait::async_trait]
pub trait Listener: Send {
    /// Wait for the next fully set up incoming session
    async fn accept(&mut self) -> ArxenResult<Session>;

    /// Address this listener is bound to
    fn local_address(&self) -> &NodeAddress;
}

/// Common interface for transports
///
/// ## Contract
///
/// - `connect` must announce `local` to the remote during setup, so the remote's
///   listener can key its reply queue by the declared source.
/// - `connect` fails with `ConnectFailure` when the remote is unreachable.
/// - `listen` binds immediately; bind errors are reported from `listen` itself.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a session to `remote`, announcing ourselves as `local`
    async fn connect(&self, local: &NodeAddress, remote: &NodeAddress) -> ArxenResult<Session>;

    /// Start accepting sessions on `local`
    async fn listen(&self, local: &NodeAddress) -> ArxenResult<Box<dyn Listener>>;

    /// Short transport identifier used in logs
    fn transport_type(&self) -> &'static str;
}
