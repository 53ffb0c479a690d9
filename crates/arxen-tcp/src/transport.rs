//! Main TCP transport implementation

use arxen_core::{
    ArxenError, ArxenResult, Envelope, EnvelopeError, Listener, NodeAddress, Session,
    SessionReader, SessionWriter, Transport, TransportError,
};
use bytes::Bytes;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::net::SocketAddr;
use tokio::{net::TcpStream, sync::mpsc, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TcpTransportConfig;
use crate::error::{TcpResult, TcpTransportError};
use crate::protocol::{framed, FramedStream, WireFrame};

// ----------------------------------------------------------------------------
// TCP Transport
// ----------------------------------------------------------------------------

/// Transport carrying envelopes over length-delimited TCP streams
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TcpTransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    async fn dial(&self, local: &NodeAddress, remote: &NodeAddress) -> TcpResult<Session> {
        let connect = TcpStream::connect(remote.as_str());
        let stream = timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| TcpTransportError::ConnectTimeout {
                address: remote.to_string(),
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| TcpTransportError::Connect {
                address: remote.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(self.config.nodelay)?;

        let mut framed = framed(stream, self.config.max_frame_length);
        let setup = WireFrame::Setup {
            source: local.clone(),
        };
        framed
            .send(setup.encode()?)
            .await
            .map_err(|e| TcpTransportError::Setup {
                address: remote.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Dialed {} as {}", remote, local);
        Ok(session(remote.clone(), framed))
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, local: &NodeAddress, remote: &NodeAddress) -> ArxenResult<Session> {
        Ok(self.dial(local, remote).await?)
    }

    async fn listen(&self, local: &NodeAddress) -> ArxenResult<Box<dyn Listener>> {
        let listener = tokio::net::TcpListener::bind(local.as_str())
            .await
            .map_err(|source| TcpTransportError::Bind {
                address: local.to_string(),
                source,
            })?;
        let bound = listener.local_addr().map_err(TcpTransportError::from)?;
        info!("TCP listener bound on {}", bound);

        let (tx, rx) = mpsc::channel(self.config.accept_backlog.max(1));
        let shutdown = CancellationToken::new();
        tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            tx,
            shutdown.clone(),
        ));

        Ok(Box::new(TcpListener {
            local: local.clone(),
            bound,
            rx,
            shutdown,
        }))
    }

    fn transport_type(&self) -> &'static str {
        "tcp"
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

/// Accepted sessions, announced by their dialers' setup frames
pub struct TcpListener {
    local: NodeAddress,
    bound: SocketAddr,
    rx: mpsc::Receiver<Session>,
    shutdown: CancellationToken,
}

impl TcpListener {
    /// Socket address actually bound (differs from the node address for port 0)
    pub fn bound_address(&self) -> SocketAddr {
        self.bound
    }
}

#[async_trait::async_trait]
impl Listener for TcpListener {
    async fn accept(&mut self) -> ArxenResult<Session> {
        self.rx.recv().await.ok_or_else(|| {
            TransportError::Shutdown {
                reason: format!("TCP listener on {} stopped", self.local),
            }
            .into()
        })
    }

    fn local_address(&self) -> &NodeAddress {
        &self.local
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    config: TcpTransportConfig,
    sessions: mpsc::Sender<Session>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let config = config.clone();
                let sessions = sessions.clone();
                tokio::spawn(async move {
                    match accept_setup(stream, peer, &config).await {
                        Ok(session) => {
                            if sessions.send(session).await.is_err() {
                                debug!("Listener gone, dropping session from {}", peer);
                            }
                        }
                        Err(e) => warn!("Rejected connection from {}: {}", peer, e),
                    }
                });
            }
            Err(e) => warn!("Failed to accept TCP connection: {}", e),
        }
    }
    debug!("TCP accept loop stopped");
}

/// Read the dialer's setup frame and build the accepted session
async fn accept_setup(
    stream: TcpStream,
    peer: SocketAddr,
    config: &TcpTransportConfig,
) -> TcpResult<Session> {
    stream.set_nodelay(config.nodelay)?;
    let mut framed = framed(stream, config.max_frame_length);

    let setup_failed = |reason: String| TcpTransportError::Setup {
        address: peer.to_string(),
        reason,
    };

    let frame = timeout(config.setup_timeout, framed.next())
        .await
        .map_err(|_| setup_failed("timed out waiting for setup frame".into()))?
        .ok_or_else(|| setup_failed("closed before setup".into()))??;

    match WireFrame::decode(&frame)? {
        WireFrame::Setup { source } => {
            debug!("Accepted {} announcing itself as {}", peer, source);
            Ok(session(source, framed))
        }
        WireFrame::Envelope(_) => Err(setup_failed("envelope before setup".into())),
    }
}

// ----------------------------------------------------------------------------
// Session Halves
// ----------------------------------------------------------------------------

fn session(remote: NodeAddress, framed: FramedStream) -> Session {
    let (sink, stream) = framed.split();
    let writer = TcpWriter {
        remote: remote.clone(),
        sink,
    };
    let reader = TcpReader {
        remote: remote.clone(),
        stream,
    };
    Session::new(remote, Box::new(writer), Box::new(reader))
}

struct TcpWriter {
    remote: NodeAddress,
    sink: SplitSink<FramedStream, Bytes>,
}

#[async_trait::async_trait]
impl SessionWriter for TcpWriter {
    async fn send(&mut self, envelope: Envelope) -> ArxenResult<()> {
        let frame = WireFrame::Envelope(envelope)
            .encode()
            .map_err(ArxenError::from)?;
        self.sink.send(frame).await.map_err(|e| {
            debug!("Write to {} failed: {}", self.remote, e);
            ArxenError::from(TransportError::NetworkIo(e))
        })
    }

    async fn close(&mut self) -> ArxenResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::NetworkIo(e).into())
    }
}

struct TcpReader {
    remote: NodeAddress,
    stream: SplitStream<FramedStream>,
}

#[async_trait::async_trait]
impl SessionReader for TcpReader {
    async fn receive(&mut self) -> ArxenResult<Option<Envelope>> {
        let Some(frame) = self.stream.next().await else {
            return Ok(None);
        };
        let frame = frame.map_err(TransportError::NetworkIo)?;

        match WireFrame::decode(&frame).map_err(ArxenError::from)? {
            WireFrame::Envelope(envelope) => Ok(Some(envelope)),
            WireFrame::Setup { source } => Err(EnvelopeError::MalformedEnvelope {
                reason: format!("repeated setup frame from {} ({})", self.remote, source),
            }
            .into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_refused_is_retryable() {
        // Bind then drop to find a port nobody listens on
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = reserved.local_addr().unwrap().port();
        drop(reserved);

        let transport = TcpTransport::with_config(
            TcpTransportConfig::new().with_connect_timeout(Duration::from_millis(500)),
        );
        let local = NodeAddress::parse("127.0.0.1:1").unwrap();
        let remote = NodeAddress::parse(&format!("127.0.0.1:{}", port)).unwrap();

        let err = transport.connect(&local, &remote).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_setup_announces_dialer_address() {
        let transport = TcpTransport::new();
        let listen_at = NodeAddress::parse("127.0.0.1:0").unwrap();
        let listener = tokio::net::TcpListener::bind(listen_at.as_str()).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server_addr = NodeAddress::parse(&format!("127.0.0.1:{}", port)).unwrap();
        let mut server = transport.listen(&server_addr).await.unwrap();

        let dialer_addr = NodeAddress::parse("127.0.0.1:40001").unwrap();
        let mut client = transport.connect(&dialer_addr, &server_addr).await.unwrap();
        let mut accepted = server.accept().await.unwrap();

        assert_eq!(client.remote, server_addr);
        assert_eq!(accepted.remote, dialer_addr);

        let envelope = Envelope::from_parts(b"{\"type\":\"x\"}".to_vec(), b"payload".to_vec());
        tokio_test::assert_ok!(client.writer.send(envelope.clone()).await);
        assert_eq!(accepted.reader.receive().await.unwrap(), Some(envelope));

        tokio_test::assert_ok!(client.writer.close().await);
        assert_eq!(accepted.reader.receive().await.unwrap(), None);
    }
}
