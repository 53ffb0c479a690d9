//! Wire framing for TCP sessions
//!
//! Every frame is a length-delimited bincode-encoded [`WireFrame`]. The first frame on a
//! connection is always `Setup` from the dialer, announcing the address it listens on;
//! all later frames in either direction carry envelopes.

use arxen_core::{Envelope, NodeAddress};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::TcpResult;

/// One frame on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFrame {
    /// Dialer's declared node address
    Setup { source: NodeAddress },
    Envelope(Envelope),
}

impl WireFrame {
    pub fn encode(&self) -> TcpResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(bytes: &[u8]) -> TcpResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Wrap a stream in the length-delimited codec
pub fn framed(stream: TcpStream, max_frame_length: usize) -> FramedStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec();
    Framed::new(stream, codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_frame_round_trip() {
        let frame = WireFrame::Setup {
            source: NodeAddress::parse("127.0.0.1:7878").unwrap(),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(WireFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(WireFrame::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
