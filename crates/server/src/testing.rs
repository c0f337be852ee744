//! A minimal native-protocol client for exercising bound nodes.

use crate::local::{self, LocalNetwork, NodeStream};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use protosim_protocol::{ClientCodec, CodecError, Frame, Message, ProtocolVersion, Query, Startup};
use protosim_types::NodeAddress;
use std::io;
use std::time::Duration;
use tokio_util::codec::Framed;

/// How long [`MockClient::next`] waits before giving up.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Speaks the client side of the protocol over TCP or a local pipe.
#[derive(Debug)]
pub struct MockClient {
    framed: Framed<NodeStream, ClientCodec>,
    version: ProtocolVersion,
    next_stream: i16,
}

impl MockClient {
    pub async fn connect(address: &NodeAddress, local: &LocalNetwork) -> io::Result<Self> {
        let stream = local::connect(address, local).await?;
        Ok(Self {
            framed: Framed::new(stream, ClientCodec::new()),
            version: ProtocolVersion::V4,
            next_stream: 0,
        })
    }

    /// Protocol version of frames built by [`send`](Self::send). Default: v4.
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Send `message` on a fresh stream id, returning the id.
    pub async fn send(&mut self, message: Message) -> Result<i16, CodecError> {
        let stream_id = self.next_stream;
        self.next_stream = self.next_stream.wrapping_add(1).max(0);
        self.send_frame(Frame::new(self.version, stream_id, message))
            .await?;
        Ok(stream_id)
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        self.framed.send(frame).await
    }

    /// Send bytes as they are, e.g. a hand-built header.
    pub async fn send_raw(&mut self, raw: Bytes) -> Result<(), CodecError> {
        self.framed.send(raw).await
    }

    pub async fn startup(&mut self) -> Result<i16, CodecError> {
        self.send(Message::Startup(Startup::new())).await
    }

    pub async fn query(&mut self, text: &str) -> Result<i16, CodecError> {
        self.send(Message::Query(Query::new(text))).await
    }

    /// The next response, failing if none arrives within
    /// [`DEFAULT_RESPONSE_TIMEOUT`] or the connection closes.
    pub async fn next(&mut self) -> Result<Frame, CodecError> {
        match self.next_within(DEFAULT_RESPONSE_TIMEOUT).await? {
            Some(frame) => Ok(frame),
            None => Err(CodecError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "no response",
            ))),
        }
    }

    /// The next response, or `None` if nothing arrives within `wait`.
    pub async fn next_within(&mut self, wait: Duration) -> Result<Option<Frame>, CodecError> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Err(_) => Ok(None),
            Ok(Some(result)) => result.map(Some),
            Ok(None) => Err(CodecError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            ))),
        }
    }

    /// Whether the server closes (or has closed) its side within `wait`.
    pub async fn is_closed(&mut self, wait: Duration) -> bool {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Err(_) => false,
            Ok(None) | Ok(Some(Err(_))) => true,
            Ok(Some(Ok(_))) => false,
        }
    }
}
