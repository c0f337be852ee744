//! tokio-util codecs for both ends of a connection.
//!
//! [`ServerCodec`] never fails on a bad frame: frames with an unsupported
//! version, a malformed body or an oversized length are skipped and surfaced
//! as [`Inbound`] variants so the connection can answer in-band and carry on.
//! A frame that cannot be delimited is fatal: a negative length fails at once,
//! a length above the configured maximum is answered in-band first and fails
//! the following decode, since its declared length cannot be trusted to find
//! the next header.
//!
//! [`ClientCodec`] is the strict counterpart used by test clients.

use crate::frame::Header;
use crate::{CodecError, Frame, ProtocolVersion, SupportedVersions};
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Default maximum body length (256 MiB, the native protocol limit).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

/// What the server side of a connection decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    /// A frame whose version is outside the supported set. Already skipped.
    Unsupported { version: u8, stream_id: i16 },
    /// A frame on a supported version that could not be decoded. Already skipped.
    Malformed {
        version: ProtocolVersion,
        stream_id: i16,
        reason: String,
    },
}

/// Decodes requests and encodes responses.
#[derive(Debug, Clone)]
pub struct ServerCodec {
    versions: SupportedVersions,
    max_frame_length: usize,
    /// Bytes of a skipped frame that have not arrived yet.
    discard: usize,
    /// Declared length of a frame too large to skip; the stream is lost.
    desynced: Option<usize>,
}

impl ServerCodec {
    pub fn new(versions: SupportedVersions, max_frame_length: usize) -> Self {
        Self {
            versions,
            max_frame_length,
            discard: 0,
            desynced: None,
        }
    }

    pub fn versions(&self) -> &SupportedVersions {
        &self.versions
    }

    /// Drop a frame of `total` bytes, whether or not it has fully arrived.
    fn skip(&mut self, src: &mut BytesMut, total: usize) {
        let available = src.len().min(total);
        src.advance(available);
        self.discard = total - available;
    }

    /// Give up on delimiting the stream after a frame of `length` bytes.
    fn desync(&mut self, src: &mut BytesMut, length: usize) {
        src.clear();
        self.discard = 0;
        self.desynced = Some(length);
    }
}

impl Decoder for ServerCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, CodecError> {
        if let Some(length) = self.desynced {
            src.clear();
            return Err(CodecError::FrameTooLarge(length));
        }
        if self.discard > 0 {
            let n = self.discard.min(src.len());
            src.advance(n);
            self.discard -= n;
            if self.discard > 0 {
                return Ok(None);
            }
        }

        let Some(header) = Header::peek(src) else {
            return Ok(None);
        };
        if header.length < 0 {
            return Err(CodecError::Invalid(format!(
                "negative frame length {}",
                header.length
            )));
        }
        let header_len = header.version.header_len();
        let length = header.length as usize;
        let total = header_len + length;
        let oversized = length > self.max_frame_length;

        if !self.versions.contains(header.version) {
            debug!(
                version = header.version.0,
                stream = header.stream_id,
                "Skipping frame with unsupported protocol version"
            );
            if oversized {
                self.desync(src, length);
            } else {
                self.skip(src, total);
            }
            return Ok(Some(Inbound::Unsupported {
                version: header.version.0,
                stream_id: header.stream_id,
            }));
        }

        if oversized {
            warn!(
                length = header.length,
                max = self.max_frame_length,
                "Oversized frame, abandoning stream"
            );
            self.desync(src, length);
            return Ok(Some(Inbound::Malformed {
                version: header.version,
                stream_id: header.stream_id,
                reason: format!("Frame too large: {} bytes", header.length),
            }));
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let raw = src.split_to(total).freeze();

        if header.response {
            return Ok(Some(Inbound::Malformed {
                version: header.version,
                stream_id: header.stream_id,
                reason: "Expected a request frame, got a response".to_string(),
            }));
        }
        if let Some(opcode) = crate::Opcode::from_u8(header.opcode) {
            if !opcode.is_request() {
                return Ok(Some(Inbound::Malformed {
                    version: header.version,
                    stream_id: header.stream_id,
                    reason: format!("Unexpected {} message from client", opcode),
                }));
            }
        }

        match Frame::decode(&header, raw.slice(header_len..)) {
            Ok(frame) => Ok(Some(Inbound::Frame(frame))),
            Err(e) => Ok(Some(Inbound::Malformed {
                version: header.version,
                stream_id: header.stream_id,
                reason: e.to_string(),
            })),
        }
    }
}

impl Encoder<Frame> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        frame.encode(dst);
        Ok(())
    }
}

/// Encodes requests and decodes responses, for any v3+ version.
#[derive(Debug, Clone)]
pub struct ClientCodec {
    max_frame_length: usize,
}

impl ClientCodec {
    pub fn new() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ClientCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        let Some(header) = Header::peek(src) else {
            return Ok(None);
        };
        if header.length < 0 {
            return Err(CodecError::Invalid(format!(
                "negative frame length {}",
                header.length
            )));
        }
        if header.length as usize > self.max_frame_length {
            return Err(CodecError::FrameTooLarge(header.length as usize));
        }
        let header_len = header.version.header_len();
        let total = header_len + header.length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let raw = src.split_to(total).freeze();
        if !header.response {
            return Err(CodecError::Invalid(
                "expected a response frame".to_string(),
            ));
        }
        Frame::decode(&header, raw.slice(header_len..)).map(Some)
    }
}

impl Encoder<Frame> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        frame.encode(dst);
        Ok(())
    }
}

/// Raw bytes, for sending frames this crate cannot build (e.g. v1 headers).
impl Encoder<Bytes> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, raw: Bytes, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.extend_from_slice(&raw);
        Ok(())
    }
}
