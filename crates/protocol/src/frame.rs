//! Frame header and envelope.
//!
//! # Wire Format (v3+)
//!
//! ```text
//! 0         8        16                32        40                    72
//! +---------+---------+-----------------+---------+---------------------+
//! | version |  flags  |     stream      | opcode  |       length        |
//! +---------+---------+-----------------+---------+---------------------+
//! |                         body (length bytes)                         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! The high bit of `version` marks a response. v1 and v2 use a one-byte
//! stream id, which this crate only needs to know to skip such frames.

use crate::message::{Message, Opcode};
use crate::wire::*;
use crate::{CodecError, ProtocolVersion};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const RESPONSE_BIT: u8 = 0x80;

pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;
pub const FLAG_USE_BETA: u8 = 0x10;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: ProtocolVersion,
    pub response: bool,
    pub flags: u8,
    pub stream_id: i16,
    pub opcode: u8,
    pub length: i32,
}

impl Header {
    /// Parse a header from the front of `src` without consuming it.
    ///
    /// Returns `None` until enough bytes have arrived.
    pub fn peek(src: &[u8]) -> Option<Self> {
        let first = *src.first()?;
        let version = ProtocolVersion(first & !RESPONSE_BIT);
        if src.len() < version.header_len() {
            return None;
        }
        let (stream_id, rest) = if version.header_len() == 8 {
            (src[2] as i8 as i16, &src[3..])
        } else {
            (i16::from_be_bytes([src[2], src[3]]), &src[4..])
        };
        Some(Self {
            version,
            response: first & RESPONSE_BIT != 0,
            flags: src[1],
            stream_id,
            opcode: rest[0],
            length: i32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]),
        })
    }
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: ProtocolVersion,
    pub beta: bool,
    pub stream_id: i16,
    /// Request: client asks for tracing. Response: `tracing_id` is set.
    pub tracing: bool,
    pub tracing_id: Option<Uuid>,
    pub custom_payload: Option<BTreeMap<String, Bytes>>,
    /// Response only.
    pub warnings: Vec<String>,
    pub message: Message,
}

impl Frame {
    pub fn new(version: ProtocolVersion, stream_id: i16, message: Message) -> Self {
        Self {
            version,
            beta: false,
            stream_id,
            tracing: false,
            tracing_id: None,
            custom_payload: None,
            warnings: Vec::new(),
            message,
        }
    }

    /// A response on the same stream and version as this request.
    pub fn reply(&self, message: Message) -> Self {
        Self::new(self.version, self.stream_id, message)
    }

    pub fn opcode(&self) -> Opcode {
        self.message.opcode()
    }

    pub fn is_response(&self) -> bool {
        !self.message.is_request()
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.tracing || self.tracing_id.is_some() {
            flags |= FLAG_TRACING;
        }
        if self.custom_payload.is_some() {
            flags |= FLAG_CUSTOM_PAYLOAD;
        }
        if !self.warnings.is_empty() && self.is_response() {
            flags |= FLAG_WARNING;
        }
        if self.beta {
            flags |= FLAG_USE_BETA;
        }
        flags
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let response = self.is_response();
        let mut body = BytesMut::new();
        if response {
            if let Some(id) = &self.tracing_id {
                write_uuid(&mut body, id);
            }
            if !self.warnings.is_empty() {
                write_string_list(&mut body, &self.warnings);
            }
        }
        if let Some(payload) = &self.custom_payload {
            write_bytes_map(&mut body, payload);
        }
        self.message.encode_body(&mut body, self.version);

        let mut first = self.version.0;
        if response {
            first |= RESPONSE_BIT;
        }
        dst.reserve(self.version.header_len() + body.len());
        dst.put_u8(first);
        dst.put_u8(self.flags());
        dst.put_i16(self.stream_id);
        dst.put_u8(self.opcode() as u8);
        dst.put_i32(body.len() as i32);
        dst.extend_from_slice(&body);
    }

    /// Decode a frame from its header and complete body.
    pub fn decode(header: &Header, mut body: Bytes) -> Result<Self, CodecError> {
        if header.flags & FLAG_COMPRESSION != 0 {
            return Err(CodecError::Invalid(
                "compressed frames are not supported".to_string(),
            ));
        }
        let opcode =
            Opcode::from_u8(header.opcode).ok_or(CodecError::UnknownOpcode(header.opcode))?;

        let mut tracing_id = None;
        let mut warnings = Vec::new();
        if header.response {
            if header.flags & FLAG_TRACING != 0 {
                tracing_id = Some(read_uuid(&mut body)?);
            }
            if header.flags & FLAG_WARNING != 0 {
                warnings = read_string_list(&mut body)?;
            }
        }
        let custom_payload = if header.flags & FLAG_CUSTOM_PAYLOAD != 0 {
            Some(read_bytes_map(&mut body)?)
        } else {
            None
        };
        let message = Message::decode_body(opcode, body, header.version)?;

        Ok(Self {
            version: header.version,
            beta: header.flags & FLAG_USE_BETA != 0,
            stream_id: header.stream_id,
            tracing: header.flags & FLAG_TRACING != 0,
            tracing_id,
            custom_payload,
            warnings,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Query, Startup};
    use crate::response::ErrorBody;

    #[test]
    fn test_header_peek_v4() {
        let mut buf = BytesMut::new();
        Frame::new(ProtocolVersion::V4, 7, Message::Options).encode(&mut buf);
        assert_eq!(&buf[..], &[0x04, 0x00, 0x00, 0x07, 0x05, 0, 0, 0, 0]);

        let header = Header::peek(&buf).unwrap();
        assert_eq!(header.stream_id, 7);
        assert_eq!(header.opcode, 0x05);
        assert!(!header.response);
        assert!(Header::peek(&buf[..8]).is_none());
    }

    #[test]
    fn test_header_peek_legacy() {
        // v2 header: one-byte stream id
        let raw = [0x02, 0x00, 0xFF, 0x01, 0, 0, 0, 3, 1, 2, 3];
        let header = Header::peek(&raw).unwrap();
        assert_eq!(header.version, ProtocolVersion(2));
        assert_eq!(header.stream_id, -1);
        assert_eq!(header.length, 3);
    }

    #[test]
    fn test_response_warnings_and_tracing() {
        let mut frame = Frame::new(
            ProtocolVersion::V4,
            1,
            Message::Error(ErrorBody::invalid("nope")),
        );
        frame.tracing_id = Some(Uuid::from_u128(5));
        frame.warnings = vec!["careful".to_string()];

        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(buf[0], 0x84);
        assert_eq!(buf[1], FLAG_TRACING | FLAG_WARNING);

        let header = Header::peek(&buf).unwrap();
        let body = buf.freeze().slice(9..);
        let mut decoded = Frame::decode(&header, body).unwrap();
        decoded.tracing = false;
        frame.tracing = false;
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_request_custom_payload() {
        let mut frame = Frame::new(
            ProtocolVersion::V5,
            2,
            Message::Query(Query::new("SELECT * FROM t")),
        );
        let mut payload = BTreeMap::new();
        payload.insert("k".to_string(), Bytes::from_static(b"v"));
        frame.custom_payload = Some(payload);

        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let header = Header::peek(&buf).unwrap();
        let decoded = Frame::decode(&header, buf.freeze().slice(9..)).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_compression_flag_rejected() {
        let mut buf = BytesMut::new();
        Frame::new(ProtocolVersion::V4, 0, Message::Startup(Startup::new())).encode(&mut buf);
        buf[1] |= FLAG_COMPRESSION;
        let header = Header::peek(&buf).unwrap();
        assert!(Frame::decode(&header, buf.freeze().slice(9..)).is_err());
    }
}
