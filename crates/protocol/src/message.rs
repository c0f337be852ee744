//! Opcodes and the message enum covering every body this crate understands.

use crate::request::*;
use crate::response::*;
use crate::{CodecError, ProtocolVersion};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x09 => Opcode::Prepare,
            0x0A => Opcode::Execute,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            0x0D => Opcode::Batch,
            0x0E => Opcode::AuthChallenge,
            0x0F => Opcode::AuthResponse,
            0x10 => Opcode::AuthSuccess,
            _ => return None,
        })
    }

    /// Whether clients send this opcode.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Opcode::Startup
                | Opcode::Options
                | Opcode::Query
                | Opcode::Prepare
                | Opcode::Execute
                | Opcode::Register
                | Opcode::Batch
                | Opcode::AuthResponse
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Error => "ERROR",
            Opcode::Startup => "STARTUP",
            Opcode::Ready => "READY",
            Opcode::Authenticate => "AUTHENTICATE",
            Opcode::Options => "OPTIONS",
            Opcode::Supported => "SUPPORTED",
            Opcode::Query => "QUERY",
            Opcode::Result => "RESULT",
            Opcode::Prepare => "PREPARE",
            Opcode::Execute => "EXECUTE",
            Opcode::Register => "REGISTER",
            Opcode::Event => "EVENT",
            Opcode::Batch => "BATCH",
            Opcode::AuthChallenge => "AUTH_CHALLENGE",
            Opcode::AuthResponse => "AUTH_RESPONSE",
            Opcode::AuthSuccess => "AUTH_SUCCESS",
        };
        f.write_str(name)
    }
}

/// A decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Requests
    Startup(Startup),
    Options,
    Query(Query),
    Prepare(Prepare),
    Execute(Execute),
    Batch(Batch),
    Register(Register),
    AuthResponse(AuthResponse),

    // Responses
    Error(ErrorBody),
    Ready,
    Authenticate(Authenticate),
    Supported(Supported),
    Result(ResultBody),
    AuthChallenge(AuthToken),
    AuthSuccess(AuthToken),
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Startup(_) => Opcode::Startup,
            Message::Options => Opcode::Options,
            Message::Query(_) => Opcode::Query,
            Message::Prepare(_) => Opcode::Prepare,
            Message::Execute(_) => Opcode::Execute,
            Message::Batch(_) => Opcode::Batch,
            Message::Register(_) => Opcode::Register,
            Message::AuthResponse(_) => Opcode::AuthResponse,
            Message::Error(_) => Opcode::Error,
            Message::Ready => Opcode::Ready,
            Message::Authenticate(_) => Opcode::Authenticate,
            Message::Supported(_) => Opcode::Supported,
            Message::Result(_) => Opcode::Result,
            Message::AuthChallenge(_) => Opcode::AuthChallenge,
            Message::AuthSuccess(_) => Opcode::AuthSuccess,
        }
    }

    pub fn is_request(&self) -> bool {
        self.opcode().is_request()
    }

    /// Query text, for QUERY and PREPARE.
    pub fn query_text(&self) -> Option<&str> {
        match self {
            Message::Query(q) => Some(&q.query),
            Message::Prepare(p) => Some(&p.query),
            _ => None,
        }
    }

    pub fn encode_body(&self, buf: &mut BytesMut, version: ProtocolVersion) {
        match self {
            Message::Startup(body) => encode_startup(body, buf),
            Message::Options | Message::Ready => {}
            Message::Query(body) => encode_query(body, buf, version),
            Message::Prepare(body) => encode_prepare(body, buf, version),
            Message::Execute(body) => encode_execute(body, buf, version),
            Message::Batch(body) => encode_batch(body, buf, version),
            Message::Register(body) => encode_register(body, buf),
            Message::AuthResponse(body) => encode_auth_response(body, buf),
            Message::Error(body) => encode_error(body, buf, version),
            Message::Authenticate(body) => crate::wire::write_string(buf, &body.authenticator),
            Message::Supported(body) => encode_supported(body, buf),
            Message::Result(body) => encode_result(body, buf, version),
            Message::AuthChallenge(body) | Message::AuthSuccess(body) => encode_token(body, buf),
        }
    }

    /// Decode a body. Trailing bytes are an error.
    pub fn decode_body(
        opcode: Opcode,
        mut body: Bytes,
        version: ProtocolVersion,
    ) -> Result<Self, CodecError> {
        let buf = &mut body;
        let message = match opcode {
            Opcode::Startup => Message::Startup(decode_startup(buf)?),
            Opcode::Options => Message::Options,
            Opcode::Query => Message::Query(decode_query(buf, version)?),
            Opcode::Prepare => Message::Prepare(decode_prepare(buf, version)?),
            Opcode::Execute => Message::Execute(decode_execute(buf, version)?),
            Opcode::Batch => Message::Batch(decode_batch(buf, version)?),
            Opcode::Register => Message::Register(decode_register(buf)?),
            Opcode::AuthResponse => Message::AuthResponse(decode_auth_response(buf)?),
            Opcode::Error => Message::Error(decode_error(buf, version)?),
            Opcode::Ready => Message::Ready,
            Opcode::Authenticate => Message::Authenticate(Authenticate {
                authenticator: crate::wire::read_string(buf)?,
            }),
            Opcode::Supported => Message::Supported(decode_supported(buf)?),
            Opcode::Result => Message::Result(decode_result(buf, version)?),
            Opcode::AuthChallenge => Message::AuthChallenge(decode_token(buf)?),
            Opcode::AuthSuccess => Message::AuthSuccess(decode_token(buf)?),
            Opcode::Event => return Err(CodecError::UnsupportedOpcode(opcode as u8)),
        };
        if !body.is_empty() {
            return Err(CodecError::Invalid(format!(
                "{} trailing bytes after {} body",
                body.len(),
                opcode
            )));
        }
        Ok(message)
    }
}
