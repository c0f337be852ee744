//! Native protocol support for protosim.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   bytes    ┌─────────────┐  Inbound   ┌──────────────┐
//! │  TcpStream / │ ─────────► │ ServerCodec │ ─────────► │  connection  │
//! │  DuplexStream│ ◄───────── │             │ ◄───────── │     task     │
//! └──────────────┘            └─────────────┘   Frame    └──────────────┘
//!                                   │
//!                      Header ─► Frame ─► Message
//!                                   │
//!                         request / response bodies
//!                         DataType, CqlValue, wire primitives
//! ```
//!
//! Bodies are encoded according to the frame's version: v3 and v4 use byte
//! query flags, v5 switches to int flags and adds keyspace/now-in-seconds,
//! result metadata ids and failure reason maps. Versions above 5 are encoded
//! with v5 rules so test clients can probe servers with them.

mod codec;
mod consistency;
mod frame;
mod message;
mod request;
mod response;
mod types;
mod value;
mod version;
pub mod wire;

pub use codec::{ClientCodec, Inbound, ServerCodec, DEFAULT_MAX_FRAME_LENGTH};
pub use consistency::Consistency;
pub use frame::{
    Frame, Header, FLAG_COMPRESSION, FLAG_CUSTOM_PAYLOAD, FLAG_TRACING, FLAG_USE_BETA,
    FLAG_WARNING, RESPONSE_BIT,
};
pub use message::{Message, Opcode};
pub use request::{
    AuthResponse, Batch, BatchStatement, BatchType, BoundValues, Execute, Prepare, Query,
    QueryParameters, Register, Startup,
};
pub use response::{
    AuthToken, Authenticate, ColumnSpec, ErrorBody, ErrorKind, Prepared, PreparedMetadata,
    ResultBody, Rows, RowsMetadata, Supported,
};
pub use types::DataType;
pub use value::{CqlValue, ValueError};
pub use version::{ProtocolVersion, SupportedVersions};
pub use wire::RawValue;

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("Unsupported opcode 0x{0:02x}")]
    UnsupportedOpcode(u8),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("{0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
