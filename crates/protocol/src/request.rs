//! Request bodies: what clients send.

use crate::wire::*;
use crate::{CodecError, Consistency, ProtocolVersion};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

// Query parameter flags.
const VALUES: u32 = 0x01;
const SKIP_METADATA: u32 = 0x02;
const PAGE_SIZE: u32 = 0x04;
const PAGING_STATE: u32 = 0x08;
const SERIAL_CONSISTENCY: u32 = 0x10;
const DEFAULT_TIMESTAMP: u32 = 0x20;
const VALUE_NAMES: u32 = 0x40;
const WITH_KEYSPACE: u32 = 0x80;
const NOW_IN_SECONDS: u32 = 0x100;

// PREPARE flags (v5).
const PREPARE_WITH_KEYSPACE: u32 = 0x01;

fn read_consistency(buf: &mut Bytes) -> Result<Consistency, CodecError> {
    let code = read_short(buf)?;
    Consistency::from_code(code)
        .ok_or_else(|| CodecError::Invalid(format!("unknown consistency 0x{:04x}", code)))
}

fn read_flags(buf: &mut Bytes, version: ProtocolVersion) -> Result<u32, CodecError> {
    if version.has_int_flags() {
        Ok(read_int(buf)? as u32)
    } else {
        Ok(read_byte(buf)? as u32)
    }
}

fn write_flags(buf: &mut BytesMut, version: ProtocolVersion, flags: u32) {
    if version.has_int_flags() {
        buf.put_u32(flags);
    } else {
        buf.put_u8(flags as u8);
    }
}

/// Bound values, either by position or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundValues {
    Positional(Vec<RawValue>),
    Named(Vec<(String, RawValue)>),
}

impl BoundValues {
    pub fn len(&self) -> usize {
        match self {
            BoundValues::Positional(v) => v.len(),
            BoundValues::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn decode(buf: &mut Bytes, named: bool) -> Result<Self, CodecError> {
        let n = read_short(buf)?;
        if named {
            let mut values = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let name = read_string(buf)?;
                values.push((name, read_value(buf)?));
            }
            Ok(BoundValues::Named(values))
        } else {
            let values = (0..n)
                .map(|_| read_value(buf))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(BoundValues::Positional(values))
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        write_short(buf, self.len() as u16);
        match self {
            BoundValues::Positional(values) => {
                for value in values {
                    write_value(buf, value);
                }
            }
            BoundValues::Named(values) => {
                for (name, value) in values {
                    write_string(buf, name);
                    write_value(buf, value);
                }
            }
        }
    }
}

/// The `<query_parameters>` shared by QUERY and EXECUTE.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryParameters {
    pub consistency: Consistency,
    pub values: Option<BoundValues>,
    pub skip_metadata: bool,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub serial_consistency: Option<Consistency>,
    pub default_timestamp: Option<i64>,
    /// v5 only.
    pub keyspace: Option<String>,
    /// v5 only.
    pub now_in_seconds: Option<i32>,
}

impl QueryParameters {
    pub fn with_consistency(consistency: Consistency) -> Self {
        Self {
            consistency,
            ..Self::default()
        }
    }

    pub fn decode(buf: &mut Bytes, version: ProtocolVersion) -> Result<Self, CodecError> {
        let consistency = read_consistency(buf)?;
        let flags = read_flags(buf, version)?;
        let values = if flags & VALUES != 0 {
            Some(BoundValues::decode(buf, flags & VALUE_NAMES != 0)?)
        } else {
            None
        };
        let page_size = if flags & PAGE_SIZE != 0 {
            Some(read_int(buf)?)
        } else {
            None
        };
        let paging_state = if flags & PAGING_STATE != 0 {
            read_bytes(buf)?
        } else {
            None
        };
        let serial_consistency = if flags & SERIAL_CONSISTENCY != 0 {
            Some(read_consistency(buf)?)
        } else {
            None
        };
        let default_timestamp = if flags & DEFAULT_TIMESTAMP != 0 {
            Some(read_long(buf)?)
        } else {
            None
        };
        let keyspace = if version.has_int_flags() && flags & WITH_KEYSPACE != 0 {
            Some(read_string(buf)?)
        } else {
            None
        };
        let now_in_seconds = if version.has_int_flags() && flags & NOW_IN_SECONDS != 0 {
            Some(read_int(buf)?)
        } else {
            None
        };
        Ok(Self {
            consistency,
            values,
            skip_metadata: flags & SKIP_METADATA != 0,
            page_size,
            paging_state,
            serial_consistency,
            default_timestamp,
            keyspace,
            now_in_seconds,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut, version: ProtocolVersion) {
        let mut flags = 0;
        if let Some(values) = &self.values {
            flags |= VALUES;
            if matches!(values, BoundValues::Named(_)) {
                flags |= VALUE_NAMES;
            }
        }
        if self.skip_metadata {
            flags |= SKIP_METADATA;
        }
        if self.page_size.is_some() {
            flags |= PAGE_SIZE;
        }
        if self.paging_state.is_some() {
            flags |= PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= SERIAL_CONSISTENCY;
        }
        if self.default_timestamp.is_some() {
            flags |= DEFAULT_TIMESTAMP;
        }
        let v5 = version.has_int_flags();
        if v5 && self.keyspace.is_some() {
            flags |= WITH_KEYSPACE;
        }
        if v5 && self.now_in_seconds.is_some() {
            flags |= NOW_IN_SECONDS;
        }

        write_short(buf, self.consistency.code());
        write_flags(buf, version, flags);
        if let Some(values) = &self.values {
            values.encode(buf);
        }
        if let Some(page_size) = self.page_size {
            write_int(buf, page_size);
        }
        if let Some(state) = &self.paging_state {
            write_bytes(buf, Some(state));
        }
        if let Some(serial) = self.serial_consistency {
            write_short(buf, serial.code());
        }
        if let Some(ts) = self.default_timestamp {
            write_long(buf, ts);
        }
        if v5 {
            if let Some(keyspace) = &self.keyspace {
                write_string(buf, keyspace);
            }
            if let Some(now) = self.now_in_seconds {
                write_int(buf, now);
            }
        }
    }
}

/// STARTUP.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Startup {
    pub options: BTreeMap<String, String>,
}

impl Startup {
    pub fn new() -> Self {
        let mut options = BTreeMap::new();
        options.insert("CQL_VERSION".to_string(), "3.0.0".to_string());
        Self { options }
    }
}

/// QUERY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub query: String,
    pub params: QueryParameters,
}

impl Query {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: QueryParameters::default(),
        }
    }
}

/// PREPARE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    pub query: String,
    /// v5 only.
    pub keyspace: Option<String>,
}

impl Prepare {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            keyspace: None,
        }
    }
}

/// EXECUTE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    pub id: Bytes,
    /// v5 only.
    pub result_metadata_id: Option<Bytes>,
    pub params: QueryParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    Logged,
    Unlogged,
    Counter,
}

impl BatchType {
    fn code(self) -> u8 {
        match self {
            BatchType::Logged => 0,
            BatchType::Unlogged => 1,
            BatchType::Counter => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            0 => Ok(BatchType::Logged),
            1 => Ok(BatchType::Unlogged),
            2 => Ok(BatchType::Counter),
            other => Err(CodecError::Invalid(format!("unknown batch type {}", other))),
        }
    }
}

/// One statement inside a BATCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatement {
    Query {
        query: String,
        values: BoundValues,
    },
    Prepared {
        id: Bytes,
        values: BoundValues,
    },
}

impl BatchStatement {
    pub fn values(&self) -> &BoundValues {
        match self {
            BatchStatement::Query { values, .. } | BatchStatement::Prepared { values, .. } => {
                values
            }
        }
    }
}

/// BATCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub batch_type: BatchType,
    pub statements: Vec<BatchStatement>,
    pub consistency: Consistency,
    pub serial_consistency: Option<Consistency>,
    pub default_timestamp: Option<i64>,
    pub keyspace: Option<String>,
    pub now_in_seconds: Option<i32>,
}

impl Batch {
    pub fn new(batch_type: BatchType, statements: Vec<BatchStatement>) -> Self {
        Self {
            batch_type,
            statements,
            consistency: Consistency::default(),
            serial_consistency: None,
            default_timestamp: None,
            keyspace: None,
            now_in_seconds: None,
        }
    }
}

/// REGISTER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub events: Vec<String>,
}

/// AUTH_RESPONSE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub token: Option<Bytes>,
}

// ─── Body codecs ───

pub(crate) fn decode_startup(buf: &mut Bytes) -> Result<Startup, CodecError> {
    Ok(Startup {
        options: read_string_map(buf)?,
    })
}

pub(crate) fn encode_startup(body: &Startup, buf: &mut BytesMut) {
    write_string_map(buf, &body.options);
}

pub(crate) fn decode_query(buf: &mut Bytes, version: ProtocolVersion) -> Result<Query, CodecError> {
    let query = read_long_string(buf)?;
    let params = QueryParameters::decode(buf, version)?;
    Ok(Query { query, params })
}

pub(crate) fn encode_query(body: &Query, buf: &mut BytesMut, version: ProtocolVersion) {
    write_long_string(buf, &body.query);
    body.params.encode(buf, version);
}

pub(crate) fn decode_prepare(
    buf: &mut Bytes,
    version: ProtocolVersion,
) -> Result<Prepare, CodecError> {
    let query = read_long_string(buf)?;
    let mut keyspace = None;
    if version.has_int_flags() {
        let flags = read_int(buf)? as u32;
        if flags & PREPARE_WITH_KEYSPACE != 0 {
            keyspace = Some(read_string(buf)?);
        }
    }
    Ok(Prepare { query, keyspace })
}

pub(crate) fn encode_prepare(body: &Prepare, buf: &mut BytesMut, version: ProtocolVersion) {
    write_long_string(buf, &body.query);
    if version.has_int_flags() {
        match &body.keyspace {
            Some(keyspace) => {
                buf.put_u32(PREPARE_WITH_KEYSPACE);
                write_string(buf, keyspace);
            }
            None => buf.put_u32(0),
        }
    }
}

pub(crate) fn decode_execute(
    buf: &mut Bytes,
    version: ProtocolVersion,
) -> Result<Execute, CodecError> {
    let id = read_short_bytes(buf)?;
    let result_metadata_id = if version.has_int_flags() {
        Some(read_short_bytes(buf)?)
    } else {
        None
    };
    let params = QueryParameters::decode(buf, version)?;
    Ok(Execute {
        id,
        result_metadata_id,
        params,
    })
}

pub(crate) fn encode_execute(body: &Execute, buf: &mut BytesMut, version: ProtocolVersion) {
    write_short_bytes(buf, &body.id);
    if version.has_int_flags() {
        write_short_bytes(buf, body.result_metadata_id.as_deref().unwrap_or_default());
    }
    body.params.encode(buf, version);
}

pub(crate) fn decode_batch(buf: &mut Bytes, version: ProtocolVersion) -> Result<Batch, CodecError> {
    let batch_type = BatchType::from_code(read_byte(buf)?)?;
    let n = read_short(buf)?;

    // The names flag arrives after the values, so only positional values
    // can be read here. Named batch values are rejected once flags are known.
    let mut raw = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let kind = read_byte(buf)?;
        let target = match kind {
            0 => Ok(read_long_string(buf)?),
            1 => Err(read_short_bytes(buf)?),
            other => {
                return Err(CodecError::Invalid(format!(
                    "unknown batch statement kind {}",
                    other
                )))
            }
        };
        let values = BoundValues::decode(buf, false)?;
        raw.push((target, values));
    }

    let consistency = read_consistency(buf)?;
    let flags = read_flags(buf, version)?;
    if flags & VALUE_NAMES != 0 {
        return Err(CodecError::Invalid(
            "named values are not supported in batches".to_string(),
        ));
    }
    let serial_consistency = if flags & SERIAL_CONSISTENCY != 0 {
        Some(read_consistency(buf)?)
    } else {
        None
    };
    let default_timestamp = if flags & DEFAULT_TIMESTAMP != 0 {
        Some(read_long(buf)?)
    } else {
        None
    };
    let keyspace = if version.has_int_flags() && flags & WITH_KEYSPACE != 0 {
        Some(read_string(buf)?)
    } else {
        None
    };
    let now_in_seconds = if version.has_int_flags() && flags & NOW_IN_SECONDS != 0 {
        Some(read_int(buf)?)
    } else {
        None
    };

    let statements = raw
        .into_iter()
        .map(|(target, values)| match target {
            Ok(query) => BatchStatement::Query { query, values },
            Err(id) => BatchStatement::Prepared { id, values },
        })
        .collect();

    Ok(Batch {
        batch_type,
        statements,
        consistency,
        serial_consistency,
        default_timestamp,
        keyspace,
        now_in_seconds,
    })
}

pub(crate) fn encode_batch(body: &Batch, buf: &mut BytesMut, version: ProtocolVersion) {
    buf.put_u8(body.batch_type.code());
    write_short(buf, body.statements.len() as u16);
    for statement in &body.statements {
        match statement {
            BatchStatement::Query { query, .. } => {
                buf.put_u8(0);
                write_long_string(buf, query);
            }
            BatchStatement::Prepared { id, .. } => {
                buf.put_u8(1);
                write_short_bytes(buf, id);
            }
        }
        // Named values cannot be signalled per statement; send them positionally.
        match statement.values() {
            BoundValues::Named(named) => {
                let positional: Vec<RawValue> = named.iter().map(|(_, v)| v.clone()).collect();
                BoundValues::Positional(positional).encode(buf);
            }
            values => values.encode(buf),
        }
    }

    let v5 = version.has_int_flags();
    let mut flags = 0;
    if body.serial_consistency.is_some() {
        flags |= SERIAL_CONSISTENCY;
    }
    if body.default_timestamp.is_some() {
        flags |= DEFAULT_TIMESTAMP;
    }
    if v5 && body.keyspace.is_some() {
        flags |= WITH_KEYSPACE;
    }
    if v5 && body.now_in_seconds.is_some() {
        flags |= NOW_IN_SECONDS;
    }
    write_short(buf, body.consistency.code());
    write_flags(buf, version, flags);
    if let Some(serial) = body.serial_consistency {
        write_short(buf, serial.code());
    }
    if let Some(ts) = body.default_timestamp {
        write_long(buf, ts);
    }
    if v5 {
        if let Some(keyspace) = &body.keyspace {
            write_string(buf, keyspace);
        }
        if let Some(now) = body.now_in_seconds {
            write_int(buf, now);
        }
    }
}

pub(crate) fn decode_register(buf: &mut Bytes) -> Result<Register, CodecError> {
    Ok(Register {
        events: read_string_list(buf)?,
    })
}

pub(crate) fn encode_register(body: &Register, buf: &mut BytesMut) {
    write_string_list(buf, &body.events);
}

pub(crate) fn decode_auth_response(buf: &mut Bytes) -> Result<AuthResponse, CodecError> {
    Ok(AuthResponse {
        token: read_bytes(buf)?,
    })
}

pub(crate) fn encode_auth_response(body: &AuthResponse, buf: &mut BytesMut) {
    write_bytes(buf, body.token.as_deref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_v4_uses_byte_flags() {
        let params = QueryParameters {
            consistency: Consistency::Quorum,
            values: Some(BoundValues::Positional(vec![RawValue::Unset])),
            page_size: Some(100),
            ..QueryParameters::default()
        };
        let mut buf = BytesMut::new();
        params.encode(&mut buf, ProtocolVersion::V4);
        // consistency(2) + flags(1) + n(2) + value(4) + page size(4)
        assert_eq!(buf.len(), 13);
        assert_eq!(buf[2], (VALUES | PAGE_SIZE) as u8);

        let decoded = QueryParameters::decode(&mut buf.freeze(), ProtocolVersion::V4).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_query_params_v5_keyspace() {
        let params = QueryParameters {
            keyspace: Some("ks".to_string()),
            now_in_seconds: Some(42),
            ..QueryParameters::default()
        };
        let mut buf = BytesMut::new();
        params.encode(&mut buf, ProtocolVersion::V5);
        let decoded = QueryParameters::decode(&mut buf.freeze(), ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_batch_mixed_statements() {
        let mut batch = Batch::new(
            BatchType::Unlogged,
            vec![
                BatchStatement::Query {
                    query: "INSERT INTO t (k) VALUES (?)".to_string(),
                    values: BoundValues::Positional(vec![RawValue::Set(Bytes::from_static(
                        &[0, 0, 0, 1],
                    ))]),
                },
                BatchStatement::Prepared {
                    id: Bytes::from_static(&[9; 16]),
                    values: BoundValues::Positional(vec![]),
                },
            ],
        );
        batch.default_timestamp = Some(1_000);

        let mut buf = BytesMut::new();
        encode_batch(&batch, &mut buf, ProtocolVersion::V4);
        let decoded = decode_batch(&mut buf.freeze(), ProtocolVersion::V4).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_unknown_consistency_is_rejected() {
        let mut buf = Bytes::from_static(&[0x00, 0x77, 0x00]);
        assert!(QueryParameters::decode(&mut buf, ProtocolVersion::V4).is_err());
    }
}
