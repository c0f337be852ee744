//! Response bodies: what the simulated nodes send back.

use crate::wire::*;
use crate::{CodecError, Consistency, DataType, ProtocolVersion};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

// ═══════════════════════════════════════════════════════════════════════
// ERROR
// ═══════════════════════════════════════════════════════════════════════

/// Error codes and the extra fields each one carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Server,
    Protocol,
    AuthenticationError,
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
    },
    Overloaded,
    IsBootstrapping,
    Truncate,
    WriteTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        write_type: String,
        /// v5, CAS writes only.
        contentions: Option<u16>,
    },
    ReadTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        data_present: bool,
    },
    ReadFailure {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        /// Endpoint and reason code; before v5 only the count goes on the wire.
        reasons: Vec<(IpAddr, u16)>,
        data_present: bool,
    },
    FunctionFailure {
        keyspace: String,
        function: String,
        arg_types: Vec<String>,
    },
    WriteFailure {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        reasons: Vec<(IpAddr, u16)>,
        write_type: String,
    },
    CdcWriteFailure,
    CasWriteUnknown {
        consistency: Consistency,
        received: i32,
        block_for: i32,
    },
    Syntax,
    Unauthorized,
    Invalid,
    Config,
    AlreadyExists {
        keyspace: String,
        table: String,
    },
    Unprepared {
        id: Bytes,
    },
}

impl ErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::Server => 0x0000,
            ErrorKind::Protocol => 0x000A,
            ErrorKind::AuthenticationError => 0x0100,
            ErrorKind::Unavailable { .. } => 0x1000,
            ErrorKind::Overloaded => 0x1001,
            ErrorKind::IsBootstrapping => 0x1002,
            ErrorKind::Truncate => 0x1003,
            ErrorKind::WriteTimeout { .. } => 0x1100,
            ErrorKind::ReadTimeout { .. } => 0x1200,
            ErrorKind::ReadFailure { .. } => 0x1300,
            ErrorKind::FunctionFailure { .. } => 0x1400,
            ErrorKind::WriteFailure { .. } => 0x1500,
            ErrorKind::CdcWriteFailure => 0x1600,
            ErrorKind::CasWriteUnknown { .. } => 0x1700,
            ErrorKind::Syntax => 0x2000,
            ErrorKind::Unauthorized => 0x2100,
            ErrorKind::Invalid => 0x2200,
            ErrorKind::Config => 0x2300,
            ErrorKind::AlreadyExists { .. } => 0x2400,
            ErrorKind::Unprepared { .. } => 0x2500,
        }
    }
}

/// ERROR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

fn read_consistency(buf: &mut Bytes) -> Result<Consistency, CodecError> {
    let code = read_short(buf)?;
    Consistency::from_code(code)
        .ok_or_else(|| CodecError::Invalid(format!("unknown consistency 0x{:04x}", code)))
}

fn read_reasons(
    buf: &mut Bytes,
    version: ProtocolVersion,
) -> Result<Vec<(IpAddr, u16)>, CodecError> {
    let n = read_int(buf)?;
    if n < 0 {
        return Err(CodecError::Invalid(format!("negative failure count {}", n)));
    }
    if version.has_int_flags() {
        let mut reasons = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let endpoint = read_inet_addr(buf)?;
            reasons.push((endpoint, read_short(buf)?));
        }
        Ok(reasons)
    } else {
        Ok(vec![(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0); n as usize])
    }
}

fn write_reasons(buf: &mut BytesMut, version: ProtocolVersion, reasons: &[(IpAddr, u16)]) {
    write_int(buf, reasons.len() as i32);
    if version.has_int_flags() {
        for (endpoint, code) in reasons {
            write_inet_addr(buf, endpoint);
            write_short(buf, *code);
        }
    }
}

pub(crate) fn decode_error(
    buf: &mut Bytes,
    version: ProtocolVersion,
) -> Result<ErrorBody, CodecError> {
    let code = read_int(buf)?;
    let message = read_string(buf)?;
    let kind = match code {
        0x0000 => ErrorKind::Server,
        0x000A => ErrorKind::Protocol,
        0x0100 => ErrorKind::AuthenticationError,
        0x1000 => ErrorKind::Unavailable {
            consistency: read_consistency(buf)?,
            required: read_int(buf)?,
            alive: read_int(buf)?,
        },
        0x1001 => ErrorKind::Overloaded,
        0x1002 => ErrorKind::IsBootstrapping,
        0x1003 => ErrorKind::Truncate,
        0x1100 => {
            let consistency = read_consistency(buf)?;
            let received = read_int(buf)?;
            let block_for = read_int(buf)?;
            let write_type = read_string(buf)?;
            let contentions = if version.has_int_flags() && write_type == "CAS" {
                Some(read_short(buf)?)
            } else {
                None
            };
            ErrorKind::WriteTimeout {
                consistency,
                received,
                block_for,
                write_type,
                contentions,
            }
        }
        0x1200 => ErrorKind::ReadTimeout {
            consistency: read_consistency(buf)?,
            received: read_int(buf)?,
            block_for: read_int(buf)?,
            data_present: read_byte(buf)? != 0,
        },
        0x1300 => ErrorKind::ReadFailure {
            consistency: read_consistency(buf)?,
            received: read_int(buf)?,
            block_for: read_int(buf)?,
            reasons: read_reasons(buf, version)?,
            data_present: read_byte(buf)? != 0,
        },
        0x1400 => ErrorKind::FunctionFailure {
            keyspace: read_string(buf)?,
            function: read_string(buf)?,
            arg_types: read_string_list(buf)?,
        },
        0x1500 => ErrorKind::WriteFailure {
            consistency: read_consistency(buf)?,
            received: read_int(buf)?,
            block_for: read_int(buf)?,
            reasons: read_reasons(buf, version)?,
            write_type: read_string(buf)?,
        },
        0x1600 => ErrorKind::CdcWriteFailure,
        0x1700 => ErrorKind::CasWriteUnknown {
            consistency: read_consistency(buf)?,
            received: read_int(buf)?,
            block_for: read_int(buf)?,
        },
        0x2000 => ErrorKind::Syntax,
        0x2100 => ErrorKind::Unauthorized,
        0x2200 => ErrorKind::Invalid,
        0x2300 => ErrorKind::Config,
        0x2400 => ErrorKind::AlreadyExists {
            keyspace: read_string(buf)?,
            table: read_string(buf)?,
        },
        0x2500 => ErrorKind::Unprepared {
            id: read_short_bytes(buf)?,
        },
        other => {
            return Err(CodecError::Invalid(format!(
                "unknown error code 0x{:04x}",
                other
            )))
        }
    };
    Ok(ErrorBody { kind, message })
}

pub(crate) fn encode_error(body: &ErrorBody, buf: &mut BytesMut, version: ProtocolVersion) {
    write_int(buf, body.code());
    write_string(buf, &body.message);
    match &body.kind {
        ErrorKind::Unavailable {
            consistency,
            required,
            alive,
        } => {
            write_short(buf, consistency.code());
            write_int(buf, *required);
            write_int(buf, *alive);
        }
        ErrorKind::WriteTimeout {
            consistency,
            received,
            block_for,
            write_type,
            contentions,
        } => {
            write_short(buf, consistency.code());
            write_int(buf, *received);
            write_int(buf, *block_for);
            write_string(buf, write_type);
            if version.has_int_flags() && write_type == "CAS" {
                write_short(buf, contentions.unwrap_or(0));
            }
        }
        ErrorKind::ReadTimeout {
            consistency,
            received,
            block_for,
            data_present,
        } => {
            write_short(buf, consistency.code());
            write_int(buf, *received);
            write_int(buf, *block_for);
            buf.put_u8(u8::from(*data_present));
        }
        ErrorKind::ReadFailure {
            consistency,
            received,
            block_for,
            reasons,
            data_present,
        } => {
            write_short(buf, consistency.code());
            write_int(buf, *received);
            write_int(buf, *block_for);
            write_reasons(buf, version, reasons);
            buf.put_u8(u8::from(*data_present));
        }
        ErrorKind::FunctionFailure {
            keyspace,
            function,
            arg_types,
        } => {
            write_string(buf, keyspace);
            write_string(buf, function);
            write_string_list(buf, arg_types);
        }
        ErrorKind::WriteFailure {
            consistency,
            received,
            block_for,
            reasons,
            write_type,
        } => {
            write_short(buf, consistency.code());
            write_int(buf, *received);
            write_int(buf, *block_for);
            write_reasons(buf, version, reasons);
            write_string(buf, write_type);
        }
        ErrorKind::CasWriteUnknown {
            consistency,
            received,
            block_for,
        } => {
            write_short(buf, consistency.code());
            write_int(buf, *received);
            write_int(buf, *block_for);
        }
        ErrorKind::AlreadyExists { keyspace, table } => {
            write_string(buf, keyspace);
            write_string(buf, table);
        }
        ErrorKind::Unprepared { id } => write_short_bytes(buf, id),
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════
// RESULT
// ═══════════════════════════════════════════════════════════════════════

const GLOBAL_TABLES_SPEC: i32 = 0x01;
const HAS_MORE_PAGES: i32 = 0x02;
const NO_METADATA: i32 = 0x04;
const METADATA_CHANGED: i32 = 0x08;

/// A column in rows or prepared metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub ty: DataType,
}

impl ColumnSpec {
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        ty: DataType,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            name: name.into(),
            ty,
        }
    }
}

/// Metadata preceding rows, also used as the result part of PREPARED.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowsMetadata {
    pub column_count: usize,
    /// `None` when the NO_METADATA flag is set.
    pub columns: Option<Vec<ColumnSpec>>,
    pub paging_state: Option<Bytes>,
    /// v5: present when METADATA_CHANGED is set.
    pub new_metadata_id: Option<Bytes>,
}

impl RowsMetadata {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            column_count: columns.len(),
            columns: Some(columns),
            paging_state: None,
            new_metadata_id: None,
        }
    }

    fn decode(buf: &mut Bytes, version: ProtocolVersion) -> Result<Self, CodecError> {
        let flags = read_int(buf)?;
        let count = read_int(buf)?;
        if count < 0 {
            return Err(CodecError::Invalid(format!("negative column count {}", count)));
        }
        let paging_state = if flags & HAS_MORE_PAGES != 0 {
            read_bytes(buf)?
        } else {
            None
        };
        let new_metadata_id = if version.has_int_flags() && flags & METADATA_CHANGED != 0 {
            Some(read_short_bytes(buf)?)
        } else {
            None
        };
        let columns = if flags & NO_METADATA != 0 {
            None
        } else {
            Some(decode_column_specs(
                buf,
                count as usize,
                flags & GLOBAL_TABLES_SPEC != 0,
            )?)
        };
        Ok(Self {
            column_count: count as usize,
            columns,
            paging_state,
            new_metadata_id,
        })
    }

    fn encode(&self, buf: &mut BytesMut, version: ProtocolVersion) {
        let global = self.columns.as_deref().and_then(global_table_spec);
        let mut flags = 0;
        if global.is_some() {
            flags |= GLOBAL_TABLES_SPEC;
        }
        if self.paging_state.is_some() {
            flags |= HAS_MORE_PAGES;
        }
        if self.columns.is_none() {
            flags |= NO_METADATA;
        }
        let v5 = version.has_int_flags();
        if v5 && self.new_metadata_id.is_some() {
            flags |= METADATA_CHANGED;
        }
        write_int(buf, flags);
        write_int(buf, self.column_count as i32);
        if let Some(state) = &self.paging_state {
            write_bytes(buf, Some(state));
        }
        if v5 {
            if let Some(id) = &self.new_metadata_id {
                write_short_bytes(buf, id);
            }
        }
        if let Some(columns) = &self.columns {
            encode_column_specs(buf, columns, global);
        }
    }
}

/// The shared keyspace/table, when every column has the same one.
fn global_table_spec(columns: &[ColumnSpec]) -> Option<(&str, &str)> {
    let first = columns.first()?;
    columns
        .iter()
        .all(|c| c.keyspace == first.keyspace && c.table == first.table)
        .then_some((first.keyspace.as_str(), first.table.as_str()))
}

fn decode_column_specs(
    buf: &mut Bytes,
    count: usize,
    global: bool,
) -> Result<Vec<ColumnSpec>, CodecError> {
    let global_spec = if global {
        Some((read_string(buf)?, read_string(buf)?))
    } else {
        None
    };
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        let (keyspace, table) = match &global_spec {
            Some((ks, table)) => (ks.clone(), table.clone()),
            None => (read_string(buf)?, read_string(buf)?),
        };
        let name = read_string(buf)?;
        let ty = DataType::decode(buf)?;
        columns.push(ColumnSpec {
            keyspace,
            table,
            name,
            ty,
        });
    }
    Ok(columns)
}

fn encode_column_specs(buf: &mut BytesMut, columns: &[ColumnSpec], global: Option<(&str, &str)>) {
    if let Some((keyspace, table)) = global {
        write_string(buf, keyspace);
        write_string(buf, table);
    }
    for column in columns {
        if global.is_none() {
            write_string(buf, &column.keyspace);
            write_string(buf, &column.table);
        }
        write_string(buf, &column.name);
        column.ty.encode(buf);
    }
}

/// Rows result: metadata plus raw cell values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rows {
    pub metadata: RowsMetadata,
    pub rows: Vec<Vec<Option<Bytes>>>,
}

/// Bind-variable metadata of a PREPARED result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreparedMetadata {
    /// v4+.
    pub pk_indexes: Vec<u16>,
    pub columns: Vec<ColumnSpec>,
}

impl PreparedMetadata {
    fn decode(buf: &mut Bytes, version: ProtocolVersion) -> Result<Self, CodecError> {
        let flags = read_int(buf)?;
        let count = read_int(buf)?;
        if count < 0 {
            return Err(CodecError::Invalid(format!("negative column count {}", count)));
        }
        let mut pk_indexes = Vec::new();
        if version.0 >= 4 {
            let pk_count = read_int(buf)?;
            for _ in 0..pk_count.max(0) {
                pk_indexes.push(read_short(buf)?);
            }
        }
        let columns = decode_column_specs(buf, count as usize, flags & GLOBAL_TABLES_SPEC != 0)?;
        Ok(Self {
            pk_indexes,
            columns,
        })
    }

    fn encode(&self, buf: &mut BytesMut, version: ProtocolVersion) {
        let global = global_table_spec(&self.columns);
        write_int(
            buf,
            if global.is_some() {
                GLOBAL_TABLES_SPEC
            } else {
                0
            },
        );
        write_int(buf, self.columns.len() as i32);
        if version.0 >= 4 {
            write_int(buf, self.pk_indexes.len() as i32);
            for index in &self.pk_indexes {
                write_short(buf, *index);
            }
        }
        encode_column_specs(buf, &self.columns, global);
    }
}

/// PREPARED result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub id: Bytes,
    /// v5 only.
    pub result_metadata_id: Option<Bytes>,
    pub metadata: PreparedMetadata,
    pub result_metadata: RowsMetadata,
}

/// RESULT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultBody {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared(Prepared),
}

pub(crate) fn decode_result(
    buf: &mut Bytes,
    version: ProtocolVersion,
) -> Result<ResultBody, CodecError> {
    match read_int(buf)? {
        0x0001 => Ok(ResultBody::Void),
        0x0002 => {
            let metadata = RowsMetadata::decode(buf, version)?;
            let row_count = read_int(buf)?;
            let mut rows = Vec::with_capacity(row_count.max(0) as usize);
            for _ in 0..row_count {
                let row = (0..metadata.column_count)
                    .map(|_| read_bytes(buf))
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(row);
            }
            Ok(ResultBody::Rows(Rows { metadata, rows }))
        }
        0x0003 => Ok(ResultBody::SetKeyspace(read_string(buf)?)),
        0x0004 => {
            let id = read_short_bytes(buf)?;
            let result_metadata_id = if version.has_int_flags() {
                Some(read_short_bytes(buf)?)
            } else {
                None
            };
            let metadata = PreparedMetadata::decode(buf, version)?;
            let result_metadata = RowsMetadata::decode(buf, version)?;
            Ok(ResultBody::Prepared(Prepared {
                id,
                result_metadata_id,
                metadata,
                result_metadata,
            }))
        }
        other => Err(CodecError::Invalid(format!("unknown result kind {}", other))),
    }
}

pub(crate) fn encode_result(body: &ResultBody, buf: &mut BytesMut, version: ProtocolVersion) {
    match body {
        ResultBody::Void => write_int(buf, 0x0001),
        ResultBody::Rows(rows) => {
            write_int(buf, 0x0002);
            rows.metadata.encode(buf, version);
            write_int(buf, rows.rows.len() as i32);
            for row in &rows.rows {
                for cell in row {
                    write_bytes(buf, cell.as_deref());
                }
            }
        }
        ResultBody::SetKeyspace(keyspace) => {
            write_int(buf, 0x0003);
            write_string(buf, keyspace);
        }
        ResultBody::Prepared(prepared) => {
            write_int(buf, 0x0004);
            write_short_bytes(buf, &prepared.id);
            if version.has_int_flags() {
                write_short_bytes(
                    buf,
                    prepared.result_metadata_id.as_deref().unwrap_or_default(),
                );
            }
            prepared.metadata.encode(buf, version);
            prepared.result_metadata.encode(buf, version);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Small bodies
// ═══════════════════════════════════════════════════════════════════════

/// SUPPORTED.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Supported {
    pub options: BTreeMap<String, Vec<String>>,
}

/// AUTHENTICATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticate {
    pub authenticator: String,
}

/// Token carried by AUTH_CHALLENGE and AUTH_SUCCESS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthToken {
    pub token: Option<Bytes>,
}

pub(crate) fn decode_supported(buf: &mut Bytes) -> Result<Supported, CodecError> {
    Ok(Supported {
        options: read_string_multimap(buf)?,
    })
}

pub(crate) fn encode_supported(body: &Supported, buf: &mut BytesMut) {
    write_string_multimap(buf, &body.options);
}

pub(crate) fn decode_token(buf: &mut Bytes) -> Result<AuthToken, CodecError> {
    Ok(AuthToken {
        token: read_bytes(buf)?,
    })
}

pub(crate) fn encode_token(body: &AuthToken, buf: &mut BytesMut) {
    write_bytes(buf, body.token.as_deref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_timeout_cas_contentions_only_in_v5() {
        let body = ErrorBody::new(
            ErrorKind::WriteTimeout {
                consistency: Consistency::Serial,
                received: 1,
                block_for: 2,
                write_type: "CAS".to_string(),
                contentions: Some(3),
            },
            "timeout",
        );
        let mut v5 = BytesMut::new();
        encode_error(&body, &mut v5, ProtocolVersion::V5);
        let mut v4 = BytesMut::new();
        encode_error(&body, &mut v4, ProtocolVersion::V4);
        assert_eq!(v5.len(), v4.len() + 2);
        assert_eq!(decode_error(&mut v5.freeze(), ProtocolVersion::V5).unwrap(), body);
    }

    #[test]
    fn test_read_failure_reason_map_v5() {
        let body = ErrorBody::new(
            ErrorKind::ReadFailure {
                consistency: Consistency::LocalQuorum,
                received: 1,
                block_for: 2,
                reasons: vec![("10.0.0.2".parse().unwrap(), 0x0001)],
                data_present: true,
            },
            "read failed",
        );
        let mut buf = BytesMut::new();
        encode_error(&body, &mut buf, ProtocolVersion::V5);
        assert_eq!(decode_error(&mut buf.freeze(), ProtocolVersion::V5).unwrap(), body);
    }

    #[test]
    fn test_rows_use_global_table_spec() {
        let rows = ResultBody::Rows(Rows {
            metadata: RowsMetadata::new(vec![
                ColumnSpec::new("ks", "t", "k", DataType::Int),
                ColumnSpec::new("ks", "t", "v", DataType::Varchar),
            ]),
            rows: vec![vec![Some(Bytes::from_static(&[0, 0, 0, 1])), None]],
        });
        let mut buf = BytesMut::new();
        encode_result(&rows, &mut buf, ProtocolVersion::V4);
        // kind, then flags with GLOBAL_TABLES_SPEC
        assert_eq!(&buf[4..8], &[0, 0, 0, 1]);
        assert_eq!(decode_result(&mut buf.freeze(), ProtocolVersion::V4).unwrap(), rows);
    }

    #[test]
    fn test_prepared_v5_has_result_metadata_id() {
        let prepared = ResultBody::Prepared(Prepared {
            id: Bytes::from_static(&[1; 16]),
            result_metadata_id: Some(Bytes::from_static(&[2; 16])),
            metadata: PreparedMetadata {
                pk_indexes: vec![0],
                columns: vec![ColumnSpec::new("ks", "t", "k", DataType::Int)],
            },
            result_metadata: RowsMetadata::new(vec![]),
        });
        let mut buf = BytesMut::new();
        encode_result(&prepared, &mut buf, ProtocolVersion::V5);
        assert_eq!(
            decode_result(&mut buf.freeze(), ProtocolVersion::V5).unwrap(),
            prepared
        );
    }
}
