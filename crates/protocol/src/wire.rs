//! Primitive notations of the native protocol.
//!
//! # Notation
//!
//! ```text
//! [short]         2-byte signed integer, big-endian
//! [int]           4-byte signed integer
//! [long]          8-byte signed integer
//! [string]        [short] n, then n bytes of UTF-8
//! [long string]   [int] n, then n bytes of UTF-8
//! [bytes]         [int] n, then n bytes; n < 0 means null
//! [short bytes]   [short] n, then n bytes
//! [value]         [int] n, then n bytes; -1 is null, -2 is "not set"
//! [inet]          [byte] size (4 or 16), address bytes, [int] port
//! ```
//!
//! Readers consume from a [`Bytes`] cursor and fail with
//! [`CodecError::Truncated`] instead of panicking on short input.

use crate::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use uuid::Uuid;

/// A bound value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Null,
    /// Protocol v4+: leave the bound variable untouched.
    Unset,
    Set(Bytes),
}

impl RawValue {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RawValue::Set(bytes) => Some(bytes),
            _ => None,
        }
    }
}

fn ensure(buf: &Bytes, n: usize, what: &'static str) -> Result<(), CodecError> {
    if buf.remaining() < n {
        return Err(CodecError::Truncated(what));
    }
    Ok(())
}

fn utf8(bytes: Bytes, what: &'static str) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8(what))
}

// ─── Readers ───

pub fn read_byte(buf: &mut Bytes) -> Result<u8, CodecError> {
    ensure(buf, 1, "byte")?;
    Ok(buf.get_u8())
}

pub fn read_short(buf: &mut Bytes) -> Result<u16, CodecError> {
    ensure(buf, 2, "short")?;
    Ok(buf.get_u16())
}

pub fn read_int(buf: &mut Bytes) -> Result<i32, CodecError> {
    ensure(buf, 4, "int")?;
    Ok(buf.get_i32())
}

pub fn read_long(buf: &mut Bytes) -> Result<i64, CodecError> {
    ensure(buf, 8, "long")?;
    Ok(buf.get_i64())
}

pub fn read_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let len = read_short(buf)? as usize;
    ensure(buf, len, "string")?;
    utf8(buf.split_to(len), "string")
}

pub fn read_long_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let len = read_int(buf)?;
    if len < 0 {
        return Err(CodecError::Invalid(format!("negative long string length {}", len)));
    }
    ensure(buf, len as usize, "long string")?;
    utf8(buf.split_to(len as usize), "long string")
}

pub fn read_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, CodecError> {
    let len = read_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    ensure(buf, len as usize, "bytes")?;
    Ok(Some(buf.split_to(len as usize)))
}

pub fn read_short_bytes(buf: &mut Bytes) -> Result<Bytes, CodecError> {
    let len = read_short(buf)? as usize;
    ensure(buf, len, "short bytes")?;
    Ok(buf.split_to(len))
}

pub fn read_value(buf: &mut Bytes) -> Result<RawValue, CodecError> {
    let len = read_int(buf)?;
    match len {
        -1 => Ok(RawValue::Null),
        -2 => Ok(RawValue::Unset),
        n if n < 0 => Err(CodecError::Invalid(format!("invalid value length {}", n))),
        n => {
            ensure(buf, n as usize, "value")?;
            Ok(RawValue::Set(buf.split_to(n as usize)))
        }
    }
}

pub fn read_string_list(buf: &mut Bytes) -> Result<Vec<String>, CodecError> {
    let n = read_short(buf)?;
    (0..n).map(|_| read_string(buf)).collect()
}

pub fn read_string_map(buf: &mut Bytes) -> Result<BTreeMap<String, String>, CodecError> {
    let n = read_short(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let key = read_string(buf)?;
        map.insert(key, read_string(buf)?);
    }
    Ok(map)
}

pub fn read_string_multimap(buf: &mut Bytes) -> Result<BTreeMap<String, Vec<String>>, CodecError> {
    let n = read_short(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let key = read_string(buf)?;
        map.insert(key, read_string_list(buf)?);
    }
    Ok(map)
}

pub fn read_bytes_map(buf: &mut Bytes) -> Result<BTreeMap<String, Bytes>, CodecError> {
    let n = read_short(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..n {
        let key = read_string(buf)?;
        let value = read_bytes(buf)?.unwrap_or_default();
        map.insert(key, value);
    }
    Ok(map)
}

pub fn read_uuid(buf: &mut Bytes) -> Result<Uuid, CodecError> {
    ensure(buf, 16, "uuid")?;
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

pub fn read_inet_addr(buf: &mut Bytes) -> Result<IpAddr, CodecError> {
    let size = read_byte(buf)?;
    match size {
        4 => {
            ensure(buf, 4, "inet")?;
            let mut raw = [0u8; 4];
            buf.copy_to_slice(&mut raw);
            Ok(IpAddr::V4(Ipv4Addr::from(raw)))
        }
        16 => {
            ensure(buf, 16, "inet")?;
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            Ok(IpAddr::V6(Ipv6Addr::from(raw)))
        }
        n => Err(CodecError::Invalid(format!("invalid inet size {}", n))),
    }
}

pub fn read_inet(buf: &mut Bytes) -> Result<SocketAddr, CodecError> {
    let ip = read_inet_addr(buf)?;
    let port = read_int(buf)?;
    Ok(SocketAddr::new(ip, port as u16))
}

// ─── Writers ───

pub fn write_short(buf: &mut BytesMut, v: u16) {
    buf.put_u16(v);
}

pub fn write_int(buf: &mut BytesMut, v: i32) {
    buf.put_i32(v);
}

pub fn write_long(buf: &mut BytesMut, v: i64) {
    buf.put_i64(v);
}

pub fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

pub fn write_long_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

pub fn write_bytes(buf: &mut BytesMut, bytes: Option<&[u8]>) {
    match bytes {
        Some(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
        None => buf.put_i32(-1),
    }
}

pub fn write_short_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

pub fn write_value(buf: &mut BytesMut, value: &RawValue) {
    match value {
        RawValue::Null => buf.put_i32(-1),
        RawValue::Unset => buf.put_i32(-2),
        RawValue::Set(bytes) => write_bytes(buf, Some(bytes)),
    }
}

pub fn write_string_list(buf: &mut BytesMut, list: &[String]) {
    buf.put_u16(list.len() as u16);
    for s in list {
        write_string(buf, s);
    }
}

pub fn write_string_map(buf: &mut BytesMut, map: &BTreeMap<String, String>) {
    buf.put_u16(map.len() as u16);
    for (k, v) in map {
        write_string(buf, k);
        write_string(buf, v);
    }
}

pub fn write_string_multimap(buf: &mut BytesMut, map: &BTreeMap<String, Vec<String>>) {
    buf.put_u16(map.len() as u16);
    for (k, v) in map {
        write_string(buf, k);
        write_string_list(buf, v);
    }
}

pub fn write_bytes_map(buf: &mut BytesMut, map: &BTreeMap<String, Bytes>) {
    buf.put_u16(map.len() as u16);
    for (k, v) in map {
        write_string(buf, k);
        write_bytes(buf, Some(v));
    }
}

pub fn write_uuid(buf: &mut BytesMut, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

pub fn write_inet_addr(buf: &mut BytesMut, ip: &IpAddr) {
    match ip {
        IpAddr::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(16);
            buf.put_slice(&v6.octets());
        }
    }
}

pub fn write_inet(buf: &mut BytesMut, addr: &SocketAddr) {
    write_inet_addr(buf, &addr.ip());
    buf.put_i32(addr.port() as i32);
}
