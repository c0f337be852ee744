//! Loosely typed CQL values and their serialization for a given [`DataType`].
//!
//! Primes are written by hand, so values are kept close to what a JSON
//! document can express: integers, floats, strings, booleans, byte strings,
//! lists and maps. The column type decides how a value is laid out on the
//! wire, e.g. `Text("10.0.0.1")` for an `inet` or `Text("0x0aff")` for a blob.

use crate::DataType;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::IpAddr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while converting a value to its wire form.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("Cannot encode {value} as {ty}")]
    TypeMismatch { ty: String, value: String },

    #[error("Value {value} out of range for {ty}")]
    OutOfRange { ty: String, value: String },

    #[error("Invalid type name: {0}")]
    InvalidTypeName(String),

    #[error("Null element in {0}")]
    NullElement(String),
}

/// A value as written in a prime.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
}

impl CqlValue {
    /// Serialize for `ty`. `Null` encodes as `None`.
    pub fn encode(&self, ty: &DataType) -> Result<Option<Bytes>, ValueError> {
        if matches!(self, CqlValue::Null) {
            return Ok(None);
        }
        let mut buf = BytesMut::new();
        self.encode_into(ty, &mut buf)?;
        Ok(Some(buf.freeze()))
    }

    fn mismatch(&self, ty: &DataType) -> ValueError {
        ValueError::TypeMismatch {
            ty: ty.to_string(),
            value: format!("{:?}", self),
        }
    }

    fn out_of_range(&self, ty: &DataType) -> ValueError {
        ValueError::OutOfRange {
            ty: ty.to_string(),
            value: format!("{:?}", self),
        }
    }

    fn as_i64(&self, ty: &DataType) -> Result<i64, ValueError> {
        match self {
            CqlValue::Int(v) => Ok(*v),
            CqlValue::Text(s) => s.trim().parse().map_err(|_| self.mismatch(ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn as_f64(&self, ty: &DataType) -> Result<f64, ValueError> {
        match self {
            CqlValue::Float(v) => Ok(*v),
            CqlValue::Int(v) => Ok(*v as f64),
            CqlValue::Text(s) => s.trim().parse().map_err(|_| self.mismatch(ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn as_blob(&self, ty: &DataType) -> Result<Vec<u8>, ValueError> {
        match self {
            CqlValue::Bytes(b) => Ok(b.clone()),
            CqlValue::Text(s) => decode_hex(s).ok_or_else(|| self.mismatch(ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn encode_into(&self, ty: &DataType, buf: &mut BytesMut) -> Result<(), ValueError> {
        match ty {
            DataType::Ascii => match self {
                CqlValue::Text(s) if s.is_ascii() => buf.put_slice(s.as_bytes()),
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Varchar => match self {
                CqlValue::Text(s) => buf.put_slice(s.as_bytes()),
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Boolean => match self {
                CqlValue::Bool(b) => buf.put_u8(u8::from(*b)),
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Bigint | DataType::Counter | DataType::Timestamp | DataType::Time => {
                buf.put_i64(self.as_i64(ty)?)
            }
            DataType::Int => {
                let v = i32::try_from(self.as_i64(ty)?).map_err(|_| self.out_of_range(ty))?;
                buf.put_i32(v);
            }
            DataType::Smallint => {
                let v = i16::try_from(self.as_i64(ty)?).map_err(|_| self.out_of_range(ty))?;
                buf.put_i16(v);
            }
            DataType::Tinyint => {
                let v = i8::try_from(self.as_i64(ty)?).map_err(|_| self.out_of_range(ty))?;
                buf.put_i8(v);
            }
            DataType::Date => {
                // Days since epoch, centered on 2^31.
                let days = self.as_i64(ty)?;
                let raw = u32::try_from(days + (1i64 << 31)).map_err(|_| self.out_of_range(ty))?;
                buf.put_u32(raw);
            }
            DataType::Varint => buf.put_slice(&varint_bytes(self.as_i64(ty)?)),
            DataType::Double => buf.put_f64(self.as_f64(ty)?),
            DataType::Float => buf.put_f32(self.as_f64(ty)? as f32),
            DataType::Decimal => {
                let (scale, unscaled) = self.decimal_parts(ty)?;
                buf.put_i32(scale);
                buf.put_slice(&varint_bytes(unscaled));
            }
            DataType::Blob | DataType::Custom(_) => buf.put_slice(&self.as_blob(ty)?),
            DataType::Uuid | DataType::Timeuuid => match self {
                CqlValue::Text(s) => {
                    let uuid = Uuid::parse_str(s).map_err(|_| self.mismatch(ty))?;
                    buf.put_slice(uuid.as_bytes());
                }
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Inet => match self {
                CqlValue::Text(s) => match s.parse::<IpAddr>() {
                    Ok(IpAddr::V4(v4)) => buf.put_slice(&v4.octets()),
                    Ok(IpAddr::V6(v6)) => buf.put_slice(&v6.octets()),
                    Err(_) => return Err(self.mismatch(ty)),
                },
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Duration => match self {
                CqlValue::List(parts) if parts.len() == 3 => {
                    for part in parts {
                        put_vint(buf, part.as_i64(ty)?);
                    }
                }
                _ => return Err(self.mismatch(ty)),
            },
            DataType::List(elem) | DataType::Set(elem) => match self {
                CqlValue::List(items) => {
                    buf.put_i32(items.len() as i32);
                    for item in items {
                        let bytes = item
                            .encode(elem)?
                            .ok_or_else(|| ValueError::NullElement(ty.to_string()))?;
                        put_bytes(buf, &bytes);
                    }
                }
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Map(key_ty, value_ty) => match self {
                CqlValue::Map(entries) => {
                    buf.put_i32(entries.len() as i32);
                    for (key, value) in entries {
                        let key = key
                            .encode(key_ty)?
                            .ok_or_else(|| ValueError::NullElement(ty.to_string()))?;
                        put_bytes(buf, &key);
                        match value.encode(value_ty)? {
                            Some(value) => put_bytes(buf, &value),
                            None => buf.put_i32(-1),
                        }
                    }
                }
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Tuple(types) => match self {
                CqlValue::List(items) if items.len() == types.len() => {
                    for (item, item_ty) in items.iter().zip(types) {
                        match item.encode(item_ty)? {
                            Some(bytes) => put_bytes(buf, &bytes),
                            None => buf.put_i32(-1),
                        }
                    }
                }
                _ => return Err(self.mismatch(ty)),
            },
            DataType::Udt { fields, .. } => match self {
                CqlValue::Map(entries) => {
                    for (field, field_ty) in fields {
                        let value = entries.iter().find_map(|(k, v)| match k {
                            CqlValue::Text(name) if name == field => Some(v),
                            _ => None,
                        });
                        match value.map(|v| v.encode(field_ty)).transpose()?.flatten() {
                            Some(bytes) => put_bytes(buf, &bytes),
                            None => buf.put_i32(-1),
                        }
                    }
                }
                _ => return Err(self.mismatch(ty)),
            },
        }
        Ok(())
    }

    fn decimal_parts(&self, ty: &DataType) -> Result<(i32, i64), ValueError> {
        let text = match self {
            CqlValue::Int(v) => return Ok((0, *v)),
            CqlValue::Float(v) => v.to_string(),
            CqlValue::Text(s) => s.trim().to_string(),
            _ => return Err(self.mismatch(ty)),
        };
        let (int_part, frac_part) = text.split_once('.').unwrap_or((&text, ""));
        let digits = format!("{}{}", int_part, frac_part);
        let unscaled: i64 = digits.parse().map_err(|_| self.mismatch(ty))?;
        Ok((frac_part.len() as i32, unscaled))
    }
}

impl From<&str> for CqlValue {
    fn from(s: &str) -> Self {
        CqlValue::Text(s.to_string())
    }
}

impl From<String> for CqlValue {
    fn from(s: String) -> Self {
        CqlValue::Text(s)
    }
}

impl From<i64> for CqlValue {
    fn from(v: i64) -> Self {
        CqlValue::Int(v)
    }
}

impl From<i32> for CqlValue {
    fn from(v: i32) -> Self {
        CqlValue::Int(v as i64)
    }
}

impl From<bool> for CqlValue {
    fn from(v: bool) -> Self {
        CqlValue::Bool(v)
    }
}

impl From<f64> for CqlValue {
    fn from(v: f64) -> Self {
        CqlValue::Float(v)
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_i32(bytes.len() as i32);
    buf.put_slice(bytes);
}

/// Minimal big-endian two's complement encoding.
fn varint_bytes(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let b = bytes[start];
        let next_high = bytes[start + 1] & 0x80;
        if (b == 0x00 && next_high == 0) || (b == 0xFF && next_high != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

/// Zig-zag encoded unsigned vint, as used by `duration`.
fn put_vint(buf: &mut BytesMut, v: i64) {
    let mut n = ((v << 1) ^ (v >> 63)) as u64;
    let mut out = Vec::with_capacity(9);
    // first byte carries the count of extra bytes as leading ones
    let mut size = 1;
    while size < 9 && n >= 1u64 << (7 * size) {
        size += 1;
    }
    if size == 9 {
        out.push(0xFF);
        out.extend_from_slice(&n.to_be_bytes());
    } else {
        let extra = size - 1;
        let mut tail = Vec::with_capacity(extra);
        for _ in 0..extra {
            tail.push((n & 0xFF) as u8);
            n >>= 8;
        }
        let mask = !(0xFFu8 >> extra);
        out.push(mask | n as u8);
        out.extend(tail.into_iter().rev());
    }
    buf.put_slice(&out);
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(value: CqlValue, ty: &str) -> Vec<u8> {
        value
            .encode(&DataType::parse(ty).unwrap())
            .unwrap()
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(enc("abc".into(), "text"), b"abc".to_vec());
        assert_eq!(enc(1.into(), "int"), vec![0, 0, 0, 1]);
        assert_eq!(enc(CqlValue::Text("7".into()), "bigint"), vec![0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(enc(true.into(), "boolean"), vec![1]);
        assert_eq!(enc("0x0aff".into(), "blob"), vec![0x0a, 0xff]);
        assert_eq!(enc("10.0.0.1".into(), "inet"), vec![10, 0, 0, 1]);
        assert_eq!(enc(0.into(), "date"), vec![0x80, 0, 0, 0]);
    }

    #[test]
    fn test_varint_minimal() {
        assert_eq!(varint_bytes(0), vec![0x00]);
        assert_eq!(varint_bytes(127), vec![0x7F]);
        assert_eq!(varint_bytes(128), vec![0x00, 0x80]);
        assert_eq!(varint_bytes(-1), vec![0xFF]);
        assert_eq!(varint_bytes(-129), vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_decimal() {
        // scale 2, unscaled 12345
        assert_eq!(enc("123.45".into(), "decimal"), vec![0, 0, 0, 2, 0x30, 0x39]);
    }

    #[test]
    fn test_duration_vints() {
        // 1 month, 2 days, 3 nanos -> zig-zag 2, 4, 6
        assert_eq!(
            enc(CqlValue::List(vec![1.into(), 2.into(), 3.into()]), "duration"),
            vec![2, 4, 6]
        );
        let mut buf = BytesMut::new();
        put_vint(&mut buf, 100);
        // zig-zag 200 needs a second byte
        assert_eq!(buf.to_vec(), vec![0x80, 200]);
    }

    #[test]
    fn test_collections() {
        let list = enc(CqlValue::List(vec![1.into(), 2.into()]), "list<int>");
        assert_eq!(
            list,
            vec![0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 2]
        );

        let map = enc(
            CqlValue::Map(vec![("a".into(), CqlValue::Null)]),
            "map<text, int>",
        );
        assert_eq!(map, vec![0, 0, 0, 1, 0, 0, 0, 1, b'a', 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_mismatch_and_range() {
        let ty = DataType::parse("tinyint").unwrap();
        assert!(matches!(
            CqlValue::Int(300).encode(&ty),
            Err(ValueError::OutOfRange { .. })
        ));
        assert!(matches!(
            CqlValue::Bool(true).encode(&DataType::Int),
            Err(ValueError::TypeMismatch { .. })
        ));
        assert!(matches!(
            CqlValue::List(vec![CqlValue::Null]).encode(&DataType::List(Box::new(DataType::Int))),
            Err(ValueError::NullElement(_))
        ));
        assert_eq!(CqlValue::Null.encode(&DataType::Int).unwrap(), None);
    }
}
