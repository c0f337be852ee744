//! CQL data types and their `[option]` encoding.

use crate::wire::{read_short, read_string, write_short, write_string};
use crate::{CodecError, ValueError};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A column or bind-variable type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    Duration,
    List(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Set(Box<DataType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, DataType)>,
    },
    Tuple(Vec<DataType>),
}

impl DataType {
    /// Parse a CQL type name such as `text`, `frozen<list<int>>` or
    /// `map<text, tuple<int, uuid>>`.
    ///
    /// User-defined types cannot be named this way; build them directly.
    pub fn parse(input: &str) -> Result<Self, ValueError> {
        let mut parser = TypeParser {
            input,
            rest: input.trim(),
        };
        let ty = parser.parse_type()?;
        if !parser.rest.trim().is_empty() {
            return Err(ValueError::InvalidTypeName(input.to_string()));
        }
        Ok(ty)
    }

    /// Write the `[option]` describing this type.
    pub fn encode(&self, buf: &mut BytesMut) {
        write_short(buf, self.option_id());
        match self {
            DataType::Custom(class) => write_string(buf, class),
            DataType::List(elem) | DataType::Set(elem) => elem.encode(buf),
            DataType::Map(key, value) => {
                key.encode(buf);
                value.encode(buf);
            }
            DataType::Udt {
                keyspace,
                name,
                fields,
            } => {
                write_string(buf, keyspace);
                write_string(buf, name);
                write_short(buf, fields.len() as u16);
                for (field, ty) in fields {
                    write_string(buf, field);
                    ty.encode(buf);
                }
            }
            DataType::Tuple(types) => {
                write_short(buf, types.len() as u16);
                for ty in types {
                    ty.encode(buf);
                }
            }
            _ => {}
        }
    }

    /// Read an `[option]`.
    pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let id = read_short(buf)?;
        Ok(match id {
            0x0000 => DataType::Custom(read_string(buf)?),
            0x0001 => DataType::Ascii,
            0x0002 => DataType::Bigint,
            0x0003 => DataType::Blob,
            0x0004 => DataType::Boolean,
            0x0005 => DataType::Counter,
            0x0006 => DataType::Decimal,
            0x0007 => DataType::Double,
            0x0008 => DataType::Float,
            0x0009 => DataType::Int,
            0x000B => DataType::Timestamp,
            0x000C => DataType::Uuid,
            0x000D => DataType::Varchar,
            0x000E => DataType::Varint,
            0x000F => DataType::Timeuuid,
            0x0010 => DataType::Inet,
            0x0011 => DataType::Date,
            0x0012 => DataType::Time,
            0x0013 => DataType::Smallint,
            0x0014 => DataType::Tinyint,
            0x0015 => DataType::Duration,
            0x0020 => DataType::List(Box::new(Self::decode(buf)?)),
            0x0021 => {
                let key = Self::decode(buf)?;
                DataType::Map(Box::new(key), Box::new(Self::decode(buf)?))
            }
            0x0022 => DataType::Set(Box::new(Self::decode(buf)?)),
            0x0030 => {
                let keyspace = read_string(buf)?;
                let name = read_string(buf)?;
                let n = read_short(buf)?;
                let mut fields = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let field = read_string(buf)?;
                    fields.push((field, Self::decode(buf)?));
                }
                DataType::Udt {
                    keyspace,
                    name,
                    fields,
                }
            }
            0x0031 => {
                let n = read_short(buf)?;
                let types = (0..n)
                    .map(|_| Self::decode(buf))
                    .collect::<Result<Vec<_>, _>>()?;
                DataType::Tuple(types)
            }
            other => {
                return Err(CodecError::Invalid(format!(
                    "unknown type option 0x{:04x}",
                    other
                )))
            }
        })
    }

    fn option_id(&self) -> u16 {
        match self {
            DataType::Custom(_) => 0x0000,
            DataType::Ascii => 0x0001,
            DataType::Bigint => 0x0002,
            DataType::Blob => 0x0003,
            DataType::Boolean => 0x0004,
            DataType::Counter => 0x0005,
            DataType::Decimal => 0x0006,
            DataType::Double => 0x0007,
            DataType::Float => 0x0008,
            DataType::Int => 0x0009,
            DataType::Timestamp => 0x000B,
            DataType::Uuid => 0x000C,
            DataType::Varchar => 0x000D,
            DataType::Varint => 0x000E,
            DataType::Timeuuid => 0x000F,
            DataType::Inet => 0x0010,
            DataType::Date => 0x0011,
            DataType::Time => 0x0012,
            DataType::Smallint => 0x0013,
            DataType::Tinyint => 0x0014,
            DataType::Duration => 0x0015,
            DataType::List(_) => 0x0020,
            DataType::Map(_, _) => 0x0021,
            DataType::Set(_) => 0x0022,
            DataType::Udt { .. } => 0x0030,
            DataType::Tuple(_) => 0x0031,
        }
    }

    fn simple(name: &str) -> Option<Self> {
        Some(match name {
            "ascii" => DataType::Ascii,
            "bigint" => DataType::Bigint,
            "blob" => DataType::Blob,
            "boolean" => DataType::Boolean,
            "counter" => DataType::Counter,
            "decimal" => DataType::Decimal,
            "double" => DataType::Double,
            "float" => DataType::Float,
            "int" => DataType::Int,
            "timestamp" => DataType::Timestamp,
            "uuid" => DataType::Uuid,
            "text" | "varchar" => DataType::Varchar,
            "varint" => DataType::Varint,
            "timeuuid" => DataType::Timeuuid,
            "inet" => DataType::Inet,
            "date" => DataType::Date,
            "time" => DataType::Time,
            "smallint" => DataType::Smallint,
            "tinyint" => DataType::Tinyint,
            "duration" => DataType::Duration,
            _ => return None,
        })
    }
}

struct TypeParser<'a> {
    input: &'a str,
    rest: &'a str,
}

impl<'a> TypeParser<'a> {
    fn error(&self) -> ValueError {
        ValueError::InvalidTypeName(self.input.to_string())
    }

    fn name(&mut self) -> &'a str {
        let rest = self.rest.trim_start();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        let (name, tail) = rest.split_at(end);
        self.rest = tail;
        name
    }

    fn eat(&mut self, c: char) -> bool {
        let rest = self.rest.trim_start();
        match rest.strip_prefix(c) {
            Some(tail) => {
                self.rest = tail;
                true
            }
            None => false,
        }
    }

    fn args(&mut self) -> Result<Vec<DataType>, ValueError> {
        if !self.eat('<') {
            return Err(self.error());
        }
        let mut args = vec![self.parse_type()?];
        while self.eat(',') {
            args.push(self.parse_type()?);
        }
        if !self.eat('>') {
            return Err(self.error());
        }
        Ok(args)
    }

    fn parse_type(&mut self) -> Result<DataType, ValueError> {
        let raw = self.name();
        if raw.is_empty() {
            return Err(self.error());
        }
        let name = raw.to_ascii_lowercase();
        if let Some(ty) = DataType::simple(&name) {
            return Ok(ty);
        }
        match name.as_str() {
            "frozen" => {
                let mut args = self.args()?;
                match (args.pop(), args.is_empty()) {
                    (Some(inner), true) => Ok(inner),
                    _ => Err(self.error()),
                }
            }
            "list" | "set" => {
                let mut args = self.args()?;
                match (args.pop(), args.is_empty()) {
                    (Some(elem), true) if name == "list" => Ok(DataType::List(Box::new(elem))),
                    (Some(elem), true) => Ok(DataType::Set(Box::new(elem))),
                    _ => Err(self.error()),
                }
            }
            "map" => {
                let args = self.args()?;
                let mut args = args.into_iter();
                match (args.next(), args.next(), args.next()) {
                    (Some(key), Some(value), None) => {
                        Ok(DataType::Map(Box::new(key), Box::new(value)))
                    }
                    _ => Err(self.error()),
                }
            }
            "tuple" => Ok(DataType::Tuple(self.args()?)),
            // Fully qualified Java class names denote custom types.
            _ if raw.contains('.') => Ok(DataType::Custom(raw.to_string())),
            _ => Err(self.error()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Custom(class) => write!(f, "{}", class),
            DataType::Ascii => f.write_str("ascii"),
            DataType::Bigint => f.write_str("bigint"),
            DataType::Blob => f.write_str("blob"),
            DataType::Boolean => f.write_str("boolean"),
            DataType::Counter => f.write_str("counter"),
            DataType::Decimal => f.write_str("decimal"),
            DataType::Double => f.write_str("double"),
            DataType::Float => f.write_str("float"),
            DataType::Int => f.write_str("int"),
            DataType::Timestamp => f.write_str("timestamp"),
            DataType::Uuid => f.write_str("uuid"),
            DataType::Varchar => f.write_str("varchar"),
            DataType::Varint => f.write_str("varint"),
            DataType::Timeuuid => f.write_str("timeuuid"),
            DataType::Inet => f.write_str("inet"),
            DataType::Date => f.write_str("date"),
            DataType::Time => f.write_str("time"),
            DataType::Smallint => f.write_str("smallint"),
            DataType::Tinyint => f.write_str("tinyint"),
            DataType::Duration => f.write_str("duration"),
            DataType::List(elem) => write!(f, "list<{}>", elem),
            DataType::Set(elem) => write!(f, "set<{}>", elem),
            DataType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            DataType::Udt { keyspace, name, .. } => write!(f, "{}.{}", keyspace, name),
            DataType::Tuple(types) => {
                f.write_str("tuple<")?;
                for (i, ty) in types.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", ty)?;
                }
                f.write_str(">")
            }
        }
    }
}

impl FromStr for DataType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::parse(s)
    }
}

impl TryFrom<String> for DataType {
    type Error = ValueError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        DataType::parse(&s)
    }
}

impl From<DataType> for String {
    fn from(ty: DataType) -> Self {
        ty.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let ty = DataType::parse("map<text, frozen<list<int>>>").unwrap();
        assert_eq!(
            ty,
            DataType::Map(
                Box::new(DataType::Varchar),
                Box::new(DataType::List(Box::new(DataType::Int)))
            )
        );
        assert_eq!(ty.to_string(), "map<varchar, list<int>>");
    }

    #[test]
    fn test_parse_tuple_and_custom() {
        assert_eq!(
            DataType::parse("tuple<int, uuid>").unwrap(),
            DataType::Tuple(vec![DataType::Int, DataType::Uuid])
        );
        assert_eq!(
            DataType::parse("org.apache.cassandra.db.marshal.BytesType").unwrap(),
            DataType::Custom("org.apache.cassandra.db.marshal.BytesType".to_string())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(DataType::parse("list<int").is_err());
        assert!(DataType::parse("map<int>").is_err());
        assert!(DataType::parse("nosuchtype").is_err());
        assert!(DataType::parse("int extra").is_err());
    }

    #[test]
    fn test_option_encoding_of_udt() {
        let ty = DataType::Udt {
            keyspace: "ks".to_string(),
            name: "address".to_string(),
            fields: vec![
                ("street".to_string(), DataType::Varchar),
                ("zip".to_string(), DataType::Int),
            ],
        };
        let mut buf = BytesMut::new();
        ty.encode(&mut buf);
        assert_eq!(&buf[..2], &[0x00, 0x30]);
        assert_eq!(DataType::decode(&mut buf.freeze()).unwrap(), ty);
    }
}
