use crate::decoding::{Read, Cursor};
use crate::encoding::{Write, EncoderV1};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// A JSON-compatible dynamically typed value, used as the payload of
/// `ItemContent::Any` and as the building block of legacy `ItemContent::JSON`
/// content. Mirrors the subset of JSON that Yjs can transmit over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Any {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    String(Box<str>),
    Buffer(Box<[u8]>),
    Array(Vec<Any>),
    Map(Box<HashMap<String, Any>>),
}

/// One prefix byte per encoded value. Tags count down from 127 so that the
/// decoder can compute `127 - tag` as a dense dispatch index.
mod tag {
    pub const UNDEFINED: u8 = 127;
    pub const NULL: u8 = 126;
    pub const INT32: u8 = 125;
    pub const F32: u8 = 124;
    pub const F64: u8 = 123;
    pub const I64: u8 = 122;
    pub const FALSE: u8 = 121;
    pub const TRUE: u8 = 120;
    pub const STRING: u8 = 119;
    pub const OBJECT: u8 = 118;
    pub const ARRAY: u8 = 117;
    pub const BINARY: u8 = 116;
}

impl Any {
    /// Encodes a single tagged value, choosing the most compact numeric
    /// representation available: integers that fit in an `i32` are encoded
    /// as `INT32`, otherwise as `F64` (or `I64` for [Any::BigInt]).
    pub fn encode<W: Write>(&self, encoder: &mut W) {
        match self {
            Any::Undefined => encoder.write_u8(tag::UNDEFINED),
            Any::Null => encoder.write_u8(tag::NULL),
            Any::Bool(false) => encoder.write_u8(tag::FALSE),
            Any::Bool(true) => encoder.write_u8(tag::TRUE),
            Any::Number(n) => {
                if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    encoder.write_u8(tag::INT32);
                    encoder.write_var_i64(*n as i64);
                } else {
                    encoder.write_u8(tag::F64);
                    encoder.write_f64(*n);
                }
            }
            Any::BigInt(i) => {
                encoder.write_u8(tag::I64);
                encoder.write_i64(*i);
            }
            Any::String(s) => {
                encoder.write_u8(tag::STRING);
                encoder.write_string(s);
            }
            Any::Buffer(b) => {
                encoder.write_u8(tag::BINARY);
                encoder.write_buf(b);
            }
            Any::Array(items) => {
                encoder.write_u8(tag::ARRAY);
                encoder.write_var_u64(items.len() as u64);
                for item in items {
                    item.encode(encoder);
                }
            }
            Any::Map(entries) => {
                encoder.write_u8(tag::OBJECT);
                encoder.write_var_u64(entries.len() as u64);
                for (key, value) in entries.iter() {
                    encoder.write_string(key);
                    value.encode(encoder);
                }
            }
        }
    }

    pub fn decode<'a, R: Read<'a>>(decoder: &mut R) -> Result<Any> {
        let t = decoder.read_u8()?;
        match t {
            tag::UNDEFINED => Ok(Any::Undefined),
            tag::NULL => Ok(Any::Null),
            tag::INT32 => Ok(Any::Number(decoder.read_var_i64()? as f64)),
            tag::F32 => Ok(Any::Number(decoder.read_f32()? as f64)),
            tag::F64 => Ok(Any::Number(decoder.read_f64()?)),
            tag::I64 => Ok(Any::BigInt(decoder.read_i64()?)),
            tag::FALSE => Ok(Any::Bool(false)),
            tag::TRUE => Ok(Any::Bool(true)),
            tag::STRING => Ok(Any::String(decoder.read_string()?.into())),
            tag::OBJECT => {
                let len = decoder.read_var_u64()? as usize;
                let mut map = HashMap::with_capacity(len);
                for _ in 0..len {
                    let key = decoder.read_string()?.to_owned();
                    let value = Any::decode(decoder)?;
                    map.insert(key, value);
                }
                Ok(Any::Map(Box::new(map)))
            }
            tag::ARRAY => {
                let len = decoder.read_var_u64()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(Any::decode(decoder)?);
                }
                Ok(Any::Array(items))
            }
            tag::BINARY => Ok(Any::Buffer(decoder.read_buf()?.into())),
            other => Err(Error::UnexpectedValue(other)),
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Any::Null | Any::Undefined)
    }
}

impl From<bool> for Any {
    fn from(v: bool) -> Self {
        Any::Bool(v)
    }
}

impl From<f64> for Any {
    fn from(v: f64) -> Self {
        Any::Number(v)
    }
}

impl From<i64> for Any {
    fn from(v: i64) -> Self {
        Any::BigInt(v)
    }
}

impl From<String> for Any {
    fn from(v: String) -> Self {
        Any::String(v.into_boxed_str())
    }
}

impl<'a> From<&'a str> for Any {
    fn from(v: &'a str) -> Self {
        Any::String(v.into())
    }
}

impl From<Vec<u8>> for Any {
    fn from(v: Vec<u8>) -> Self {
        Any::Buffer(v.into_boxed_slice())
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Any::Null => write!(f, "null"),
            Any::Undefined => write!(f, "undefined"),
            Any::Bool(b) => write!(f, "{}", b),
            Any::Number(n) => write!(f, "{}", n),
            Any::BigInt(i) => write!(f, "{}", i),
            Any::String(s) => write!(f, "{:?}", s),
            Any::Buffer(b) => write!(f, "<{} bytes>", b.len()),
            Any::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Any::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{:?}:{}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(feature = "lib0-serde")]
impl From<serde_json::Value> for Any {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Any::Null,
            serde_json::Value::Bool(b) => Any::Bool(b),
            serde_json::Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Any::String(s.into_boxed_str()),
            serde_json::Value::Array(items) => {
                Any::Array(items.into_iter().map(Any::from).collect())
            }
            serde_json::Value::Object(entries) => {
                let map = entries.into_iter().map(|(k, v)| (k, Any::from(v))).collect();
                Any::Map(Box::new(map))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(value: Any) {
        let mut enc = EncoderV1::new();
        value.encode(&mut enc);
        let bytes = enc.to_vec();
        let mut cur = Cursor::new(&bytes);
        let decoded = Any::decode(&mut cur).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn primitives_round_trip() {
        roundtrip(Any::Null);
        roundtrip(Any::Undefined);
        roundtrip(Any::Bool(true));
        roundtrip(Any::Bool(false));
        roundtrip(Any::Number(42.0));
        roundtrip(Any::Number(-3.5));
        roundtrip(Any::BigInt(i64::MAX));
        roundtrip(Any::String("hello".into()));
        roundtrip(Any::Buffer(vec![1, 2, 3].into_boxed_slice()));
    }

    #[test]
    fn nested_round_trip() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Any::Number(1.0));
        map.insert(
            "b".to_string(),
            Any::Array(vec![Any::Bool(true), Any::Null]),
        );
        roundtrip(Any::Map(Box::new(map)));
    }

    #[test]
    fn unknown_tag_errors() {
        let bytes = [200u8];
        let mut cur = Cursor::new(&bytes);
        assert!(matches!(Any::decode(&mut cur), Err(Error::UnexpectedValue(200))));
    }
}
