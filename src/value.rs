//! Value Serializer
//!
//! Typed values are tagged on the wire with a 4-byte flags field so a read
//! can reconstruct the logical type that was stored. The closed set of
//! types and their flags:
//!
//! | variant    | flag | wire encoding                          |
//! |------------|------|----------------------------------------|
//! | `Raw`      | 0x00 | bytes as-is                            |
//! | `Object`   | 0x01 | opaque blob via the injectable codec   |
//! | `Int`      | 0x02 | ASCII decimal                          |
//! | `BigInt`   | 0x04 | ASCII decimal                          |
//!
//! Integers are stored as ASCII decimal so they stay compatible with the
//! server's incr/decr counters, which operate on decimal text. The
//! serializer never touches CAS, key, or expiration fields.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{McError, Result};

/// Flag for raw bytes / strings
pub const FLAG_RAW: u32 = 0x00;

/// Flag for structured objects (blob via [`ObjectCodec`])
pub const FLAG_OBJECT: u32 = 0x01;

/// Flag for integers within the native 32-bit range
pub const FLAG_INTEGER: u32 = 0x02;

/// Flag for integers wider than 32 bits
pub const FLAG_BIG_INTEGER: u32 = 0x04;

/// An application-level value plus its logical type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Raw bytes (strings included)
    Raw(Vec<u8>),

    /// Structured object, already encoded by the application
    /// (see [`Value::from_serialize`] for the bincode convenience path)
    Object(Vec<u8>),

    /// Integer within 32-bit range
    Int(i32),

    /// Integer wider than 32 bits
    BigInt(i64),
}

impl Value {
    /// Encode a serde-serializable object into a `Value::Object` blob
    /// using bincode.
    pub fn from_serialize<T: Serialize>(object: &T) -> Result<Value> {
        let blob = bincode::serialize(object)
            .map_err(|e| McError::Serialization(format!("bincode encode: {}", e)))?;
        Ok(Value::Object(blob))
    }

    /// Decode a `Value::Object` blob back into a typed object via bincode.
    /// Any other variant is a serialization error.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Value::Object(blob) => bincode::deserialize(blob)
                .map_err(|e| McError::Serialization(format!("bincode decode: {}", e))),
            other => Err(McError::Serialization(format!(
                "expected an object value, found {:?}",
                other
            ))),
        }
    }

    /// Borrow raw bytes if this is a `Raw` value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Borrow the value as UTF-8 text if it is raw and valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Raw(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Raw(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Raw(s.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Raw(bytes)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::BigInt(n)
    }
}

// =============================================================================
// Structured-object codec hook
// =============================================================================

/// Wire transform for structured-object blobs.
///
/// `Value::Object` carries bytes the application already encoded; an
/// `ObjectCodec` transforms that blob on its way to and from the wire
/// (compression, encryption, format versioning). The default is the
/// identity [`Passthrough`].
pub trait ObjectCodec: Send + Sync {
    fn encode(&self, object: &[u8]) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Identity object codec: blobs travel unchanged
#[derive(Debug, Default)]
pub struct Passthrough;

impl ObjectCodec for Passthrough {
    fn encode(&self, object: &[u8]) -> Result<Vec<u8>> {
        Ok(object.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

// =============================================================================
// Encode / Decode table
// =============================================================================

/// Encode a value into its type flag and wire bytes
pub fn encode_value(value: &Value, codec: &dyn ObjectCodec) -> Result<(u32, Vec<u8>)> {
    match value {
        Value::Raw(bytes) => Ok((FLAG_RAW, bytes.clone())),
        Value::Object(blob) => Ok((FLAG_OBJECT, codec.encode(blob)?)),
        Value::Int(n) => Ok((FLAG_INTEGER, n.to_string().into_bytes())),
        Value::BigInt(n) => Ok((FLAG_BIG_INTEGER, n.to_string().into_bytes())),
    }
}

/// Reconstruct a typed value from its flag and wire bytes
pub fn decode_value(flags: u32, data: &[u8], codec: &dyn ObjectCodec) -> Result<Value> {
    match flags {
        FLAG_RAW => Ok(Value::Raw(data.to_vec())),
        FLAG_OBJECT => Ok(Value::Object(codec.decode(data)?)),
        FLAG_INTEGER => {
            let n = parse_decimal(data)?;
            // Foreign writers can tag any decimal as a 32-bit integer
            let n = i32::try_from(n).map_err(|_| {
                McError::Serialization(format!("integer value out of 32-bit range: {}", n))
            })?;
            Ok(Value::Int(n))
        }
        FLAG_BIG_INTEGER => parse_decimal(data).map(Value::BigInt),
        other => Err(McError::Serialization(format!(
            "unrecognized value flags: 0x{:08x}",
            other
        ))),
    }
}

fn parse_decimal(data: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(data)
        .map_err(|_| McError::Serialization("integer value is not UTF-8".to_string()))?;
    text.parse::<i64>()
        .map_err(|_| McError::Serialization(format!("integer value is not decimal: {:?}", text)))
}
