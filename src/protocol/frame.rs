//! Response frame
//!
//! A fully decoded response unit: header fields plus the body split into
//! extras, key, and value sections.

use crate::error::{McError, Result};
use super::{Opcode, Status};

/// A decoded response frame
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    /// Opcode echoed from the request
    pub opcode: Opcode,

    /// Normalized status code
    pub status: Status,

    /// Correlation token echoed from the request
    pub opaque: u32,

    /// CAS token of the stored revision (0 when not applicable)
    pub cas: u64,

    /// Opcode-specific extras (e.g. 4-byte flags on get responses)
    pub extras: Vec<u8>,

    /// Key section (present on GetK/GetKQ and stat responses)
    pub key: Vec<u8>,

    /// Value section (stored data, counter value, or error text)
    pub value: Vec<u8>,
}

impl ResponseFrame {
    /// Whether the status is `Ok`
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Read the 4-byte flags field from the extras of a get-style response
    pub fn flags(&self) -> Result<u32> {
        if self.extras.len() < 4 {
            return Err(McError::Protocol(format!(
                "get response carries {} extras bytes, expected at least 4",
                self.extras.len()
            )));
        }
        Ok(u32::from_be_bytes([
            self.extras[0],
            self.extras[1],
            self.extras[2],
            self.extras[3],
        ]))
    }

    /// Read the 8-byte counter value from an incr/decr response body
    pub fn counter_value(&self) -> Result<u64> {
        let bytes: [u8; 8] = self.value.as_slice().try_into().map_err(|_| {
            McError::Protocol(format!(
                "counter response body is {} bytes, expected 8",
                self.value.len()
            ))
        })?;
        Ok(u64::from_be_bytes(bytes))
    }
}
