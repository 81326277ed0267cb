//! Status-code table
//!
//! Response status codes normalized into a closed set.

use crate::error::{McError, Result};

/// Response status codes
///
/// `KeyExists` doubles as the CAS-mismatch outcome on conditional
/// writes/deletes; the server uses the same code for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Ok = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    ValueTooLarge = 0x0003,
    InvalidArguments = 0x0004,
    ItemNotStored = 0x0005,
    AuthError = 0x0020,
    AuthContinue = 0x0021,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
    NotSupported = 0x0083,
}

impl Status {
    /// Normalize a wire status code; codes outside the closed set are a
    /// protocol error, not a domain outcome.
    pub fn from_code(code: u16) -> Result<Status> {
        match code {
            0x0000 => Ok(Status::Ok),
            0x0001 => Ok(Status::KeyNotFound),
            0x0002 => Ok(Status::KeyExists),
            0x0003 => Ok(Status::ValueTooLarge),
            0x0004 => Ok(Status::InvalidArguments),
            0x0005 => Ok(Status::ItemNotStored),
            0x0020 => Ok(Status::AuthError),
            0x0021 => Ok(Status::AuthContinue),
            0x0081 => Ok(Status::UnknownCommand),
            0x0082 => Ok(Status::OutOfMemory),
            0x0083 => Ok(Status::NotSupported),
            other => Err(McError::Protocol(format!(
                "unknown response status: 0x{:04x}",
                other
            ))),
        }
    }
}
