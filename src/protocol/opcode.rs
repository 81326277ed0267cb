//! Opcode table
//!
//! Process-wide immutable opcode constants for the binary protocol.

/// Magic byte opening every request header
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte opening every response header
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Binary protocol opcodes
///
/// `GetKQ` is the quiet variant used for pipelined multi-get: the server
/// stays silent on a miss, so a trailing `Noop` terminates the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Flush = 0x08,
    Noop = 0x0a,
    GetK = 0x0c,
    GetKQ = 0x0d,
    Stat = 0x10,
    SaslAuth = 0x21,
}

impl Opcode {
    /// Look up an opcode from its wire byte
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        match byte {
            0x00 => Some(Opcode::Get),
            0x01 => Some(Opcode::Set),
            0x02 => Some(Opcode::Add),
            0x03 => Some(Opcode::Replace),
            0x04 => Some(Opcode::Delete),
            0x05 => Some(Opcode::Increment),
            0x06 => Some(Opcode::Decrement),
            0x08 => Some(Opcode::Flush),
            0x0a => Some(Opcode::Noop),
            0x0c => Some(Opcode::GetK),
            0x0d => Some(Opcode::GetKQ),
            0x10 => Some(Opcode::Stat),
            0x21 => Some(Opcode::SaslAuth),
            _ => None,
        }
    }
}
