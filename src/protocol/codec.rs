//! Protocol codec
//!
//! Pure encoding and decoding of binary protocol frames. The codec owns no
//! socket and keeps no state; callers supply the byte sink/source.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};

use crate::error::{McError, Result};
use super::{Opcode, Status, ResponseFrame, REQUEST_MAGIC, RESPONSE_MAGIC};

/// Fixed header size shared by requests and responses
pub const HEADER_SIZE: usize = 24;

/// Maximum key length accepted by the protocol
pub const MAX_KEY_LEN: usize = 250;

/// Maximum total body length we are willing to read back (16 MB)
const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

// =============================================================================
// Request Encoding
// =============================================================================

/// Encode one request frame into `buf`.
///
/// The total body length is `extras.len() + key.len() + body.len()`; a CAS
/// of 0 means "no CAS check". The opaque value is echoed verbatim by the
/// server and is how pipelined batches correlate responses.
pub fn encode_request(
    buf: &mut BytesMut,
    opcode: Opcode,
    key: &[u8],
    extras: &[u8],
    body: &[u8],
    cas: u64,
    opaque: u32,
) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(McError::InvalidKey(format!(
            "key is {} bytes, protocol limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    let total_body = extras.len() + key.len() + body.len();

    buf.reserve(HEADER_SIZE + total_body);
    buf.put_u8(REQUEST_MAGIC);
    buf.put_u8(opcode as u8);
    buf.put_u16(key.len() as u16);
    buf.put_u8(extras.len() as u8);
    buf.put_u8(0); // data type, always raw
    buf.put_u16(0); // reserved / vbucket
    buf.put_u32(total_body as u32);
    buf.put_u32(opaque);
    buf.put_u64(cas);
    buf.put_slice(extras);
    buf.put_slice(key);
    buf.put_slice(body);
    Ok(())
}

/// Encode one request frame and write it to a stream
pub fn write_request<W: Write>(
    writer: &mut W,
    opcode: Opcode,
    key: &[u8],
    extras: &[u8],
    body: &[u8],
    cas: u64,
    opaque: u32,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + extras.len() + key.len() + body.len());
    encode_request(&mut buf, opcode, key, extras, body, cas, opaque)?;
    writer.write_all(&buf)?;
    Ok(())
}

// =============================================================================
// Response Decoding
// =============================================================================

/// Read one complete response frame from a stream.
///
/// Reads the fixed header first, then exactly `total body length` further
/// bytes, and splits the body into extras / key / value per the header.
/// A magic byte other than `0x81` is a protocol error; the frame is
/// reported malformed rather than resynchronized.
pub fn read_response<R: Read>(reader: &mut R) -> Result<ResponseFrame> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    if header[0] != RESPONSE_MAGIC {
        return Err(McError::Protocol(format!(
            "bad response magic: 0x{:02x} (expected 0x{:02x})",
            header[0], RESPONSE_MAGIC
        )));
    }

    let opcode = Opcode::from_u8(header[1]).ok_or_else(|| {
        McError::Protocol(format!("unknown response opcode: 0x{:02x}", header[1]))
    })?;
    let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_len = header[4] as usize;
    let status = Status::from_code(u16::from_be_bytes([header[6], header[7]]))?;
    let total_body = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    let opaque = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let cas = u64::from_be_bytes([
        header[16], header[17], header[18], header[19], header[20], header[21], header[22],
        header[23],
    ]);

    if total_body > MAX_BODY_LEN {
        return Err(McError::Protocol(format!(
            "response body too large: {} bytes (max {})",
            total_body, MAX_BODY_LEN
        )));
    }
    if extras_len + key_len > total_body as usize {
        return Err(McError::Protocol(format!(
            "inconsistent response header: extras {} + key {} exceed body {}",
            extras_len, key_len, total_body
        )));
    }

    let mut body = vec![0u8; total_body as usize];
    if total_body > 0 {
        reader.read_exact(&mut body)?;
    }

    let value = body.split_off(extras_len + key_len);
    let key = body.split_off(extras_len);
    let extras = body;

    Ok(ResponseFrame {
        opcode,
        status,
        opaque,
        cas,
        extras,
        key,
        value,
    })
}
