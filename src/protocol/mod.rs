//! Protocol Module
//!
//! The memcached binary wire protocol: frame layout, opcode and status
//! tables, and the pure encode/decode codec.
//!
//! ## Frame Format (fixed 24-byte header, shared by requests and responses)
//!
//! ```text
//! ┌────────┬────────┬───────────┬──────────┬─────────┬──────────────┐
//! │Magic(1)│Opcode(1)│Key len(2)│Extras(1) │DataTy(1)│Status/Res(2) │
//! ├────────┴────────┴───────────┴──────────┴─────────┴──────────────┤
//! │                     Total body length (4)                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                          Opaque (4)                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                           CAS (8)                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │              extras · key · value  (total body length)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte fields are big-endian. Request magic is `0x80`, response
//! magic is `0x81`. A request CAS of 0 means "no CAS check".

mod codec;
mod frame;
mod opcode;
mod status;

pub use codec::{encode_request, read_response, write_request, HEADER_SIZE, MAX_KEY_LEN};
pub use frame::ResponseFrame;
pub use opcode::{Opcode, REQUEST_MAGIC, RESPONSE_MAGIC};
pub use status::Status;
