//! # mcbin
//!
//! A client for distributed in-memory cache clusters speaking the memcached
//! binary wire protocol directly over TCP or unix-domain sockets:
//! - CAS (compare-and-swap) concurrency control
//! - Deterministic per-key routing across multiple servers
//! - Pipelined multi-key batches (`set_multi` / `get_multi`)
//! - Typed values with a tagged-union serializer
//! - Lazy connect and transparent reconnection under failure
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Client                                │
//! │          (command engine: get/set/cas/multi/...)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     ServerPool                               │
//! │          (FNV-1a key router over N servers)                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Connection  │   ...    │ Connection  │
//!   │ (1 per srv) │          │ (1 per srv) │
//!   └──────┬──────┘          └──────┬──────┘
//!          │      binary frames     │
//!          ▼                        ▼
//!       server 0       ...       server N-1
//! ```
//!
//! All cache state lives on the remote servers; this crate is purely the
//! protocol/client side.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod value;
pub mod connection;
pub mod pool;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{Client, SetEntry};
pub use config::{ClientConfig, Credentials, ServerAddr};
pub use connection::{AuthChannel, AuthHook, ConnectionState};
pub use error::{McError, Result};
pub use value::{ObjectCodec, Passthrough, Value};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mcbin
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
