//! Error types for mcbin
//!
//! Provides a unified error type for all operations.
//!
//! Expected cache outcomes (miss, CAS mismatch, already-exists-on-add,
//! not-stored-on-replace) are NOT errors; they are reported as
//! `Option`/`bool` return values by [`crate::client::Client`]. Only
//! transport, protocol, and authentication failures travel through
//! `McError`.

use thiserror::Error;

/// Result type alias using McError
pub type Result<T> = std::result::Result<T, McError>;

/// Unified error type for mcbin operations
#[derive(Debug, Error)]
pub enum McError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Wire Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    // -------------------------------------------------------------------------
    // Value Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl McError {
    /// Whether this error came from the transport layer (socket I/O or a
    /// timeout). Transport errors are the only ones eligible for the single
    /// reconnect-and-retry in the connection manager.
    pub fn is_transport(&self) -> bool {
        matches!(self, McError::Io(_) | McError::Connection(_))
    }
}
