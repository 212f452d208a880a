//! Error types for mapkv
//!
//! Provides a unified error type for transport, framing and storage failures.
//! Business outcomes of storage operations are NOT errors here; they travel as
//! [`ErrorCode`](crate::protocol::ErrorCode) inside a response.

use thiserror::Error;

/// Result type alias using MapKvError
pub type Result<T> = std::result::Result<T, MapKvError>;

/// Unified error type for mapkv operations
#[derive(Debug, Error)]
pub enum MapKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Field '{field}' is {len} bytes, more than a 2-byte length prefix can carry")]
    FieldTooLong { field: &'static str, len: usize },

    // -------------------------------------------------------------------------
    // Local Validation Errors
    // -------------------------------------------------------------------------
    #[error("Got KEY of {len} bytes exceeding max length of {max} bytes")]
    InvalidKeyLength { len: usize, max: usize },

    #[error("Got VALUE of {len} bytes exceeding max length of {max} bytes")]
    InvalidValueLength { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage used before init")]
    NotInitialized,

    #[error("Storage segment corrupted: {0}")]
    Corrupted(String),

    #[error("Storage segment exhausted: need {requested} bytes, limit is {limit}")]
    SegmentExhausted { requested: u64, limit: u64 },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Lock error: {0}")]
    Lock(String),
}

impl MapKvError {
    /// True when the peer simply went away (EOF, reset, broken pipe).
    pub fn is_disconnect(&self) -> bool {
        match self {
            MapKvError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
