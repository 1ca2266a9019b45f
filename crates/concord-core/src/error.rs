//! Error types for the replication stack

use thiserror::Error;

/// Core errors
#[derive(Error, Debug)]
pub enum ConcordError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u16),

    #[error("Frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),

    // Crypto errors
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    // Startup errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Handshake with {peer} failed: {reason}")]
    HandshakeFailed { peer: String, reason: String },
}

/// Result type for Concord operations
pub type ConcordResult<T> = Result<T, ConcordError>;

impl From<std::io::Error> for ConcordError {
    fn from(err: std::io::Error) -> Self {
        ConcordError::TransportError(err.to_string())
    }
}
