//! Error types for the filehub library.

use std::io;

/// Result type alias for filehub operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while talking the filehub protocol.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid node identifier: {0:?}")]
    InvalidNodeId(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server rejected connection: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
