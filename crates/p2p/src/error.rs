//! Error types for the P2P side of the bridge.

use thiserror::Error;

/// Result type alias for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;

/// Errors that end a P2P connection.
///
/// All variants are fatal to the current connection; the reconnect layer
/// logs the reason and dials the node again.
#[derive(Error, Debug)]
pub enum P2pError {
    /// Malformed frame: wrong network magic, oversized payload, or a
    /// checksum mismatch.
    #[error("message error: {0}")]
    Message(String),

    /// Short read on the connection.
    #[error("read error: {0}")]
    Read(String),

    /// IO error propagated from the socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
