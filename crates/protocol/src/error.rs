//! Error types for the relay protocol.

use thiserror::Error;

/// Result type alias for relay protocol operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that end a relay connection.
///
/// Every variant is fatal to the current connection; the reconnect layer
/// logs the reason and dials again. The one non-fatal codec path, a
/// compression failure on the outbound block path, never surfaces here; it
/// is logged and the send is dropped.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed header: wrong magic bytes or an oversized length field.
    #[error("framing error: {0}")]
    Framing(String),

    /// Well-framed but semantically invalid message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The compressor could not reconstruct a block mid-stream.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Short read on the connection.
    #[error("read error: {0}")]
    Read(String),

    /// IO error propagated from the socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a [`Compressor`](crate::compressor::Compressor).
#[derive(Error, Debug)]
pub enum CodecError {
    /// The inbound block stream does not decode.
    #[error("corrupt block encoding: {0}")]
    Corrupt(String),

    /// The outbound block could not be compressed.
    #[error("compression failed: {0}")]
    Compress(String),

    /// IO error while the decompressor was consuming the connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
