//! Relay network wire protocol.
//!
//! The relay network exchanges blocks and transactions in a compact,
//! connection-scoped encoding behind a simple length-prefixed framing. This
//! crate owns that framing, the per-connection message state machine
//! ([`client::RelayClient`]), and the codec contract the state machine
//! delegates block compression to ([`compressor::Compressor`]).

pub mod client;
pub mod compressor;
pub mod error;
pub mod messages;

pub use client::{RelayClient, RelayEvent, RelayHandle};
pub use compressor::{Compressor, DecodedBlock, FlatCompressor};
pub use error::{CodecError, RelayError, Result};
pub use messages::{MessageHeader, MessageType, DEFAULT_RELAY_PORT, MAX_MESSAGE_SIZE, RELAY_MAGIC, VERSION_STRING};
