//! Relay message framing.
//!
//! Every relay message starts with a fixed 12-byte header: magic, type tag,
//! payload length, all big-endian on the wire. The payload shape is type
//! specific; BLOCK payloads are additionally terminated by a zero-length
//! END_BLOCK frame because the compact encoding is not strictly
//! length-delimited.

use crate::error::RelayError;

/// Fixed constant identifying relay protocol frames.
pub const RELAY_MAGIC: u32 = 0xF2BE_EF42;

/// Hard cap on any relay message payload.
pub const MAX_MESSAGE_SIZE: u32 = 1_000_000;

/// Version string exchanged at connect; must match the server byte-for-byte.
pub const VERSION_STRING: &str = "prioritized panther";

/// TCP port relay servers listen on.
pub const DEFAULT_RELAY_PORT: u16 = 8336;

/// Relay message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Version negotiation string, sent eagerly by both sides at connect.
    Version = 0,
    /// Compact block encoding, terminated by [`MessageType::EndBlock`].
    Block = 1,
    /// A loose transaction.
    Transaction = 2,
    /// Zero-length sentinel marking the end of a block's byte stream.
    EndBlock = 3,
    /// The server's maximum supported version; equality with our own version
    /// string signals this client is obsolete.
    MaxVersion = 4,
    /// Display-only sponsor text.
    Sponsor = 5,
}

impl MessageType {
    /// Maps a wire tag back to a message type.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Version),
            1 => Some(Self::Block),
            2 => Some(Self::Transaction),
            3 => Some(Self::EndBlock),
            4 => Some(Self::MaxVersion),
            5 => Some(Self::Sponsor),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Relay message header (12 bytes, network byte order).
///
/// The type field is kept as the raw wire tag so framing violations are
/// reported before the tag is ever interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Network magic, must equal [`RELAY_MAGIC`].
    pub magic: u32,
    /// Raw message type tag.
    pub kind_tag: u32,
    /// Payload length in bytes.
    pub length: u32,
}

impl MessageHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 12;

    /// Creates a header for an outbound message.
    pub fn new(kind: MessageType, length: u32) -> Self {
        Self {
            magic: RELAY_MAGIC,
            kind_tag: kind.tag(),
            length,
        }
    }

    /// Serializes the header, all fields big-endian.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.kind_tag.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    /// Deserializes a header without interpreting any field.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            kind_tag: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            length: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }

    /// Checks the framing invariants: magic first, then the length cap.
    ///
    /// The type tag is deliberately not inspected here; unknown tags are a
    /// dispatch-time protocol violation, not a framing one.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.magic != RELAY_MAGIC {
            return Err(RelayError::Framing("invalid magic bytes".to_string()));
        }
        if self.length > MAX_MESSAGE_SIZE {
            return Err(RelayError::Framing("message too large".to_string()));
        }
        Ok(())
    }

    /// The decoded message type, if the tag is known.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_tag(self.kind_tag)
    }
}
