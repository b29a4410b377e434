//! Bitcoin P2P message framing.
//!
//! Every message carries a 24-byte header: network magic, a 12-byte
//! zero-padded command, the payload length, and the first four bytes of the
//! payload's double-SHA256 as a checksum. Integers are little-endian on the
//! wire.

use std::fmt;

use relay_core::{double_sha256, TRANSPORT_HEADER_LEN};

use crate::error::P2pError;

/// Bitcoin mainnet message start bytes (F9 BE B4 D9 on the wire).
pub const NETWORK_MAGIC: u32 = 0xD9B4_BEF9;

/// Hard cap on any P2P payload this bridge will buffer.
pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = TRANSPORT_HEADER_LEN;

/// Inventory entry type for a transaction.
pub const INV_TX: u32 = 1;
/// Inventory entry type for a block.
pub const INV_BLOCK: u32 = 2;
/// Size of one inventory entry: type tag plus a 32-byte hash.
pub const INV_ENTRY_SIZE: usize = 36;

/// Message command, 12 bytes zero-padded.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command([u8; 12]);

impl Command {
    pub const VERSION: Command = Command(*b"version\0\0\0\0\0");
    pub const VERACK: Command = Command(*b"verack\0\0\0\0\0\0");
    pub const PING: Command = Command(*b"ping\0\0\0\0\0\0\0\0");
    pub const PONG: Command = Command(*b"pong\0\0\0\0\0\0\0\0");
    pub const INV: Command = Command(*b"inv\0\0\0\0\0\0\0\0\0");
    pub const GETDATA: Command = Command(*b"getdata\0\0\0\0\0");
    pub const BLOCK: Command = Command(*b"block\0\0\0\0\0\0\0");
    pub const TX: Command = Command(*b"tx\0\0\0\0\0\0\0\0\0\0");

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = std::str::from_utf8(&self.0)
            .unwrap_or("invalid")
            .trim_end_matches('\0');
        write!(f, "{}", text)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self)
    }
}

/// P2P message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P2pHeader {
    /// Network magic number.
    pub magic: u32,
    /// Command identifying the payload shape.
    pub command: Command,
    /// Payload length in bytes.
    pub length: u32,
    /// First four bytes of the payload's double-SHA256.
    pub checksum: [u8; 4],
}

impl P2pHeader {
    /// Creates a header for `payload`, computing its checksum.
    pub fn for_payload(command: Command, payload: &[u8]) -> Self {
        Self {
            magic: NETWORK_MAGIC,
            command,
            length: payload.len() as u32,
            checksum: checksum_of(payload),
        }
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..16].copy_from_slice(self.command.as_bytes());
        bytes[16..20].copy_from_slice(&self.length.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.checksum);
        bytes
    }

    /// Deserializes a header without interpreting any field.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut command = [0u8; 12];
        command.copy_from_slice(&bytes[4..16]);
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            command: Command::from_bytes(command),
            length: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            checksum: [bytes[20], bytes[21], bytes[22], bytes[23]],
        }
    }

    /// Checks magic and the payload length cap.
    pub fn validate(&self) -> Result<(), P2pError> {
        if self.magic != NETWORK_MAGIC {
            return Err(P2pError::Message("invalid network magic".to_string()));
        }
        if self.length > MAX_PAYLOAD_SIZE {
            return Err(P2pError::Message("payload too large".to_string()));
        }
        Ok(())
    }

    /// Verifies the checksum against a received payload.
    pub fn verify_checksum(&self, payload: &[u8]) -> Result<(), P2pError> {
        if self.checksum != checksum_of(payload) {
            return Err(P2pError::Message(format!(
                "checksum mismatch on '{}' message",
                self.command
            )));
        }
        Ok(())
    }
}

/// First four bytes of the payload's double-SHA256.
pub fn checksum_of(payload: &[u8]) -> [u8; 4] {
    let hash = double_sha256(payload);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Frames `payload` into a complete wire message.
pub fn frame_message(command: Command, payload: &[u8]) -> Vec<u8> {
    let header = P2pHeader::for_payload(command, payload);
    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.extend_from_slice(&header.to_bytes());
    message.extend_from_slice(payload);
    message
}

/// Appends a CompactSize integer.
pub fn put_compact_size(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Reads a CompactSize integer, returning the value and bytes consumed.
pub fn read_compact_size(bytes: &[u8]) -> Result<(u64, usize), P2pError> {
    let truncated = || P2pError::Message("truncated compact size".to_string());
    let first = *bytes.first().ok_or_else(truncated)?;
    match first {
        0xfd => {
            let raw: [u8; 2] = bytes.get(1..3).ok_or_else(truncated)?.try_into().unwrap();
            Ok((u16::from_le_bytes(raw) as u64, 3))
        }
        0xfe => {
            let raw: [u8; 4] = bytes.get(1..5).ok_or_else(truncated)?.try_into().unwrap();
            Ok((u32::from_le_bytes(raw) as u64, 5))
        }
        0xff => {
            let raw: [u8; 8] = bytes.get(1..9).ok_or_else(truncated)?.try_into().unwrap();
            Ok((u64::from_le_bytes(raw), 9))
        }
        small => Ok((small as u64, 1)),
    }
}
