//! Block buffers shared between the relay and P2P sides.

use crate::hash::{double_sha256, BlockHash};

/// Size of the P2P transport header reserved ahead of the block data.
pub const TRANSPORT_HEADER_LEN: usize = 24;

/// Length of the serialized block header the block id is computed over.
const BLOCK_HEADER_LEN: usize = 80;

/// A serialized block moving through the bridge.
///
/// The buffer keeps [`TRANSPORT_HEADER_LEN`] bytes of scratch space ahead of
/// the block data so the P2P side can frame the block for the node in place,
/// and the relay side hashes and compresses the region following that header
/// without copying. Blocks are transient; they live for one bridge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf(Vec<u8>);

impl BlockBuf {
    /// Wraps serialized block data, allocating the header scratch space.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(TRANSPORT_HEADER_LEN + payload.len());
        buf.resize(TRANSPORT_HEADER_LEN, 0);
        buf.extend_from_slice(payload);
        Self(buf)
    }

    /// Adopts a buffer that already carries the header scratch space.
    pub fn from_framed(buf: Vec<u8>) -> Self {
        debug_assert!(buf.len() >= TRANSPORT_HEADER_LEN);
        Self(buf)
    }

    /// The serialized block, without the transport header.
    pub fn payload(&self) -> &[u8] {
        &self.0[TRANSPORT_HEADER_LEN..]
    }

    pub fn payload_len(&self) -> usize {
        self.0.len() - TRANSPORT_HEADER_LEN
    }

    /// The reserved transport header region.
    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.0[..TRANSPORT_HEADER_LEN]
    }

    /// The whole buffer, header included, ready to write to a P2P socket.
    pub fn into_framed(self) -> Vec<u8> {
        self.0
    }

    /// Block id over the 80-byte block header.
    pub fn hash(&self) -> BlockHash {
        let payload = self.payload();
        let header = &payload[..BLOCK_HEADER_LEN.min(payload.len())];
        BlockHash::from_bytes(double_sha256(header))
    }
}
