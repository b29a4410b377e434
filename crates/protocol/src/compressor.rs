//! Per-connection block/transaction codec contract.
//!
//! The relay protocol leaves the actual block encoding to a stateful codec
//! that both ends of a connection keep in sync: transactions seen on the
//! wire enter a shared dictionary, and later block encodings may refer back
//! to them by short id. The message state machine only depends on the
//! [`Compressor`] trait; [`FlatCompressor`] is the reference codec that
//! tracks the dictionary but sends everything in full wire form.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use tokio::io::{AsyncRead, AsyncReadExt};

use relay_core::{BlockBuf, BlockHash, TxId};

use crate::error::CodecError;
use crate::messages::{MessageHeader, MessageType};

/// Largest loose transaction the relay network forwards freely.
pub const MAX_LOOSE_TX_SIZE: u32 = 10_000;

/// How many transaction ids the reference codec remembers per connection.
pub const TX_WINDOW_CAPACITY: usize = 10_000;

/// Minimum decodable block payload: the 80-byte block header.
const MIN_BLOCK_SIZE: u32 = 80;

/// One block reconstructed from the relay stream.
#[derive(Debug)]
pub struct DecodedBlock {
    /// Bytes consumed off the wire for this block.
    pub wire_size: u32,
    /// The reconstructed block, transport header space included.
    pub block: BlockBuf,
    /// Block id.
    pub hash: BlockHash,
}

/// Stateful per-connection codec shared by the read and write paths.
///
/// The dictionary is connection-scoped: call [`Compressor::reset`] whenever
/// the underlying socket is re-established, before any message is exchanged.
#[async_trait]
pub trait Compressor: Send {
    /// Drops all dictionary state accumulated on the previous connection.
    fn reset(&mut self);

    /// Whether a loose transaction of `size` bytes is acceptable.
    fn accepts_loose_tx(&self, size: u32) -> bool;

    /// Records a transaction received outside a block, so later encodings
    /// can treat it as known to the peer.
    fn register_loose_tx(&mut self, tx: &Bytes);

    /// Encodes `tx` as a complete relay TRANSACTION message, framing
    /// included, or `None` when there is nothing to send because the peer
    /// already holds the transaction. `out_of_band` forces the full wire
    /// form.
    fn tx_relay_message(&mut self, tx: &Bytes, out_of_band: bool) -> Option<Vec<u8>>;

    /// Compresses a full block into its relay wire form, framing included.
    /// The caller appends the END_BLOCK sentinel.
    fn compress_block(&mut self, hash: &BlockHash, block: &BlockBuf)
        -> Result<Vec<u8>, CodecError>;

    /// Reconstructs one block by consuming the connection's reader.
    ///
    /// `declared_len` is the length field of the BLOCK header and is
    /// advisory: the encoding itself drives how many bytes are consumed, and
    /// a codec may legitimately read past it.
    async fn decompress_block(
        &mut self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        declared_len: u32,
    ) -> Result<DecodedBlock, CodecError>;
}

/// Bounded FIFO window of transaction ids the peer is known to hold.
#[derive(Debug, Default)]
struct TxWindow {
    order: VecDeque<TxId>,
    known: HashSet<TxId>,
}

impl TxWindow {
    fn insert(&mut self, id: TxId) -> bool {
        if !self.known.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > TX_WINDOW_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.known.remove(&evicted);
            }
        }
        true
    }

    fn contains(&self, id: &TxId) -> bool {
        self.known.contains(id)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.known.clear();
    }
}

/// Reference codec: full wire form with duplicate suppression.
///
/// Blocks and transactions travel uncompressed, but the connection-scoped
/// dictionary is maintained exactly as the protocol requires, which makes
/// this codec the source of truth for "the peer already has this
/// transaction". A compacting codec can replace it behind [`Compressor`].
#[derive(Debug, Default)]
pub struct FlatCompressor {
    window: TxWindow,
}

impl FlatCompressor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Compressor for FlatCompressor {
    fn reset(&mut self) {
        self.window.clear();
    }

    fn accepts_loose_tx(&self, size: u32) -> bool {
        size <= MAX_LOOSE_TX_SIZE
    }

    fn register_loose_tx(&mut self, tx: &Bytes) {
        self.window.insert(TxId::of(tx));
    }

    fn tx_relay_message(&mut self, tx: &Bytes, out_of_band: bool) -> Option<Vec<u8>> {
        let id = TxId::of(tx);
        if !out_of_band && self.window.contains(&id) {
            return None;
        }
        self.window.insert(id);

        let header = MessageHeader::new(MessageType::Transaction, tx.len() as u32);
        let mut message = Vec::with_capacity(MessageHeader::SIZE + tx.len());
        message.extend_from_slice(&header.to_bytes());
        message.extend_from_slice(tx);
        Some(message)
    }

    fn compress_block(
        &mut self,
        _hash: &BlockHash,
        block: &BlockBuf,
    ) -> Result<Vec<u8>, CodecError> {
        let payload = block.payload();
        if (payload.len() as u32) < MIN_BLOCK_SIZE {
            return Err(CodecError::Compress(format!(
                "block of {} bytes is shorter than a block header",
                payload.len()
            )));
        }

        let header = MessageHeader::new(MessageType::Block, payload.len() as u32);
        let mut message = Vec::with_capacity(MessageHeader::SIZE + payload.len());
        message.extend_from_slice(&header.to_bytes());
        message.extend_from_slice(payload);
        Ok(message)
    }

    async fn decompress_block(
        &mut self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        declared_len: u32,
    ) -> Result<DecodedBlock, CodecError> {
        if declared_len < MIN_BLOCK_SIZE {
            return Err(CodecError::Corrupt(format!(
                "declared block of {} bytes is shorter than a block header",
                declared_len
            )));
        }

        // The flat encoding is exactly length-delimited.
        let mut payload = vec![0u8; declared_len as usize];
        reader.read_exact(&mut payload).await?;

        let block = BlockBuf::from_payload(&payload);
        let hash = block.hash();
        Ok(DecodedBlock {
            wire_size: declared_len,
            block,
            hash,
        })
    }
}
