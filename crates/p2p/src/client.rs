//! P2P connection driver.
//!
//! Mirrors the relay client's shape: a flat read loop per connection, a
//! cloneable write handle feeding a writer task, and a `connected` flag that
//! gates sends until the handshake completes. The P2P network is chatty;
//! commands the bridge has no use for are skipped rather than treated as
//! violations, and only malformed frames disconnect.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_core::net::drain_writes;
use relay_core::BlockBuf;

use crate::error::{P2pError, Result};
use crate::message::{
    frame_message, put_compact_size, read_compact_size, Command, P2pHeader, HEADER_SIZE,
    INV_BLOCK, INV_ENTRY_SIZE, INV_TX,
};
use crate::version::{build_version_payload, parse_version_payload};

/// Events decoded off the node connection, consumed by the bridge.
#[derive(Debug)]
pub enum P2pEvent {
    /// A block announced by the node.
    Block(BlockBuf),
    /// A loose transaction from the node's mempool.
    Transaction(Bytes),
}

struct Shared {
    /// True once the node has acknowledged our version.
    connected: AtomicBool,
    /// Sender for the current connection's writer task, if any.
    sink: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Shared {
    fn enqueue(&self, frame: Vec<u8>) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            let _ = sink.send(frame);
        }
    }
}

/// Cloneable write-side handle onto the node connection.
#[derive(Clone)]
pub struct P2pHandle {
    shared: Arc<Shared>,
}

impl P2pHandle {
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Sends a full block to the node, framing it in the buffer's reserved
    /// header space.
    pub fn send_block(&self, mut block: BlockBuf) {
        if !self.is_connected() {
            return;
        }
        let hash = block.hash();
        let size = block.payload_len();
        let header = P2pHeader::for_payload(Command::BLOCK, block.payload());
        block.header_mut().copy_from_slice(&header.to_bytes());
        self.shared.enqueue(block.into_framed());
        info!("sent block {} of size {} to bitcoind", hash, size);
    }

    /// Sends a loose transaction to the node.
    pub fn send_transaction(&self, tx: &Bytes) {
        if !self.is_connected() {
            return;
        }
        self.shared.enqueue(frame_message(Command::TX, tx));
        info!("sent transaction of size {} to bitcoind", tx.len());
    }
}

/// Drives P2P connections against a decoded-event channel.
pub struct P2pClient {
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<P2pEvent>,
}

impl P2pClient {
    /// Creates the client and its write-side handle.
    pub fn new(events: mpsc::UnboundedSender<P2pEvent>) -> (Self, P2pHandle) {
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            sink: std::sync::Mutex::new(None),
        });
        let handle = P2pHandle {
            shared: shared.clone(),
        };
        (Self { shared, events }, handle)
    }

    /// Runs the message loop over an established stream until a fatal
    /// framing or IO error ends the connection.
    pub async fn run<R, W>(&self, reader: R, writer: W, peer: std::net::SocketAddr) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, frames) = mpsc::unbounded_channel();
        *self.shared.sink.lock().unwrap() = Some(sink);
        let writer_task = tokio::spawn(drain_writes(writer, frames));

        let result = self.read_loop(reader, peer).await;

        self.shared.connected.store(false, Ordering::Release);
        *self.shared.sink.lock().unwrap() = None;
        writer_task.abort();
        result
    }

    async fn read_loop<R>(&self, mut reader: R, peer: std::net::SocketAddr) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        // Version goes out eagerly; the node answers with its own version
        // followed by a verack.
        let nonce: u64 = rand::random();
        self.shared.enqueue(frame_message(
            Command::VERSION,
            &build_version_payload(peer, nonce),
        ));

        loop {
            let mut raw = [0u8; HEADER_SIZE];
            reader
                .read_exact(&mut raw)
                .await
                .map_err(|_| P2pError::Read("failed to read message header".to_string()))?;
            let header = P2pHeader::from_bytes(&raw);
            header.validate()?;

            let payload = self.read_body(&mut reader, &header).await?;

            match header.command {
                Command::VERSION => {
                    match parse_version_payload(&payload) {
                        Ok(version) => info!(
                            "bitcoind is {} (protocol {})",
                            version.user_agent, version.protocol_version
                        ),
                        Err(err) => debug!("unparseable version payload: {}", err),
                    }
                    self.shared.enqueue(frame_message(Command::VERACK, b""));
                }
                Command::VERACK => {
                    self.shared.connected.store(true, Ordering::Release);
                    info!("bitcoind handshake complete");
                }
                Command::PING => {
                    self.shared.enqueue(frame_message(Command::PONG, &payload));
                }
                Command::INV => {
                    if let Some(getdata) = request_inventory(&payload)? {
                        self.shared.enqueue(getdata);
                    }
                }
                Command::BLOCK => {
                    let block = BlockBuf::from_payload(&payload);
                    debug!(
                        "received block {} of size {} from bitcoind",
                        block.hash(),
                        block.payload_len()
                    );
                    let _ = self.events.send(P2pEvent::Block(block));
                }
                Command::TX => {
                    let tx = Bytes::from(payload);
                    debug!("received transaction of size {} from bitcoind", tx.len());
                    let _ = self.events.send(P2pEvent::Transaction(tx));
                }
                other => {
                    debug!("ignoring '{}' message of {} bytes", other, payload.len());
                }
            }
        }
    }

    async fn read_body<R>(&self, reader: &mut R, header: &P2pHeader) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut payload = vec![0u8; header.length as usize];
        reader.read_exact(&mut payload).await.map_err(|_| {
            P2pError::Read(format!("failed to read '{}' payload", header.command))
        })?;
        header.verify_checksum(&payload)?;
        Ok(payload)
    }
}

/// Builds a `getdata` request echoing the block and transaction entries of
/// an `inv` payload. Returns `None` when nothing in the inventory interests
/// the bridge.
fn request_inventory(payload: &[u8]) -> Result<Option<Vec<u8>>> {
    let (count, consumed) = read_compact_size(payload)?;
    let entries = &payload[consumed..];
    if usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(INV_ENTRY_SIZE))
        != Some(entries.len())
    {
        return Err(P2pError::Message("malformed inv payload".to_string()));
    }

    let mut wanted = Vec::new();
    for entry in entries.chunks_exact(INV_ENTRY_SIZE) {
        let kind = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        if kind == INV_TX || kind == INV_BLOCK {
            wanted.push(entry);
        }
    }
    if wanted.is_empty() {
        return Ok(None);
    }

    let mut getdata = Vec::with_capacity(9 + wanted.len() * INV_ENTRY_SIZE);
    put_compact_size(&mut getdata, wanted.len() as u64);
    for entry in wanted {
        getdata.extend_from_slice(entry);
    }
    Ok(Some(frame_message(Command::GETDATA, &getdata)))
}
