//! Relay protocol client: the per-connection message state machine.
//!
//! One [`RelayClient`] drives one logical relay session. The read loop is a
//! flat, blocking pull: read a header, dispatch by type, repeat. Every
//! violation ends the connection with a human-readable reason for the
//! reconnect layer. The write side lives behind a cloneable [`RelayHandle`]
//! that queues pre-framed bytes onto a writer task, so the P2P side's read
//! loop can bridge into this connection while our own read loop is blocked.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info, warn};

use relay_core::net::drain_writes;
use relay_core::text::printable;
use relay_core::BlockBuf;

use crate::compressor::Compressor;
use crate::error::{RelayError, Result};
use crate::messages::{MessageHeader, MessageType, VERSION_STRING};

/// Events decoded off the relay connection, consumed by the bridge.
#[derive(Debug)]
pub enum RelayEvent {
    /// A block reconstructed from the relay stream.
    Block(BlockBuf),
    /// A loose transaction received from the relay server.
    Transaction(Bytes),
}

/// State shared between the read loop and the write handles.
struct Shared {
    /// True from the moment our version message is queued until disconnect.
    connected: AtomicBool,
    /// The connection's codec; dictionary state is shared by both paths.
    compressor: tokio::sync::Mutex<Box<dyn Compressor>>,
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

/// Cloneable write-side handle onto the relay connection.
///
/// All operations are no-ops while the connection has not completed its
/// version send, and safe to call from any task.
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<Shared>,
}

impl RelayHandle {
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Compresses and sends a block, followed by the END_BLOCK sentinel.
    ///
    /// Codec failures are logged and the send is dropped; the connection
    /// stays up.
    pub async fn send_block(&self, block: &BlockBuf) {
        if !self.is_connected() {
            return;
        }

        let hash = block.hash();
        let compressed = {
            let mut compressor = self.shared.compressor.lock().await;
            compressor.compress_block(&hash, block)
        };
        match compressed {
            Ok(wire) => {
                let wire_size = wire.len();
                self.shared.enqueue(wire);
                self.shared
                    .enqueue(MessageHeader::new(MessageType::EndBlock, 0).to_bytes().to_vec());
                info!(
                    "{} sent, size {} with {} bytes on the wire",
                    hash,
                    block.payload_len(),
                    wire_size
                );
            }
            Err(err) => warn!("failed to compress block {}: {}", hash, err),
        }
    }

    /// Sends a transaction, in compact form or forced out-of-band form.
    ///
    /// The codec returning nothing means the peer already holds the
    /// transaction; that is silence, not an error.
    pub async fn send_transaction(&self, tx: &Bytes, out_of_band: bool) {
        if !self.is_connected() {
            return;
        }

        let message = {
            let mut compressor = self.shared.compressor.lock().await;
            compressor.tx_relay_message(tx, out_of_band)
        };
        if let Some(wire) = message {
            self.shared.enqueue(wire);
            info!(
                "sent transaction of size {}{} to relay server",
                tx.len(),
                if out_of_band { " (out-of-band)" } else { "" }
            );
        }
    }
}

/// Drives relay connections against a decoded-event channel.
///
/// Construct once, then call [`RelayClient::run`] for every (re)established
/// socket; the compressor dictionary is reset at the top of each run.
pub struct RelayClient {
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayClient {
    /// Creates the client and its write-side handle.
    pub fn new(
        compressor: Box<dyn Compressor>,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) -> (Self, RelayHandle) {
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            compressor: tokio::sync::Mutex::new(compressor),
            sink: std::sync::Mutex::new(None),
        });
        let handle = RelayHandle {
            shared: shared.clone(),
        };
        (Self { shared, events }, handle)
    }

    /// Runs the message loop over an established stream until a fatal
    /// framing, protocol, codec, or IO error ends the connection.
    ///
    /// The error's display form is the disconnect reason to log.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, frames) = mpsc::unbounded_channel();
        *self.shared.sink.lock().unwrap() = Some(sink);
        let writer_task = tokio::spawn(drain_writes(writer, frames));

        let result = self.read_loop(reader).await;

        // Socket and session state are torn down together.
        self.shared.connected.store(false, Ordering::Release);
        *self.shared.sink.lock().unwrap() = None;
        writer_task.abort();
        result
    }

    async fn read_loop<R>(&self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.shared.compressor.lock().await.reset();

        // Both sides send their version eagerly; this is not request/response.
        let mut version = Vec::with_capacity(MessageHeader::SIZE + VERSION_STRING.len());
        version.extend_from_slice(
            &MessageHeader::new(MessageType::Version, VERSION_STRING.len() as u32).to_bytes(),
        );
        version.extend_from_slice(VERSION_STRING.as_bytes());
        self.shared.enqueue(version);
        self.shared.connected.store(true, Ordering::Release);

        loop {
            let mut raw = [0u8; MessageHeader::SIZE];
            reader
                .read_exact(&mut raw)
                .await
                .map_err(|_| RelayError::Read("failed to read message header".to_string()))?;
            let header = MessageHeader::from_bytes(&raw);
            header.validate()?;

            match header.kind() {
                Some(MessageType::Version) => {
                    let payload =
                        read_payload(&mut reader, header.length, "version message").await?;
                    if !matches_own_version(&payload) {
                        return Err(RelayError::Protocol("unknown version string".to_string()));
                    }
                    info!(
                        "connected to relay node with protocol version {}",
                        VERSION_STRING
                    );
                }
                Some(MessageType::Sponsor) => {
                    let payload =
                        read_payload(&mut reader, header.length, "sponsor string").await?;
                    info!("this node sponsored by: {}", printable(&payload));
                }
                Some(MessageType::MaxVersion) => {
                    let payload =
                        read_payload(&mut reader, header.length, "max_version string").await?;
                    if matches_own_version(&payload) {
                        return Err(RelayError::Protocol(
                            "got MAX_VERSION of same version as us".to_string(),
                        ));
                    }
                    warn!("relay network is using a later version (PLEASE UPGRADE)");
                }
                Some(MessageType::Block) => {
                    let decoded = self
                        .shared
                        .compressor
                        .lock()
                        .await
                        .decompress_block(&mut reader, header.length)
                        .await?;
                    info!(
                        "{} recv'd, size {} with {} bytes on the wire",
                        decoded.hash,
                        decoded.block.payload_len(),
                        decoded.wire_size
                    );
                    let _ = self.events.send(RelayEvent::Block(decoded.block));
                }
                Some(MessageType::EndBlock) => {
                    // Sentinel for the decompressor's benefit; nothing to do.
                }
                Some(MessageType::Transaction) => {
                    let accepted = self
                        .shared
                        .compressor
                        .lock()
                        .await
                        .accepts_loose_tx(header.length);
                    if !accepted {
                        return Err(RelayError::Protocol(
                            "got freely relayed transaction too large".to_string(),
                        ));
                    }
                    let payload =
                        read_payload(&mut reader, header.length, "loose transaction data").await?;
                    let tx = Bytes::from(payload);
                    info!("received transaction of size {} from relay server", tx.len());
                    self.shared.compressor.lock().await.register_loose_tx(&tx);
                    let _ = self.events.send(RelayEvent::Transaction(tx));
                }
                None => {
                    return Err(RelayError::Protocol("got unknown message type".to_string()));
                }
            }
        }
    }
}

/// Compares a version payload against our own, up to the shorter length.
fn matches_own_version(payload: &[u8]) -> bool {
    let own = VERSION_STRING.as_bytes();
    let shorter = own.len().min(payload.len());
    payload[..shorter] == own[..shorter]
}

async fn read_payload<R>(reader: &mut R, length: u32, what: &str) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut payload = vec![0u8; length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| RelayError::Read(format!("failed to read {}", what)))?;
    Ok(payload)
}
