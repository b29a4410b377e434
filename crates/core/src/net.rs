//! Write-side plumbing shared by the protocol clients.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Drains queued outbound frames onto a socket.
///
/// Both protocol clients push pre-framed byte buffers into an unbounded
/// channel from whatever task is bridging; this loop is the single writer on
/// the connection. It ends when the channel closes or the socket fails; the
/// read loop owns disconnect detection, so a write failure is only logged.
pub async fn drain_writes<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            debug!("write failed, leaving disconnect to the read loop: {}", err);
            break;
        }
    }
}
