//! Cross-protocol forwarding between the relay network and the local node.
//!
//! The two protocol clients never reference each other. Each decodes its
//! inbound traffic onto an event channel, and the [`BridgeRouter`], wired
//! up in a second initialisation phase once both clients exist, consumes
//! both channels and writes into both handles. Forwarding is
//! fire-and-forget: no acknowledgement, no backpressure beyond the socket
//! buffers.
//!
//! The transaction dedup policy lives here. A transaction learned from the
//! relay network goes to the node and is also re-announced to the relay
//! network in compact form; the compressor suppresses that re-announce when
//! the server already holds the transaction, so nothing bounces forever. A
//! transaction learned from the node always goes out out-of-band, since the
//! relay server's dictionary has no reason to contain it yet.

use tokio::sync::mpsc;
use tracing::debug;

use relay_p2p::{P2pEvent, P2pHandle};
use relay_protocol::{RelayEvent, RelayHandle};

/// Forwards events between the two sides, applying the dedup policy.
pub struct BridgeRouter {
    relay: RelayHandle,
    p2p: P2pHandle,
    relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    p2p_events: mpsc::UnboundedReceiver<P2pEvent>,
}

impl BridgeRouter {
    /// Wires both sides together. This is the second phase of
    /// initialisation: both clients must already exist, each holding only
    /// its own event sender.
    pub fn new(
        relay: RelayHandle,
        p2p: P2pHandle,
        relay_events: mpsc::UnboundedReceiver<RelayEvent>,
        p2p_events: mpsc::UnboundedReceiver<P2pEvent>,
    ) -> Self {
        Self {
            relay,
            p2p,
            relay_events,
            p2p_events,
        }
    }

    /// Routes events until both clients have gone away.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.relay_events.recv() => match event {
                    Some(event) => self.on_relay_event(event).await,
                    None => break,
                },
                event = self.p2p_events.recv() => match event {
                    Some(event) => self.on_p2p_event(event).await,
                    None => break,
                },
            }
        }
        debug!("bridge router stopping: event sources closed");
    }

    async fn on_relay_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Block(block) => self.p2p.send_block(block),
            RelayEvent::Transaction(tx) => {
                self.p2p.send_transaction(&tx);
                // Compact re-announce toward the relay network; the codec is
                // the source of truth on whether the server already has it.
                self.relay.send_transaction(&tx, false).await;
            }
        }
    }

    async fn on_p2p_event(&self, event: P2pEvent) {
        match event {
            P2pEvent::Block(block) => self.relay.send_block(&block).await,
            P2pEvent::Transaction(tx) => self.relay.send_transaction(&tx, true).await,
        }
    }
}
