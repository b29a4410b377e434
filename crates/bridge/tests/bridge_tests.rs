//! End-to-end bridge tests.
//!
//! A full bridge (relay client, P2P client, router) is wired over
//! in-memory streams, with the tests scripting both the relay server and
//! bitcoind ends of the conversation.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use relay_bridge::BridgeRouter;
use relay_core::BlockBuf;
use relay_p2p::message::{frame_message, HEADER_SIZE};
use relay_p2p::version::build_version_payload;
use relay_p2p::{Command, P2pClient, P2pHeader};
use relay_protocol::{
    FlatCompressor, MessageHeader, MessageType, RelayClient, VERSION_STRING,
};

struct TestBridge {
    relay_server: DuplexStream,
    node: DuplexStream,
}

/// Brings up the whole bridge and walks both connections through their
/// handshakes.
async fn start_bridge() -> TestBridge {
    let (relay_io, relay_server) = duplex(1 << 22);
    let (node_io, node) = duplex(1 << 22);

    let (relay_events_tx, relay_events) = mpsc::unbounded_channel();
    let (p2p_events_tx, p2p_events) = mpsc::unbounded_channel();

    // Phase one: each client exists with only its own event sender.
    let (relay_client, relay_handle) =
        RelayClient::new(Box::new(FlatCompressor::new()), relay_events_tx);
    let (p2p_client, p2p_handle) = P2pClient::new(p2p_events_tx);

    // Phase two: the router is wired with both handles.
    let router = BridgeRouter::new(relay_handle, p2p_handle, relay_events, p2p_events);
    tokio::spawn(router.run());

    let (relay_reader, relay_writer) = tokio::io::split(relay_io);
    tokio::spawn(async move { relay_client.run(relay_reader, relay_writer).await });

    let peer: SocketAddr = "127.0.0.1:8333".parse().unwrap();
    let (node_reader, node_writer) = tokio::io::split(node_io);
    tokio::spawn(async move { p2p_client.run(node_reader, node_writer, peer).await });

    let mut bridge = TestBridge { relay_server, node };

    // Relay side: consume the client's eager version and answer with ours.
    let (header, payload) = bridge.read_relay_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Version));
    assert_eq!(payload, VERSION_STRING.as_bytes());
    bridge
        .send_relay_frame(MessageType::Version, VERSION_STRING.as_bytes())
        .await;

    // P2P side: full handshake.
    let (header, _) = bridge.read_node_message().await;
    assert_eq!(header.command, Command::VERSION);
    let node_addr: SocketAddr = "127.0.0.1:48333".parse().unwrap();
    bridge
        .send_node_message(Command::VERSION, &build_version_payload(node_addr, 1))
        .await;
    bridge.send_node_message(Command::VERACK, b"").await;
    let (header, _) = bridge.read_node_message().await;
    assert_eq!(header.command, Command::VERACK);

    bridge
}

impl TestBridge {
    async fn send_relay_frame(&mut self, kind: MessageType, payload: &[u8]) {
        self.relay_server
            .write_all(&MessageHeader::new(kind, payload.len() as u32).to_bytes())
            .await
            .unwrap();
        self.relay_server.write_all(payload).await.unwrap();
    }

    async fn read_relay_frame(&mut self) -> (MessageHeader, Vec<u8>) {
        let mut raw = [0u8; MessageHeader::SIZE];
        timeout(Duration::from_secs(5), self.relay_server.read_exact(&mut raw))
            .await
            .expect("timed out waiting for a relay frame")
            .unwrap();
        let header = MessageHeader::from_bytes(&raw);
        let mut payload = vec![0u8; header.length as usize];
        self.relay_server.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    async fn send_node_message(&mut self, command: Command, payload: &[u8]) {
        self.node
            .write_all(&frame_message(command, payload))
            .await
            .unwrap();
    }

    async fn read_node_message(&mut self) -> (P2pHeader, Vec<u8>) {
        let mut raw = [0u8; HEADER_SIZE];
        timeout(Duration::from_secs(5), self.node.read_exact(&mut raw))
            .await
            .expect("timed out waiting for a node message")
            .unwrap();
        let header = P2pHeader::from_bytes(&raw);
        let mut payload = vec![0u8; header.length as usize];
        self.node.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }
}

fn sample_block(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn test_relay_block_is_forwarded_to_the_node() {
    let mut bridge = start_bridge().await;
    let payload = sample_block(256);

    bridge.send_relay_frame(MessageType::Block, &payload).await;
    bridge.send_relay_frame(MessageType::EndBlock, b"").await;

    let (header, body) = bridge.read_node_message().await;
    assert_eq!(header.command, Command::BLOCK);
    assert_eq!(body, payload);
    assert!(header.verify_checksum(&body).is_ok());
}

#[tokio::test]
async fn test_node_block_is_forwarded_to_the_relay() {
    let mut bridge = start_bridge().await;
    let payload = sample_block(256);

    bridge.send_node_message(Command::BLOCK, &payload).await;

    let (header, body) = bridge.read_relay_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Block));
    assert_eq!(body, payload);

    let (sentinel, _) = bridge.read_relay_frame().await;
    assert_eq!(sentinel.kind(), Some(MessageType::EndBlock));
    assert_eq!(sentinel.length, 0);

    // Round-trip: the forwarded bytes carry the same block id.
    assert_eq!(
        BlockBuf::from_payload(&body).hash(),
        BlockBuf::from_payload(&payload).hash()
    );
}

#[tokio::test]
async fn test_relay_transaction_reaches_the_node_without_bouncing() {
    let mut bridge = start_bridge().await;

    bridge
        .send_relay_frame(MessageType::Transaction, b"novel transaction")
        .await;

    // Forwarded to bitcoind.
    let (header, body) = bridge.read_node_message().await;
    assert_eq!(header.command, Command::TX);
    assert_eq!(body, b"novel transaction");

    // The compact re-announce back to the relay server is suppressed, so
    // the next relay frame must be this marker from the node side.
    bridge.send_node_message(Command::TX, b"marker").await;
    let (header, body) = bridge.read_relay_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Transaction));
    assert_eq!(body, b"marker");
}

#[tokio::test]
async fn test_node_transaction_is_relayed_out_of_band() {
    let mut bridge = start_bridge().await;

    bridge.send_node_message(Command::TX, b"mempool tx").await;
    let (header, body) = bridge.read_relay_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Transaction));
    assert_eq!(body, b"mempool tx");

    // Out-of-band sends bypass the dictionary: the same transaction again
    // still goes out.
    bridge.send_node_message(Command::TX, b"mempool tx").await;
    let (header, body) = bridge.read_relay_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Transaction));
    assert_eq!(body, b"mempool tx");
}

#[tokio::test]
async fn test_transactions_flow_both_ways_concurrently() {
    let mut bridge = start_bridge().await;

    bridge.send_node_message(Command::TX, b"from the node").await;
    bridge
        .send_relay_frame(MessageType::Transaction, b"from the relay")
        .await;

    let (_, relay_bound) = bridge.read_relay_frame().await;
    assert_eq!(relay_bound, b"from the node");
    let (_, node_bound) = bridge.read_node_message().await;
    assert_eq!(node_bound, b"from the relay");
}
