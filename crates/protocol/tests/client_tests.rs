//! Relay client state machine tests.
//!
//! Each test scripts one side of a relay conversation over an in-memory
//! duplex stream and asserts the client's dispatch, disconnect, and
//! forwarding behavior.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use relay_core::BlockBuf;
use relay_protocol::{
    FlatCompressor, MessageHeader, MessageType, RelayClient, RelayError, RelayEvent, RelayHandle,
    MAX_MESSAGE_SIZE, VERSION_STRING,
};

struct TestConn {
    server: DuplexStream,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    handle: RelayHandle,
    task: JoinHandle<relay_protocol::Result<()>>,
}

/// Spins up a client against an in-memory connection and consumes its eager
/// version message so tests start from the streaming state.
async fn connect() -> TestConn {
    let (client_io, server) = duplex(1 << 20);
    let (events_tx, events) = mpsc::unbounded_channel();
    let (client, handle) = RelayClient::new(Box::new(FlatCompressor::new()), events_tx);
    let (reader, writer) = tokio::io::split(client_io);
    let task = tokio::spawn(async move { client.run(reader, writer).await });

    let mut conn = TestConn {
        server,
        events,
        handle,
        task,
    };
    let (header, payload) = conn.read_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Version));
    assert_eq!(payload, VERSION_STRING.as_bytes());
    conn
}

impl TestConn {
    async fn send_frame(&mut self, kind: MessageType, payload: &[u8]) {
        self.server
            .write_all(&MessageHeader::new(kind, payload.len() as u32).to_bytes())
            .await
            .unwrap();
        self.server.write_all(payload).await.unwrap();
    }

    async fn read_frame(&mut self) -> (MessageHeader, Vec<u8>) {
        let mut raw = [0u8; MessageHeader::SIZE];
        self.server.read_exact(&mut raw).await.unwrap();
        let header = MessageHeader::from_bytes(&raw);
        let mut payload = vec![0u8; header.length as usize];
        self.server.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    async fn disconnect_reason(self) -> RelayError {
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("client should have disconnected")
            .unwrap()
            .unwrap_err()
    }
}

fn sample_block(len: usize) -> BlockBuf {
    let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    BlockBuf::from_payload(&payload)
}

#[tokio::test]
async fn test_connect_queues_version_before_reading() {
    // `connect` itself asserts the eager version frame.
    let conn = connect().await;
    assert!(conn.handle.is_connected());
}

#[tokio::test]
async fn test_matching_version_keeps_the_connection_up() {
    let mut conn = connect().await;
    conn.send_frame(MessageType::Version, VERSION_STRING.as_bytes())
        .await;
    conn.send_frame(MessageType::Transaction, b"tx after version")
        .await;

    match timeout(Duration::from_secs(5), conn.events.recv()).await {
        Ok(Some(RelayEvent::Transaction(tx))) => assert_eq!(&tx[..], b"tx after version"),
        other => panic!("expected a transaction event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_version_string_disconnects() {
    let mut conn = connect().await;
    conn.send_frame(MessageType::Version, b"some other protocol")
        .await;

    match conn.disconnect_reason().await {
        RelayError::Protocol(reason) => assert_eq!(reason, "unknown version string"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_magic_disconnects_before_type_or_length() {
    let mut conn = connect().await;
    // Bad magic combined with an unknown tag and an oversized length: the
    // magic check must be the one that fires.
    let mut raw = [0u8; MessageHeader::SIZE];
    raw[0..4].copy_from_slice(&0xdead_beefu32.to_be_bytes());
    raw[4..8].copy_from_slice(&99u32.to_be_bytes());
    raw[8..12].copy_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
    conn.server.write_all(&raw).await.unwrap();

    match conn.disconnect_reason().await {
        RelayError::Framing(reason) => assert_eq!(reason, "invalid magic bytes"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_message_disconnects_before_payload_read() {
    let mut conn = connect().await;
    // Header only; no payload ever follows.
    let header = MessageHeader::new(MessageType::Transaction, MAX_MESSAGE_SIZE + 1);
    conn.server.write_all(&header.to_bytes()).await.unwrap();

    match conn.disconnect_reason().await {
        RelayError::Framing(reason) => assert_eq!(reason, "message too large"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_message_type_disconnects() {
    let mut conn = connect().await;
    let header = MessageHeader {
        magic: relay_protocol::RELAY_MAGIC,
        kind_tag: 42,
        length: 0,
    };
    conn.server.write_all(&header.to_bytes()).await.unwrap();

    match conn.disconnect_reason().await {
        RelayError::Protocol(reason) => assert_eq!(reason, "got unknown message type"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_max_version_equal_to_own_disconnects() {
    let mut conn = connect().await;
    conn.send_frame(MessageType::MaxVersion, VERSION_STRING.as_bytes())
        .await;

    match conn.disconnect_reason().await {
        RelayError::Protocol(reason) => assert_eq!(reason, "got MAX_VERSION of same version as us"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_newer_max_version_only_warns() {
    let mut conn = connect().await;
    conn.send_frame(MessageType::MaxVersion, b"some newer protocol")
        .await;
    // The connection must survive; a follow-up transaction proves the loop
    // is still dispatching.
    conn.send_frame(MessageType::Transaction, b"still alive").await;

    match timeout(Duration::from_secs(5), conn.events.recv()).await {
        Ok(Some(RelayEvent::Transaction(tx))) => assert_eq!(&tx[..], b"still alive"),
        other => panic!("expected a transaction event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sponsor_is_display_only() {
    let mut conn = connect().await;
    conn.send_frame(MessageType::Sponsor, b"sponsored \x1b by nobody")
        .await;
    conn.send_frame(MessageType::Transaction, b"after sponsor").await;

    match timeout(Duration::from_secs(5), conn.events.recv()).await {
        Ok(Some(RelayEvent::Transaction(_))) => {}
        other => panic!("expected a transaction event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_end_block_is_a_no_op() {
    let mut conn = connect().await;
    conn.send_frame(MessageType::EndBlock, b"").await;
    conn.send_frame(MessageType::Transaction, b"after sentinel")
        .await;

    match timeout(Duration::from_secs(5), conn.events.recv()).await {
        Ok(Some(RelayEvent::Transaction(_))) => {}
        other => panic!("expected a transaction event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_loose_transaction_disconnects() {
    let mut conn = connect().await;
    // Over the free-relay ceiling but under the frame cap.
    let header = MessageHeader::new(MessageType::Transaction, 500_000);
    conn.server.write_all(&header.to_bytes()).await.unwrap();

    match conn.disconnect_reason().await {
        RelayError::Protocol(reason) => {
            assert_eq!(reason, "got freely relayed transaction too large")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_received_transaction_is_not_echoed_back_in_band() {
    let mut conn = connect().await;
    conn.send_frame(MessageType::Transaction, b"seen on relay").await;

    let tx = match timeout(Duration::from_secs(5), conn.events.recv()).await {
        Ok(Some(RelayEvent::Transaction(tx))) => tx,
        other => panic!("expected a transaction event, got {:?}", other),
    };

    // The compact re-announce must be suppressed: the codec knows the server
    // already holds this transaction.
    conn.handle.send_transaction(&tx, false).await;
    // A marker send afterwards shows up as the very next frame, proving the
    // suppressed transaction put no bytes on the wire.
    let marker = Bytes::from_static(b"marker transaction");
    conn.handle.send_transaction(&marker, true).await;

    let (header, payload) = conn.read_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Transaction));
    assert_eq!(payload, b"marker transaction");
}

#[tokio::test]
async fn test_block_from_relay_is_decoded_and_emitted() {
    let mut conn = connect().await;
    let block = sample_block(300);
    conn.send_frame(MessageType::Block, block.payload()).await;
    conn.send_frame(MessageType::EndBlock, b"").await;

    match timeout(Duration::from_secs(5), conn.events.recv()).await {
        Ok(Some(RelayEvent::Block(received))) => {
            assert_eq!(received.payload(), block.payload());
            assert_eq!(received.hash(), block.hash());
        }
        other => panic!("expected a block event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_block_round_trips_through_the_decode_path() {
    let mut sender = connect().await;
    let block = sample_block(400);
    sender.handle.send_block(&block).await;

    // The wire form: one BLOCK frame followed by the END_BLOCK sentinel.
    let (header, payload) = sender.read_frame().await;
    assert_eq!(header.kind(), Some(MessageType::Block));
    let (sentinel, _) = sender.read_frame().await;
    assert_eq!(sentinel.kind(), Some(MessageType::EndBlock));
    assert_eq!(sentinel.length, 0);

    // Feed the captured frame into a fresh connection's decode path.
    let mut receiver = connect().await;
    receiver.send_frame(MessageType::Block, &payload).await;
    receiver.send_frame(MessageType::EndBlock, b"").await;

    match timeout(Duration::from_secs(5), receiver.events.recv()).await {
        Ok(Some(RelayEvent::Block(decoded))) => {
            assert_eq!(decoded.payload(), block.payload());
            assert_eq!(decoded.hash(), block.hash());
        }
        other => panic!("expected a block event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sends_are_dropped_until_connected() {
    let (events_tx, _events) = mpsc::unbounded_channel();
    let (_client, handle) = RelayClient::new(Box::new(FlatCompressor::new()), events_tx);

    assert!(!handle.is_connected());
    // No connection has ever run; both sends must be silent no-ops.
    handle.send_block(&sample_block(100)).await;
    handle
        .send_transaction(&Bytes::from_static(b"never sent"), true)
        .await;
}

#[tokio::test]
async fn test_server_close_reports_header_read_failure() {
    let conn = connect().await;
    drop(conn.server);

    match timeout(Duration::from_secs(5), conn.task)
        .await
        .expect("client should have disconnected")
        .unwrap()
    {
        Err(RelayError::Read(reason)) => assert_eq!(reason, "failed to read message header"),
        other => panic!("unexpected result: {:?}", other),
    }
}
