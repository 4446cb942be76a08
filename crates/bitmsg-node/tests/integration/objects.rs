//! Objects pushed to a node over TCP: accepted, stored, or dropped.

use std::time::Duration;

use bitmsg_protocol::pow::{prefix_nonce, verify};
use bitmsg_protocol::{
    Command, FramedStream, GetPubKey, InventoryHash, ObjectPayload, PowObject, PowParams,
    ProtocolVersion, Version, WireMessage,
};
use tokio::net::TcpStream;

use crate::harness::{TestNodeBuilder, EASY_POW};

const WAIT: Duration = Duration::from_secs(5);

async fn push(addr: std::net::SocketAddr, msg: WireMessage) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut io = FramedStream::new(stream);
    io.write_message(msg).await.unwrap();
}

fn easy_object(seed: u8) -> WireMessage {
    GetPubKey::new(1_400_000_000, 3, 1, [seed; 20])
        .to_wire(EASY_POW)
        .unwrap()
}

/// A valid object pushed to a node is stored and handed to the application.
#[tokio::test]
async fn test_pushed_object_stored() {
    let mut b = TestNodeBuilder::new().sqlite().build().await.unwrap();
    let msg = easy_object(1);
    let hash = InventoryHash::of(msg.payload());

    push(b.addr, msg).await;

    let received = b.next_object(WAIT).await.unwrap();
    assert_eq!(received.hash, hash);
    assert!(matches!(received.object, ObjectPayload::GetPubKey(_)));
    assert!(b.has(&hash));

    b.shutdown().await;
}

/// An object below the node's PoW target is dropped; the node keeps serving.
#[tokio::test]
async fn test_pow_failing_object_dropped() {
    let strict = PowParams::new(100_000, 100_000);
    let mut b = TestNodeBuilder::new().pow(strict).build().await.unwrap();

    let body = GetPubKey::new(1_400_000_000, 3, 1, [2; 20]).body();
    let mut nonce = 0u64;
    while verify(&prefix_nonce(nonce, &body), strict) {
        nonce += 1;
    }
    let weak = WireMessage::new(Command::GetPubKey, prefix_nonce(nonce, &body)).unwrap();
    let weak_hash = InventoryHash::of(weak.payload());
    push(b.addr, weak).await;

    // Still accepting connections: a handshake completes afterwards.
    let a = TestNodeBuilder::new().build().await.unwrap();
    a.node.version_exchange(b.addr).await.unwrap();

    assert!(!b.has(&weak_hash));
    assert!(b.node.inventory().is_empty().unwrap());
    assert!(b.next_object(Duration::from_millis(200)).await.is_err());

    a.shutdown().await;
    b.shutdown().await;
}

/// Undecodable object bytes are dropped without touching the inventory.
#[tokio::test]
async fn test_malformed_object_dropped() {
    let mut b = TestNodeBuilder::new().build().await.unwrap();
    push(b.addr, WireMessage::new(Command::PubKey, vec![0xAB; 10]).unwrap()).await;

    assert!(b.next_object(Duration::from_millis(200)).await.is_err());
    assert!(b.node.inventory().is_empty().unwrap());

    b.shutdown().await;
}

/// A connection opening with a non-initial command is ignored.
#[tokio::test]
async fn test_unsupported_first_command_ignored() {
    let b = TestNodeBuilder::new().build().await.unwrap();
    push(b.addr, WireMessage::new(Command::Verack, Vec::new()).unwrap()).await;

    let a = TestNodeBuilder::new().build().await.unwrap();
    a.node.version_exchange(b.addr).await.unwrap();

    a.shutdown().await;
    b.shutdown().await;
}

/// The same object pushed twice is delivered once.
#[tokio::test]
async fn test_duplicate_object_delivered_once() {
    let mut b = TestNodeBuilder::new().build().await.unwrap();
    let msg = easy_object(3);

    push(b.addr, msg.clone()).await;
    b.next_object(WAIT).await.unwrap();
    push(b.addr, msg).await;

    assert!(b.next_object(Duration::from_millis(200)).await.is_err());
    assert_eq!(b.node.inventory().len().unwrap(), 1);

    b.shutdown().await;
}

/// A raw client speaking the handshake by hand gets the full sequence.
#[tokio::test]
async fn test_raw_client_handshake_sequence() {
    let b = TestNodeBuilder::new().build().await.unwrap();
    let stream = TcpStream::connect(b.addr).await.unwrap();
    let mut io = FramedStream::new(stream);

    let from = bitmsg_protocol::NetAddress::new(
        1,
        std::net::SocketAddrV4::new(std::net::Ipv4Addr::new(127, 0, 0, 1), 40000),
    );
    let to = b.record().net_address();
    let ours = Version::new(from, to, 12345);
    io.write_message(WireMessage::new(Command::Version, ours.encode(ProtocolVersion::V1)).unwrap())
        .await
        .unwrap();

    let verack = io.read_message().await.unwrap();
    assert_eq!(verack.command(), &Command::Verack);
    let version = io.read_message().await.unwrap();
    let theirs = Version::decode(version.expect(Command::Version).unwrap()).unwrap();
    assert_eq!(theirs.protocol(), Some(ProtocolVersion::V1));
    assert_eq!(theirs.to_addr, from);

    io.write_message(WireMessage::new(Command::Verack, Vec::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(io.read_message().await.unwrap().command(), &Command::Addr);
    assert_eq!(io.read_message().await.unwrap().command(), &Command::Inv);

    io.write_message(WireMessage::new(Command::Addr, vec![0]).unwrap())
        .await
        .unwrap();
    io.write_message(WireMessage::new(Command::Inv, vec![0]).unwrap())
        .await
        .unwrap();

    b.wait_peers(1, WAIT).await.unwrap();
    assert_eq!(
        b.node.peers().snapshot().await[0].socket_addr(),
        from.socket_addr()
    );

    b.shutdown().await;
}
