//! Version exchange and inventory sync between live nodes.

use std::time::Duration;

use bitmsg_protocol::{GetPubKey, ObjectPayload, ProtocolVersion};

use crate::harness::{dead_addr, TestNodeBuilder};

const WAIT: Duration = Duration::from_secs(5);

/// Two fresh nodes complete a handshake and learn each other's address.
#[tokio::test]
async fn test_two_node_version_exchange() {
    let a = TestNodeBuilder::new().build().await.unwrap();
    let b = TestNodeBuilder::new().build().await.unwrap();

    let outcome = a.node.version_exchange(b.addr).await.unwrap();
    assert_eq!(outcome.peer_version.from_addr.socket_addr(), b.addr);
    assert_eq!(outcome.peer_version.to_addr.socket_addr(), a.addr);
    assert_eq!(outcome.protocol(), Some(ProtocolVersion::V2));
    assert!(outcome.peer_inventory.is_empty());
    assert!(outcome.peer_addresses.is_empty());

    // Initiator applies before returning; the responder shortly after.
    let a_book = a.node.peers().snapshot().await;
    assert_eq!(a_book.len(), 1);
    assert_eq!(a_book[0].socket_addr(), b.addr);
    b.wait_peers(1, WAIT).await.unwrap();
    assert_eq!(b.node.peers().snapshot().await[0].socket_addr(), a.addr);

    a.shutdown().await;
    b.shutdown().await;
}

/// A v1 initiator gets a v1 answer.
#[tokio::test]
async fn test_v1_version_exchange() {
    let a = TestNodeBuilder::new()
        .protocol(ProtocolVersion::V1)
        .build()
        .await
        .unwrap();
    let b = TestNodeBuilder::new().build().await.unwrap();

    let outcome = a.node.version_exchange(b.addr).await.unwrap();
    assert_eq!(outcome.protocol(), Some(ProtocolVersion::V1));
    b.wait_peers(1, WAIT).await.unwrap();

    a.shutdown().await;
    b.shutdown().await;
}

/// Addresses known to the responder reach the initiator.
#[tokio::test]
async fn test_peer_addresses_propagate() {
    let c = TestNodeBuilder::new().build().await.unwrap();
    let b = TestNodeBuilder::new().peer(c.record()).build().await.unwrap();
    let a = TestNodeBuilder::new().build().await.unwrap();

    let outcome = a.node.version_exchange(b.addr).await.unwrap();
    assert_eq!(outcome.peer_addresses.len(), 1);
    assert_eq!(outcome.peer_addresses[0].socket_addr(), c.addr);

    let book: Vec<_> = a
        .node
        .peers()
        .snapshot()
        .await
        .iter()
        .map(|r| r.socket_addr())
        .collect();
    assert!(book.contains(&b.addr));
    assert!(book.contains(&c.addr));

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

/// Dialling ourselves fails and leaves the peer book untouched.
#[tokio::test]
async fn test_self_connection_rejected() {
    let a = TestNodeBuilder::new().build().await.unwrap();

    assert!(a.node.version_exchange(a.addr).await.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a.node.peers().is_empty().await);

    a.shutdown().await;
}

/// Unreachable peer: dial error, nothing merged.
#[tokio::test]
async fn test_unreachable_peer() {
    let a = TestNodeBuilder::new().build().await.unwrap();
    let dead = dead_addr().await;

    assert!(a.node.version_exchange(dead).await.is_err());
    assert!(a.node.peers().is_empty().await);

    a.shutdown().await;
}

/// Inventory advertised in the handshake can be fetched with getdata.
#[tokio::test]
async fn test_inventory_sync_via_getdata() {
    let mut a = TestNodeBuilder::new().sqlite().build().await.unwrap();
    let b = TestNodeBuilder::new().build().await.unwrap();

    let object = ObjectPayload::from(GetPubKey::new(1_400_000_000, 3, 1, [7; 20]));
    let (hash, report) = b.node.publish(object).await.unwrap();
    assert_eq!(report.delivered + report.failed, 0);

    let outcome = a.node.version_exchange(b.addr).await.unwrap();
    assert_eq!(outcome.peer_inventory, vec![hash]);

    let wanted = a.node.missing(&outcome.peer_inventory).unwrap();
    assert_eq!(wanted, vec![hash]);
    assert_eq!(a.node.get_data(b.addr, &wanted).await.unwrap(), 1);
    assert!(a.has(&hash));

    let received = a.next_object(WAIT).await.unwrap();
    assert_eq!(received.hash, hash);
    assert_eq!(received.from, b.addr);
    assert!(a.node.missing(&outcome.peer_inventory).unwrap().is_empty());

    a.shutdown().await;
    b.shutdown().await;
}

/// Asking for hashes the peer does not have yields nothing.
#[tokio::test]
async fn test_getdata_unknown_hash() {
    let a = TestNodeBuilder::new().build().await.unwrap();
    let b = TestNodeBuilder::new().build().await.unwrap();

    let unknown = bitmsg_protocol::InventoryHash::of(b"never stored");
    assert_eq!(a.node.get_data(b.addr, &[unknown]).await.unwrap(), 0);
    assert!(!a.has(&unknown));

    a.shutdown().await;
    b.shutdown().await;
}
