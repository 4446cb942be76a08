//! Best-effort relay and publish.

use std::time::Duration;

use bitmsg_node::node::RelayReport;
use bitmsg_protocol::{GetPubKey, ObjectPayload, PowObject};

use crate::harness::{dead_addr, record_for, TestNodeBuilder, EASY_POW};

const WAIT: Duration = Duration::from_secs(5);

/// One unreachable peer is reported as failed; the others still get the object.
#[tokio::test]
async fn test_relay_partial_failure() {
    let mut b = TestNodeBuilder::new().build().await.unwrap();
    let mut c = TestNodeBuilder::new().build().await.unwrap();
    let dead = dead_addr().await;

    let a = TestNodeBuilder::new()
        .timeout(Duration::from_secs(1))
        .peer(b.record())
        .peer(c.record())
        .peer(record_for(dead))
        .build()
        .await
        .unwrap();

    let msg = GetPubKey::new(1_400_000_000, 3, 1, [4; 20])
        .to_wire(EASY_POW)
        .unwrap();
    let report = a.node.relay(msg).await;
    assert_eq!(
        report,
        RelayReport {
            delivered: 2,
            failed: 1
        }
    );

    let from_b = b.next_object(WAIT).await.unwrap();
    let from_c = c.next_object(WAIT).await.unwrap();
    assert_eq!(from_b.hash, from_c.hash);

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

/// Relay never contacts more than `relay_fanout` peers.
#[tokio::test]
async fn test_relay_respects_fanout() {
    let b = TestNodeBuilder::new().build().await.unwrap();
    let c = TestNodeBuilder::new().build().await.unwrap();
    let d = TestNodeBuilder::new().build().await.unwrap();

    let a = TestNodeBuilder::new()
        .relay_fanout(1)
        .peer(b.record())
        .peer(c.record())
        .peer(d.record())
        .build()
        .await
        .unwrap();

    let msg = GetPubKey::new(1_400_000_000, 3, 1, [5; 20])
        .to_wire(EASY_POW)
        .unwrap();
    let report = a.node.relay(msg).await;
    assert_eq!(report.delivered + report.failed, 1);
    assert_eq!(report.delivered, 1);

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
    d.shutdown().await;
}

/// Publishing mines on the worker, stores locally, and relays to peers.
#[tokio::test]
async fn test_publish_reaches_peer() {
    let mut b = TestNodeBuilder::new().build().await.unwrap();
    let a = TestNodeBuilder::new().peer(b.record()).build().await.unwrap();

    let object = ObjectPayload::from(GetPubKey::for_ripe(1, [6; 20]));
    let (hash, report) = a.node.publish(object).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(a.has(&hash));

    let received = b.next_object(WAIT).await.unwrap();
    assert_eq!(received.hash, hash);
    assert!(b.has(&hash));

    a.shutdown().await;
    b.shutdown().await;
}

/// Relay with an empty peer book is a no-op.
#[tokio::test]
async fn test_relay_without_peers() {
    let a = TestNodeBuilder::new().build().await.unwrap();
    let msg = GetPubKey::new(1_400_000_000, 3, 1, [8; 20])
        .to_wire(EASY_POW)
        .unwrap();
    assert_eq!(a.node.relay(msg).await, RelayReport::default());
    a.shutdown().await;
}
