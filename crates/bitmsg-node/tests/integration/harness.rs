//! Test harness for in-process bitmsg-node integration tests.
//!
//! Provides TestNode (one node serving on a loopback port) and
//! TestNodeBuilder (settings), all running in the test's tokio runtime.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use bitmsg_node::node::{Node, NodeSettings, ReceivedObject};
use bitmsg_node::peer_book::PeerBook;
use bitmsg_protocol::{
    now_secs, AddressRecord, InventoryHash, NetAddress, PowParams, ProtocolVersion,
};
use bitmsg_storage::{InventoryStore, MemoryInventory, SqliteInventory};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

/// Difficulty low enough to mine in microseconds.
pub const EASY_POW: PowParams = PowParams::new(1, 0);

/// A running in-process node.
pub struct TestNode {
    pub node: Node,
    pub addr: SocketAddr,
    pub objects: mpsc::Receiver<ReceivedObject>,
    shutdown_tx: broadcast::Sender<()>,
    _tempdir: Option<tempfile::TempDir>,
    _handle: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl TestNode {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Address record for adding this node to another node's book.
    pub fn record(&self) -> AddressRecord {
        record_for(self.addr)
    }

    /// Poll the peer book until it holds at least `n` entries, or timeout.
    pub async fn wait_peers(&self, n: usize, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let have = self.node.peers().len().await;
            if have >= n {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("timeout waiting for {n} peers (have {have})");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait for the next object delivered on the node's channel.
    pub async fn next_object(&mut self, timeout: Duration) -> anyhow::Result<ReceivedObject> {
        match tokio::time::timeout(timeout, self.objects.recv()).await {
            Ok(Some(received)) => Ok(received),
            Ok(None) => anyhow::bail!("object channel closed"),
            Err(_) => anyhow::bail!("timeout waiting for an object"),
        }
    }

    pub fn has(&self, hash: &InventoryHash) -> bool {
        self.node.inventory().contains(hash).unwrap_or(false)
    }
}

pub struct TestNodeBuilder {
    protocol: ProtocolVersion,
    pow: PowParams,
    relay_fanout: usize,
    timeout: Duration,
    peers: Vec<AddressRecord>,
    sqlite: bool,
}

#[allow(dead_code)]
impl TestNodeBuilder {
    pub fn new() -> Self {
        Self {
            protocol: ProtocolVersion::V2,
            pow: EASY_POW,
            relay_fanout: 10,
            timeout: Duration::from_secs(2),
            peers: Vec::new(),
            sqlite: false,
        }
    }

    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn pow(mut self, pow: PowParams) -> Self {
        self.pow = pow;
        self
    }

    pub fn relay_fanout(mut self, fanout: usize) -> Self {
        self.relay_fanout = fanout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn peer(mut self, record: AddressRecord) -> Self {
        self.peers.push(record);
        self
    }

    /// Back the inventory with SQLite in a temp dir instead of memory.
    pub fn sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    pub async fn build(self) -> anyhow::Result<TestNode> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let SocketAddr::V4(v4) = addr else {
            anyhow::bail!("expected IPv4 loopback, got {addr}");
        };

        let mut tempdir = None;
        let inventory: Arc<dyn InventoryStore> = if self.sqlite {
            let dir = tempfile::tempdir()?;
            let store = SqliteInventory::open(&dir.path().join("inventory.db"))?;
            tempdir = Some(dir);
            Arc::new(store)
        } else {
            Arc::new(MemoryInventory::new())
        };

        let settings = NodeSettings {
            local_addr: NetAddress::new(1, SocketAddrV4::new(*v4.ip(), v4.port())),
            user_agent: "/bitmsg-test:0.1/".into(),
            streams: vec![1],
            protocol: self.protocol,
            pow: self.pow,
            dial_timeout: self.timeout,
            read_timeout: self.timeout,
            relay_fanout: self.relay_fanout,
        };
        let (node, objects) = Node::new(settings, inventory, PeerBook::with_peers(self.peers));

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = {
            let node = node.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let _ = node.serve(listener, shutdown).await;
            })
        };

        Ok(TestNode {
            node,
            addr,
            objects,
            shutdown_tx,
            _tempdir: tempdir,
            _handle: handle,
        })
    }
}

/// An address on loopback nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}

pub fn record_for(addr: SocketAddr) -> AddressRecord {
    let SocketAddr::V4(v4) = addr else {
        unreachable!("loopback is IPv4")
    };
    AddressRecord::from_net(NetAddress::new(1, v4), now_secs(), 1)
}
