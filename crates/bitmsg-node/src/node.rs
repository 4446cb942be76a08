//! Node -- accept loop, outbound version exchange, getdata, publish and relay.
//!
//! Every connection is one short exchange: the first frame on an accepted
//! stream decides what happens (handshake, getdata, or a pushed object) and
//! the stream is closed when that exchange ends. Shared state is the peer
//! book and the inventory; both are cheap to clone into connection tasks.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use bitmsg_protocol::{
    decode_getdata, encode_getdata, now_secs, AddressRecord, Command, FramedStream,
    InventoryHash, NetAddress, ObjectPayload, PowParams, ProtocolError, ProtocolVersion, Version,
    WireMessage, MAX_PAYLOAD_SIZE,
};
use bitmsg_storage::{InventoryStore, StoredObject};

use crate::config::NodeConfig;
use crate::handshake::{Handshake, HandshakeOutcome};
use crate::peer_book::{PeerBook, MAX_ADDR_ENTRIES};
use crate::pow_worker::PowWorker;

/// Most inventory hashes that fit in one `inv` payload.
const MAX_INV_ENTRIES: usize = (MAX_PAYLOAD_SIZE - 9) / 32;

/// Buffered objects waiting for the application.
const OBJECT_CHANNEL_SIZE: usize = 256;

/// Runtime settings, resolved from [`NodeConfig`] once the listen port is known.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Address advertised in our `version`.
    pub local_addr: NetAddress,
    pub user_agent: String,
    pub streams: Vec<u64>,
    /// Protocol used for outbound handshakes.
    pub protocol: ProtocolVersion,
    /// Difficulty demanded of received objects and used when publishing.
    pub pow: PowParams,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub relay_fanout: usize,
}

impl NodeSettings {
    /// `listen` is the bound socket; `external_ip` from config replaces its
    /// host when set.
    pub fn from_config(cfg: &NodeConfig, listen: SocketAddrV4) -> anyhow::Result<Self> {
        let ip = match &cfg.node.external_ip {
            Some(ip) => ip.parse()?,
            None => *listen.ip(),
        };
        Ok(Self {
            local_addr: NetAddress::new(cfg.node.services, SocketAddrV4::new(ip, listen.port())),
            user_agent: cfg.node.user_agent.clone(),
            streams: cfg.node.streams.clone(),
            protocol: cfg.protocol_version()?,
            pow: cfg.pow_params(),
            dial_timeout: cfg.dial_timeout(),
            read_timeout: cfg.read_timeout(),
            relay_fanout: cfg.network.relay_fanout,
        })
    }
}

/// A valid object that arrived from the network and was new to us.
#[derive(Debug, Clone)]
pub struct ReceivedObject {
    pub from: SocketAddr,
    pub hash: InventoryHash,
    pub object: ObjectPayload,
}

/// Result of one relay round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Node {
    settings: Arc<NodeSettings>,
    /// Sent in every `version`; a peer echoing it back is ourselves.
    nonce: u64,
    peers: PeerBook,
    inventory: Arc<dyn InventoryStore>,
    worker: PowWorker,
    objects: mpsc::Sender<ReceivedObject>,
}

impl Node {
    /// Build a node. Received objects are delivered on the returned channel.
    pub fn new(
        settings: NodeSettings,
        inventory: Arc<dyn InventoryStore>,
        peers: PeerBook,
    ) -> (Self, mpsc::Receiver<ReceivedObject>) {
        let (objects, objects_rx) = mpsc::channel(OBJECT_CHANNEL_SIZE);
        let node = Self {
            settings: Arc::new(settings),
            nonce: rand::random(),
            peers,
            inventory,
            worker: PowWorker::default(),
            objects,
        };
        (node, objects_rx)
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn peers(&self) -> &PeerBook {
        &self.peers
    }

    pub fn inventory(&self) -> &Arc<dyn InventoryStore> {
        &self.inventory
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Accept connections until `shutdown` fires. One task per connection.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "node: listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_conn(stream, peer).await {
                                tracing::warn!(peer = %peer, error = %e, "node: connection failed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "node: accept failed"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("node: accept loop stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_conn(self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let mut io = FramedStream::new(stream);
        let first = self.read(&mut io).await?;
        let command = first.command().clone();
        tracing::debug!(peer = %peer, command = %command, "node: inbound connection");

        match command {
            Command::Version => self.respond_version(&mut io, first, peer).await?,
            Command::GetData => {
                let sent = self.respond_getdata(&mut io, first.payload()).await?;
                tracing::info!(peer = %peer, sent, "node: served getdata");
            }
            c if c.is_object() => {
                self.accept_object(&first, peer).await;
            }
            other => {
                tracing::info!(peer = %peer, command = %other, "node: unsupported command dropped");
            }
        }
        Ok(())
    }

    async fn respond_version(
        &self,
        io: &mut FramedStream<TcpStream>,
        first: WireMessage,
        peer: SocketAddr,
    ) -> anyhow::Result<()> {
        let mut handshake = self.handshake(unspecified()).await?;
        let outcome = handshake.respond(io, first).await?;
        self.apply_outcome(&outcome, peer).await;
        tracing::info!(
            peer = %peer,
            agent = %outcome.peer_version.user_agent,
            addresses = outcome.peer_addresses.len(),
            inventory = outcome.peer_inventory.len(),
            "node: inbound handshake complete"
        );
        Ok(())
    }

    async fn respond_getdata(
        &self,
        io: &mut FramedStream<TcpStream>,
        payload: &[u8],
    ) -> anyhow::Result<usize> {
        let hashes = decode_getdata(payload)?;
        let mut sent = 0;
        for hash in &hashes {
            let Some(object) = self.inventory.get(hash)? else {
                continue;
            };
            self.write(io, object.to_wire()?).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Check, store and hand off a received object. Objects that fail to
    /// decode, fail their signature, or miss the PoW target are logged and
    /// dropped. Returns whether the object was new.
    pub async fn accept_object(&self, msg: &WireMessage, from: SocketAddr) -> bool {
        let hash = InventoryHash::of(msg.payload());
        let object = match ObjectPayload::from_wire(msg) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(
                    peer = %from,
                    hash = %hash,
                    error = %e,
                    "node: undecodable object dropped"
                );
                return false;
            }
        };
        if !object.verify_pow(self.settings.pow) {
            tracing::warn!(peer = %from, hash = %hash, "node: object below pow target dropped");
            return false;
        }

        let stored = StoredObject::new(msg.command().clone(), msg.payload().to_vec());
        match self.inventory.put(&stored) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(peer = %from, hash = %hash, "node: object already known");
                return false;
            }
            Err(e) => {
                tracing::error!(hash = %hash, error = %e, "node: inventory write failed");
                return false;
            }
        }
        tracing::info!(peer = %from, hash = %hash, command = %msg.command(), "node: object stored");

        // Never block a connection task on a slow application: the object is
        // already stored, so a full channel only loses the notification.
        let received = ReceivedObject { from, hash, object };
        match self.objects.try_send(received) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    peer = %from,
                    hash = %hash,
                    "node: object channel full, notification dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("node: object receiver closed");
            }
        }
        true
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Dial `addr` and run the initiator handshake. Peers learned are merged
    /// into the book only when the whole exchange succeeds.
    pub async fn version_exchange(&self, addr: SocketAddr) -> anyhow::Result<HandshakeOutcome> {
        let SocketAddr::V4(v4) = addr else {
            anyhow::bail!("IPv6 peers are not supported: {addr}");
        };
        let mut handshake = self.handshake(NetAddress::new(1, v4)).await?;
        let mut io = self.dial(addr).await?;
        let outcome = handshake.initiate(&mut io, self.settings.protocol).await?;
        self.apply_outcome(&outcome, addr).await;
        tracing::info!(
            peer = %addr,
            protocol = ?outcome.protocol(),
            agent = %outcome.peer_version.user_agent,
            addresses = outcome.peer_addresses.len(),
            inventory = outcome.peer_inventory.len(),
            "node: version exchange complete"
        );
        Ok(outcome)
    }

    /// Hashes from `advertised` not yet in the inventory.
    pub fn missing(&self, advertised: &[InventoryHash]) -> anyhow::Result<Vec<InventoryHash>> {
        let mut missing = Vec::new();
        for hash in advertised {
            if !self.inventory.contains(hash)? {
                missing.push(*hash);
            }
        }
        Ok(missing)
    }

    /// Request `hashes` from `addr`. Each returned object goes through
    /// [`accept_object`](Self::accept_object); returns how many were stored.
    pub async fn get_data(
        &self,
        addr: SocketAddr,
        hashes: &[InventoryHash],
    ) -> anyhow::Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }
        let mut io = self.dial(addr).await?;
        self.write(&mut io, WireMessage::new(Command::GetData, encode_getdata(hashes))?)
            .await?;

        let mut stored = 0;
        for _ in 0..hashes.len() {
            let next = tokio::time::timeout(self.settings.read_timeout, io.next_message())
                .await
                .map_err(|_| ProtocolError::Timeout)??;
            // The peer closes the stream once it has sent what it has.
            let Some(msg) = next else {
                break;
            };
            if !msg.command().is_object() {
                anyhow::bail!("peer {addr} answered getdata with {}", msg.command());
            }
            let hash = InventoryHash::of(msg.payload());
            if !hashes.contains(&hash) {
                tracing::warn!(peer = %addr, hash = %hash, "node: unrequested object dropped");
                continue;
            }
            if self.accept_object(&msg, addr).await {
                stored += 1;
            }
        }
        tracing::info!(peer = %addr, requested = hashes.len(), stored, "node: getdata complete");
        Ok(stored)
    }

    /// Mine (if needed), store, and relay an object of our own.
    pub async fn publish(
        &self,
        mut object: ObjectPayload,
    ) -> anyhow::Result<(InventoryHash, RelayReport)> {
        if object.pow_nonce().is_none() {
            let nonce = self.worker.mine(object.body(), self.settings.pow).await?;
            object.attach_nonce(nonce)?;
        } else if !object.verify_pow(self.settings.pow) {
            return Err(ProtocolError::PowUnsatisfied.into());
        }
        let Some(payload) = object.sealed() else {
            anyhow::bail!("object has no nonce after mining");
        };

        let stored = StoredObject::new(object.command(), payload);
        self.inventory.put(&stored)?;
        tracing::info!(hash = %stored.hash, command = %stored.command, "node: object published");

        let report = self.relay(stored.to_wire()?).await;
        Ok((stored.hash, report))
    }

    /// Send `msg` to up to `relay_fanout` random peers, each on its own task
    /// with its own timeouts. One attempt per peer; failures are counted.
    pub async fn relay(&self, msg: WireMessage) -> RelayReport {
        let targets = self.peers.sample(self.settings.relay_fanout).await;
        let mut tasks = JoinSet::new();
        for peer in targets {
            let node = self.clone();
            let msg = msg.clone();
            tasks.spawn(async move {
                let addr = peer.socket_addr();
                (addr, node.push(addr, msg).await)
            });
        }

        let mut report = RelayReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((addr, Ok(()))) => {
                    report.delivered += 1;
                    tracing::debug!(peer = %addr, "relay: delivered");
                }
                Ok((addr, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(peer = %addr, error = %e, "relay: delivery failed");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(error = %e, "relay: task failed");
                }
            }
        }
        tracing::info!(
            command = %msg.command(),
            delivered = report.delivered,
            failed = report.failed,
            "relay: round complete"
        );
        report
    }

    /// Drop inventory objects received more than `ttl` ago.
    pub fn prune(&self, ttl: Duration) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl)?;
        let removed = self.inventory.prune_before(cutoff)?;
        if removed > 0 {
            tracing::info!(removed, "node: inventory pruned");
        }
        Ok(removed)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn push(&self, addr: SocketAddr, msg: WireMessage) -> bitmsg_protocol::Result<()> {
        let mut io = self.dial(addr).await?;
        tokio::time::timeout(self.settings.dial_timeout, io.write_message(msg))
            .await
            .map_err(|_| ProtocolError::Timeout)?
    }

    async fn dial(&self, addr: SocketAddr) -> bitmsg_protocol::Result<FramedStream<TcpStream>> {
        let stream = tokio::time::timeout(self.settings.dial_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        Ok(FramedStream::new(stream))
    }

    async fn read(&self, io: &mut FramedStream<TcpStream>) -> bitmsg_protocol::Result<WireMessage> {
        tokio::time::timeout(self.settings.read_timeout, io.read_message())
            .await
            .map_err(|_| ProtocolError::Timeout)?
    }

    async fn write(
        &self,
        io: &mut FramedStream<TcpStream>,
        msg: WireMessage,
    ) -> bitmsg_protocol::Result<()> {
        tokio::time::timeout(self.settings.read_timeout, io.write_message(msg))
            .await
            .map_err(|_| ProtocolError::Timeout)?
    }

    fn local_version(&self, to: NetAddress) -> Version {
        Version::new(self.settings.local_addr, to, self.nonce)
            .with_user_agent(self.settings.user_agent.clone())
            .with_streams(self.settings.streams.clone())
    }

    /// Handshake seeded with a snapshot of the shared state.
    async fn handshake(&self, to: NetAddress) -> anyhow::Result<Handshake> {
        let mut peers = self.peers.snapshot().await;
        peers.truncate(MAX_ADDR_ENTRIES);
        let mut inventory = self.inventory.hashes()?;
        inventory.truncate(MAX_INV_ENTRIES);
        Ok(Handshake::new(
            self.local_version(to),
            peers,
            inventory,
            self.settings.read_timeout,
        ))
    }

    /// Merge what a finished handshake taught us: the peer itself plus its
    /// address list, minus our own address.
    async fn apply_outcome(&self, outcome: &HandshakeOutcome, observed: SocketAddr) {
        let own = self.settings.local_addr.socket_addr();
        let stream = outcome.peer_version.streams.first().copied().unwrap_or(1);
        let peer = match u32::try_from(stream) {
            Ok(stream) => {
                let mut declared = outcome.peer_version.from_addr;
                if declared.ip.is_unspecified() {
                    if let SocketAddr::V4(v4) = observed {
                        declared.ip = *v4.ip();
                    }
                }
                Some(AddressRecord::from_net(declared, now_secs(), stream))
            }
            Err(_) => {
                tracing::warn!(peer = %observed, stream, "node: peer stream out of range");
                None
            }
        };

        let learned: Vec<AddressRecord> = peer
            .into_iter()
            .chain(outcome.peer_addresses.iter().copied())
            .filter(|r| r.socket_addr() != own && !r.ip.is_unspecified() && r.port != 0)
            .collect();
        self.peers.merge(&learned).await;
    }
}

fn unspecified() -> NetAddress {
    NetAddress::new(0, SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 0))
}
