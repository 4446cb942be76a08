//! Version handshake over a framed byte stream.
//!
//! Initiator:  version ->, <- verack, <- version, verack ->, addr ->, inv ->,
//!             <- addr, <- inv
//! Responder:  <- version, verack ->, version ->, <- verack, addr ->, inv ->,
//!             <- addr, <- inv
//!
//! Each side writes its addr/inv pair before reading the peer's, so neither
//! end waits on the other. Any failure leaves the engine in `Failed` and
//! returns the error; nothing learned from the peer is handed back.

use std::time::Duration;

use bitmsg_protocol::{
    decode_addr_list, decode_inventory, encode_addr_list, encode_inventory, AddressRecord,
    Command, FramedStream, InventoryHash, ProtocolError, ProtocolVersion, Version, WireMessage,
};
use tokio::io::{AsyncRead, AsyncWrite};

type Result<T> = bitmsg_protocol::Result<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    SentVersion,
    ReceivedVerack,
    ReceivedVersion,
    SentVerack,
    SentAddrInv,
    ReceivedAddrInv,
    Done,
    Failed,
}

/// What a completed handshake learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub peer_version: Version,
    pub peer_addresses: Vec<AddressRecord>,
    pub peer_inventory: Vec<InventoryHash>,
}

impl HandshakeOutcome {
    /// Protocol the peer declared in its `version`.
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.peer_version.protocol()
    }
}

/// One handshake, one connection. Built from a snapshot of the node's
/// shared state taken before the exchange starts.
pub struct Handshake {
    local: Version,
    peers: Vec<AddressRecord>,
    inventory: Vec<InventoryHash>,
    io_timeout: Duration,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(
        local: Version,
        peers: Vec<AddressRecord>,
        inventory: Vec<InventoryHash>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            local,
            peers,
            inventory,
            io_timeout,
            state: HandshakeState::Start,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the initiator side. `protocol` encodes our own `version`; the
    /// rest of the session follows the protocol the peer answers with.
    pub async fn initiate<S>(
        &mut self,
        stream: &mut FramedStream<S>,
        protocol: ProtocolVersion,
    ) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.run_initiator(stream, protocol).await;
        self.finish(result)
    }

    /// Run the responder side, given the unsolicited `version` frame that
    /// opened the connection.
    pub async fn respond<S>(
        &mut self,
        stream: &mut FramedStream<S>,
        first: WireMessage,
    ) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.run_responder(stream, first).await;
        self.finish(result)
    }

    async fn run_initiator<S>(
        &mut self,
        stream: &mut FramedStream<S>,
        protocol: ProtocolVersion,
    ) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.send(stream, Command::Version, self.local.encode(protocol))
            .await?;
        self.state = HandshakeState::SentVersion;

        self.recv(stream, Command::Verack).await?;
        self.state = HandshakeState::ReceivedVerack;

        let peer_version = self.accept_version(&self.recv(stream, Command::Version).await?)?;
        self.state = HandshakeState::ReceivedVersion;

        self.send(stream, Command::Verack, Vec::new()).await?;
        self.state = HandshakeState::SentVerack;

        self.exchange_addr_inv(stream, peer_version).await
    }

    async fn run_responder<S>(
        &mut self,
        stream: &mut FramedStream<S>,
        first: WireMessage,
    ) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_version = self.accept_version(first.expect(Command::Version)?)?;
        self.state = HandshakeState::ReceivedVersion;
        let protocol = negotiated(&peer_version)?;

        self.send(stream, Command::Verack, Vec::new()).await?;
        self.state = HandshakeState::SentVerack;

        self.local.to_addr = peer_version.from_addr;
        self.send(stream, Command::Version, self.local.encode(protocol))
            .await?;
        self.state = HandshakeState::SentVersion;

        self.recv(stream, Command::Verack).await?;
        self.state = HandshakeState::ReceivedVerack;

        self.exchange_addr_inv(stream, peer_version).await
    }

    async fn exchange_addr_inv<S>(
        &mut self,
        stream: &mut FramedStream<S>,
        peer_version: Version,
    ) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let protocol = negotiated(&peer_version)?;

        self.send(stream, Command::Addr, encode_addr_list(protocol, &self.peers))
            .await?;
        self.send(stream, Command::Inv, encode_inventory(&self.inventory))
            .await?;
        self.state = HandshakeState::SentAddrInv;

        let peer_addresses = decode_addr_list(protocol, &self.recv(stream, Command::Addr).await?)?;
        let peer_inventory = decode_inventory(&self.recv(stream, Command::Inv).await?)?;
        self.state = HandshakeState::ReceivedAddrInv;

        Ok(HandshakeOutcome {
            peer_version,
            peer_addresses,
            peer_inventory,
        })
    }

    fn accept_version(&self, payload: &[u8]) -> Result<Version> {
        let peer = Version::decode(payload)?;
        if peer.nonce == self.local.nonce {
            return Err(ProtocolError::SelfConnection);
        }
        Ok(peer)
    }

    async fn send<S>(
        &self,
        stream: &mut FramedStream<S>,
        command: Command,
        payload: Vec<u8>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let msg = WireMessage::new(command, payload)?;
        tokio::time::timeout(self.io_timeout, stream.write_message(msg))
            .await
            .map_err(|_| ProtocolError::Timeout)?
    }

    /// Read the next frame and require `expected`; returns its payload.
    async fn recv<S>(&self, stream: &mut FramedStream<S>, expected: Command) -> Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let msg = tokio::time::timeout(self.io_timeout, stream.read_message())
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        msg.expect(expected)?;
        Ok(msg.into_payload())
    }

    fn finish(&mut self, result: Result<HandshakeOutcome>) -> Result<HandshakeOutcome> {
        match result {
            Ok(outcome) => {
                self.state = HandshakeState::Done;
                Ok(outcome)
            }
            Err(e) => {
                tracing::debug!(state = ?self.state, error = %e, "handshake: failed");
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }
}

fn negotiated(peer: &Version) -> Result<ProtocolVersion> {
    peer.protocol()
        .ok_or_else(|| ProtocolError::MalformedInput("version without protocol".into()))
}
