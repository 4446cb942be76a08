//! Proof-of-work object payloads: `getpubkey`, `pubkey`, `msg`, `broadcast`.
//!
//! Every object is `nonce (u64) || body`. The nonce is mined over the body on
//! first encode and never changes afterwards; decoding only reads it.

use bytes::BufMut;

use bitmsg_crypto::{Cipher, KeyPair, PUBLIC_KEY_LENGTH, RIPE_LENGTH};

use crate::envelope::{Command, WireMessage};
use crate::payload::info::{BroadcastInfo, MsgInfo};
use crate::payload::inventory::InventoryHash;
use crate::payload::object_time;
use crate::pow::{self, PowParams};
use crate::var::{put_var_bytes, put_var_int, Reader};
use crate::{ProtocolError, Result, MAINNET};

/// An object payload guarded by proof of work.
pub trait PowObject {
    const COMMAND: Command;

    /// Encoded payload without the nonce prefix.
    fn body(&self) -> Vec<u8>;

    fn pow_nonce(&self) -> Option<u64>;

    /// Set a nonce mined elsewhere. Fails if one is already set.
    fn attach_nonce(&mut self, nonce: u64) -> Result<()>;

    /// Encode `nonce || body`, mining the nonce first if there is none yet.
    /// Blocks while mining.
    fn encode(&mut self, params: PowParams) -> Vec<u8>;

    /// Attach a worker-supplied nonce and encode.
    fn encode_with_nonce(&mut self, nonce: u64) -> Result<Vec<u8>> {
        self.attach_nonce(nonce)?;
        Ok(pow::prefix_nonce(nonce, &self.body()))
    }

    /// Encoded payload, if a nonce is set.
    fn sealed(&self) -> Option<Vec<u8>> {
        self.pow_nonce()
            .map(|nonce| pow::prefix_nonce(nonce, &self.body()))
    }

    fn to_wire(&mut self, params: PowParams) -> Result<WireMessage> {
        WireMessage::new(Self::COMMAND, self.encode(params))
    }
}

macro_rules! impl_pow_object {
    ($ty:ty, $command:expr) => {
        impl PowObject for $ty {
            const COMMAND: Command = $command;

            fn body(&self) -> Vec<u8> {
                self.encode_body()
            }

            fn pow_nonce(&self) -> Option<u64> {
                self.pow_nonce
            }

            fn attach_nonce(&mut self, nonce: u64) -> Result<()> {
                if self.pow_nonce.is_some() {
                    return Err(ProtocolError::NonceAlreadySet);
                }
                self.pow_nonce = Some(nonce);
                Ok(())
            }

            fn encode(&mut self, params: PowParams) -> Vec<u8> {
                let body = self.encode_body();
                let nonce = *self
                    .pow_nonce
                    .get_or_insert_with(|| pow::mine(&body, params));
                pow::prefix_nonce(nonce, &body)
            }
        }
    };
}

fn read_key(r: &mut Reader<'_>) -> Result<KeyPair> {
    Ok(KeyPair::decode_public(r.bytes(PUBLIC_KEY_LENGTH)?)?)
}

/// Request for the public keys behind a ripe hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPubKey {
    pow_nonce: Option<u64>,
    pub time: u64,
    pub addr_version: u64,
    pub stream: u64,
    pub ripe: [u8; RIPE_LENGTH],
}

impl GetPubKey {
    pub fn new(time: u64, addr_version: u64, stream: u64, ripe: [u8; RIPE_LENGTH]) -> Self {
        Self {
            pow_nonce: None,
            time,
            addr_version,
            stream,
            ripe,
        }
    }

    /// Request stamped with a fuzzed current time and the network's address
    /// version.
    pub fn for_ripe(stream: u64, ripe: [u8; RIPE_LENGTH]) -> Self {
        Self::new(object_time(), MAINNET.address_version, stream, ripe)
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 18 + RIPE_LENGTH);
        out.put_u64(self.time);
        put_var_int(&mut out, self.addr_version);
        put_var_int(&mut out, self.stream);
        out.put_slice(&self.ripe);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            pow_nonce: Some(r.u64()?),
            time: r.u64()?,
            addr_version: r.var_int()?,
            stream: r.var_int()?,
            ripe: r.array()?,
        })
    }
}

impl_pow_object!(GetPubKey, Command::GetPubKey);

/// Published public keys. Signed by `sign_key` at construction; the
/// signature covers every body field from `time` through `extra_bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubKey {
    pow_nonce: Option<u64>,
    time: u64,
    addr_version: u64,
    stream: u64,
    behavior: u32,
    sign_key: KeyPair,
    encrypt_key: KeyPair,
    demanded: PowParams,
    signature: Vec<u8>,
}

impl PubKey {
    /// Build and sign. `sign_key` must hold its private half; only the public
    /// halves are kept.
    pub fn new(
        time: u64,
        addr_version: u64,
        stream: u64,
        behavior: u32,
        sign_key: &KeyPair,
        encrypt_key: &KeyPair,
        demanded: PowParams,
    ) -> Result<Self> {
        let mut pubkey = Self {
            pow_nonce: None,
            time,
            addr_version,
            stream,
            behavior,
            sign_key: sign_key.public_only(),
            encrypt_key: encrypt_key.public_only(),
            demanded,
            signature: Vec::new(),
        };
        pubkey.signature = sign_key.sign(&pubkey.signed_fields())?;
        Ok(pubkey)
    }

    /// Announcement of our own keys: fuzzed current time, the network's
    /// address version, and the network's default difficulty demanded.
    pub fn for_keys(
        stream: u64,
        behavior: u32,
        sign_key: &KeyPair,
        encrypt_key: &KeyPair,
    ) -> Result<Self> {
        Self::new(
            object_time(),
            MAINNET.address_version,
            stream,
            behavior,
            sign_key,
            encrypt_key,
            MAINNET.pow,
        )
    }

    fn signed_fields(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 18 + 4 + 2 * PUBLIC_KEY_LENGTH + 18);
        out.put_u64(self.time);
        put_var_int(&mut out, self.addr_version);
        put_var_int(&mut out, self.stream);
        out.put_u32(self.behavior);
        out.put_slice(&self.sign_key.encode_public());
        out.put_slice(&self.encrypt_key.encode_public());
        put_var_int(&mut out, self.demanded.trials_per_byte);
        put_var_int(&mut out, self.demanded.extra_bytes);
        out
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = self.signed_fields();
        put_var_bytes(&mut out, &self.signature);
        out
    }

    /// Decode and verify the signature.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let pow_nonce = Some(r.u64()?);
        let signed_from = r.position();

        let time = r.u64()?;
        let addr_version = r.var_int()?;
        let stream = r.var_int()?;
        let behavior = r.u32()?;
        let sign_key = read_key(&mut r)?;
        let encrypt_key = read_key(&mut r)?;
        let demanded = PowParams::new(r.var_int()?, r.var_int()?);

        let signed = &r.consumed()[signed_from..];
        let signature = r.var_bytes()?.to_vec();
        if !sign_key.verify(signed, &signature) {
            return Err(ProtocolError::SignatureInvalid);
        }

        Ok(Self {
            pow_nonce,
            time,
            addr_version,
            stream,
            behavior,
            sign_key,
            encrypt_key,
            demanded,
            signature,
        })
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn addr_version(&self) -> u64 {
        self.addr_version
    }

    pub fn stream(&self) -> u64 {
        self.stream
    }

    pub fn behavior(&self) -> u32 {
        self.behavior
    }

    pub fn sign_key(&self) -> &KeyPair {
        &self.sign_key
    }

    pub fn encrypt_key(&self) -> &KeyPair {
        &self.encrypt_key
    }

    /// Difficulty the key owner demands for objects sent to it.
    pub fn demanded_pow(&self) -> PowParams {
        self.demanded
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Ripe hash of the published keys.
    pub fn ripe(&self) -> [u8; RIPE_LENGTH] {
        bitmsg_crypto::ripe_hash(&self.sign_key, &self.encrypt_key)
    }
}

impl_pow_object!(PubKey, Command::PubKey);

/// Person-to-person message. `data` is an encrypted [`MsgInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pow_nonce: Option<u64>,
    pub time: u64,
    pub stream: u64,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(time: u64, stream: u64, data: Vec<u8>) -> Self {
        Self {
            pow_nonce: None,
            time,
            stream,
            data,
        }
    }

    /// Sign `info` and encrypt it to `recipient`, stamped with a fuzzed
    /// current time.
    pub fn seal(info: &MsgInfo, recipient: &KeyPair, cipher: &dyn Cipher) -> Result<Self> {
        Self::seal_at(info, recipient, cipher, object_time())
    }

    /// [`seal`](Self::seal) with an explicit timestamp.
    pub fn seal_at(
        info: &MsgInfo,
        recipient: &KeyPair,
        cipher: &dyn Cipher,
        time: u64,
    ) -> Result<Self> {
        let data = cipher.encrypt(recipient, &info.encode()?)?;
        Ok(Self::new(time, info.stream, data))
    }

    /// Decrypt with `own` and verify the sender's signature.
    pub fn open(&self, cipher: &dyn Cipher, own: &KeyPair) -> Result<MsgInfo> {
        MsgInfo::decode(&cipher.decrypt(own, &self.data)?)
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 9 + self.data.len());
        out.put_u64(self.time);
        put_var_int(&mut out, self.stream);
        out.put_slice(&self.data);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            pow_nonce: Some(r.u64()?),
            time: r.u64()?,
            stream: r.var_int()?,
            data: r.rest().to_vec(),
        })
    }
}

impl_pow_object!(Message, Command::Msg);

/// Message to all subscribers of an address. `data` is an encrypted [`BroadcastInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pow_nonce: Option<u64>,
    pub time: u64,
    pub broadcast_version: u64,
    pub stream: u64,
    pub data: Vec<u8>,
}

impl Broadcast {
    pub fn new(time: u64, stream: u64, data: Vec<u8>) -> Self {
        Self {
            pow_nonce: None,
            time,
            broadcast_version: MAINNET.broadcast_version,
            stream,
            data,
        }
    }

    /// Sign `info` and encrypt it under `key`, stamped with a fuzzed current
    /// time.
    pub fn seal(info: &BroadcastInfo, key: &KeyPair, cipher: &dyn Cipher) -> Result<Self> {
        Self::seal_at(info, key, cipher, object_time())
    }

    /// [`seal`](Self::seal) with an explicit timestamp.
    pub fn seal_at(
        info: &BroadcastInfo,
        key: &KeyPair,
        cipher: &dyn Cipher,
        time: u64,
    ) -> Result<Self> {
        let data = cipher.encrypt(key, &info.encode()?)?;
        let mut broadcast = Self::new(time, info.stream, data);
        broadcast.broadcast_version = info.broadcast_version;
        Ok(broadcast)
    }

    pub fn open(&self, cipher: &dyn Cipher, key: &KeyPair) -> Result<BroadcastInfo> {
        BroadcastInfo::decode(&cipher.decrypt(key, &self.data)?)
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 18 + self.data.len());
        out.put_u64(self.time);
        put_var_int(&mut out, self.broadcast_version);
        put_var_int(&mut out, self.stream);
        out.put_slice(&self.data);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            pow_nonce: Some(r.u64()?),
            time: r.u64()?,
            broadcast_version: r.var_int()?,
            stream: r.var_int()?,
            data: r.rest().to_vec(),
        })
    }
}

impl_pow_object!(Broadcast, Command::Broadcast);

/// Any object payload, dispatched by envelope command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectPayload {
    GetPubKey(GetPubKey),
    PubKey(PubKey),
    Message(Message),
    Broadcast(Broadcast),
}

impl ObjectPayload {
    pub fn decode(command: &Command, data: &[u8]) -> Result<Self> {
        Ok(match command {
            Command::GetPubKey => ObjectPayload::GetPubKey(GetPubKey::decode(data)?),
            Command::PubKey => ObjectPayload::PubKey(PubKey::decode(data)?),
            Command::Msg => ObjectPayload::Message(Message::decode(data)?),
            Command::Broadcast => ObjectPayload::Broadcast(Broadcast::decode(data)?),
            other => {
                return Err(ProtocolError::MalformedInput(format!(
                    "{other} is not an object command"
                )))
            }
        })
    }

    pub fn from_wire(msg: &WireMessage) -> Result<Self> {
        Self::decode(msg.command(), msg.payload())
    }

    pub fn command(&self) -> Command {
        match self {
            ObjectPayload::GetPubKey(_) => GetPubKey::COMMAND,
            ObjectPayload::PubKey(_) => PubKey::COMMAND,
            ObjectPayload::Message(_) => Message::COMMAND,
            ObjectPayload::Broadcast(_) => Broadcast::COMMAND,
        }
    }

    pub fn body(&self) -> Vec<u8> {
        match self {
            ObjectPayload::GetPubKey(o) => o.body(),
            ObjectPayload::PubKey(o) => o.body(),
            ObjectPayload::Message(o) => o.body(),
            ObjectPayload::Broadcast(o) => o.body(),
        }
    }

    pub fn pow_nonce(&self) -> Option<u64> {
        match self {
            ObjectPayload::GetPubKey(o) => o.pow_nonce(),
            ObjectPayload::PubKey(o) => o.pow_nonce(),
            ObjectPayload::Message(o) => o.pow_nonce(),
            ObjectPayload::Broadcast(o) => o.pow_nonce(),
        }
    }

    pub fn attach_nonce(&mut self, nonce: u64) -> Result<()> {
        match self {
            ObjectPayload::GetPubKey(o) => o.attach_nonce(nonce),
            ObjectPayload::PubKey(o) => o.attach_nonce(nonce),
            ObjectPayload::Message(o) => o.attach_nonce(nonce),
            ObjectPayload::Broadcast(o) => o.attach_nonce(nonce),
        }
    }

    /// `nonce || body`, if mined.
    pub fn sealed(&self) -> Option<Vec<u8>> {
        self.pow_nonce()
            .map(|nonce| pow::prefix_nonce(nonce, &self.body()))
    }

    pub fn inventory_hash(&self) -> Option<InventoryHash> {
        self.sealed().map(|data| InventoryHash::of(&data))
    }

    /// Whether the attached nonce meets `params`. Unmined objects fail.
    pub fn verify_pow(&self, params: PowParams) -> bool {
        self.sealed()
            .is_some_and(|data| pow::verify(&data, params))
    }
}

impl From<GetPubKey> for ObjectPayload {
    fn from(o: GetPubKey) -> Self {
        ObjectPayload::GetPubKey(o)
    }
}

impl From<PubKey> for ObjectPayload {
    fn from(o: PubKey) -> Self {
        ObjectPayload::PubKey(o)
    }
}

impl From<Message> for ObjectPayload {
    fn from(o: Message) -> Self {
        ObjectPayload::Message(o)
    }
}

impl From<Broadcast> for ObjectPayload {
    fn from(o: Broadcast) -> Self {
        ObjectPayload::Broadcast(o)
    }
}
