//! Signed plaintexts carried (encrypted) inside `msg` and `broadcast` objects.
//!
//! Each ends in a var-int length + DER signature computed with `sign_key`
//! over every byte that precedes it. Encoding signs; decoding verifies.

use bytes::BufMut;

use bitmsg_crypto::{KeyPair, PUBLIC_KEY_LENGTH, RIPE_LENGTH};

use crate::var::{put_var_bytes, put_var_int, Reader};
use crate::{ProtocolError, Result};

/// How message content is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageEncoding {
    /// Content may be discarded.
    Ignore,
    /// Content is the body only.
    Trivial,
    /// `Subject:<subject>\nBody:<body>`.
    Simple,
    Other(u64),
}

impl From<u64> for MessageEncoding {
    fn from(value: u64) -> Self {
        match value {
            0 => MessageEncoding::Ignore,
            1 => MessageEncoding::Trivial,
            2 => MessageEncoding::Simple,
            other => MessageEncoding::Other(other),
        }
    }
}

impl From<MessageEncoding> for u64 {
    fn from(value: MessageEncoding) -> Self {
        match value {
            MessageEncoding::Ignore => 0,
            MessageEncoding::Trivial => 1,
            MessageEncoding::Simple => 2,
            MessageEncoding::Other(v) => v,
        }
    }
}

fn read_key(r: &mut Reader<'_>) -> Result<KeyPair> {
    Ok(KeyPair::decode_public(r.bytes(PUBLIC_KEY_LENGTH)?)?)
}

/// Append the signature over everything in `out` so far.
fn sign_into(out: &mut Vec<u8>, key: &KeyPair) -> Result<()> {
    let signature = key.sign(out.as_slice())?;
    put_var_bytes(out, &signature);
    Ok(())
}

/// Read the trailing signature and check it against the bytes before it.
fn verify_trailer(r: &mut Reader<'_>, key: &KeyPair) -> Result<()> {
    let signed = r.consumed();
    let signature = r.var_bytes()?;
    if key.verify(signed, signature) {
        Ok(())
    } else {
        Err(ProtocolError::SignatureInvalid)
    }
}

/// Decrypted body of a `msg` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgInfo {
    pub msg_version: u64,
    pub addr_version: u64,
    pub stream: u64,
    pub behavior: u32,
    /// Sender's signing key. Needs its private half to encode.
    pub sign_key: KeyPair,
    pub encrypt_key: KeyPair,
    pub dest_ripe: [u8; RIPE_LENGTH],
    pub encoding: MessageEncoding,
    pub content: Vec<u8>,
    pub ack_data: Vec<u8>,
}

impl MsgInfo {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(220 + self.content.len() + self.ack_data.len());
        put_var_int(&mut out, self.msg_version);
        put_var_int(&mut out, self.addr_version);
        put_var_int(&mut out, self.stream);
        out.put_u32(self.behavior);
        out.put_slice(&self.sign_key.encode_public());
        out.put_slice(&self.encrypt_key.encode_public());
        out.put_slice(&self.dest_ripe);
        put_var_int(&mut out, self.encoding.into());
        put_var_bytes(&mut out, &self.content);
        put_var_bytes(&mut out, &self.ack_data);
        sign_into(&mut out, &self.sign_key)?;
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let info = Self {
            msg_version: r.var_int()?,
            addr_version: r.var_int()?,
            stream: r.var_int()?,
            behavior: r.u32()?,
            sign_key: read_key(&mut r)?,
            encrypt_key: read_key(&mut r)?,
            dest_ripe: r.array()?,
            encoding: r.var_int()?.into(),
            content: r.var_bytes()?.to_vec(),
            ack_data: r.var_bytes()?.to_vec(),
        };
        verify_trailer(&mut r, &info.sign_key)?;
        Ok(info)
    }
}

/// Decrypted body of a `broadcast` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastInfo {
    pub broadcast_version: u64,
    pub addr_version: u64,
    pub stream: u64,
    pub behavior: u32,
    pub sign_key: KeyPair,
    pub encrypt_key: KeyPair,
    /// Difficulty the sender demands of replies.
    pub trials_per_byte: u64,
    pub extra_bytes: u64,
    pub encoding: MessageEncoding,
    pub message: Vec<u8>,
}

impl BroadcastInfo {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(220 + self.message.len());
        put_var_int(&mut out, self.broadcast_version);
        put_var_int(&mut out, self.addr_version);
        put_var_int(&mut out, self.stream);
        out.put_u32(self.behavior);
        out.put_slice(&self.sign_key.encode_public());
        out.put_slice(&self.encrypt_key.encode_public());
        put_var_int(&mut out, self.trials_per_byte);
        put_var_int(&mut out, self.extra_bytes);
        put_var_int(&mut out, self.encoding.into());
        put_var_bytes(&mut out, &self.message);
        sign_into(&mut out, &self.sign_key)?;
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let info = Self {
            broadcast_version: r.var_int()?,
            addr_version: r.var_int()?,
            stream: r.var_int()?,
            behavior: r.u32()?,
            sign_key: read_key(&mut r)?,
            encrypt_key: read_key(&mut r)?,
            trials_per_byte: r.var_int()?,
            extra_bytes: r.var_int()?,
            encoding: r.var_int()?.into(),
            message: r.var_bytes()?.to_vec(),
        };
        verify_trailer(&mut r, &info.sign_key)?;
        Ok(info)
    }
}
