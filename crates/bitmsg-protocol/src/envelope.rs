//! Message envelope: the 24-byte header wrapping every payload.
//!
//! ```text
//! magic (u32) | command (12 bytes, NUL padded) | length (u32) | checksum (u32) | payload
//! ```
//!
//! The checksum is the first four bytes of SHA-512(payload), read big-endian.

use std::fmt;

use bytes::BufMut;

use crate::var::Reader;
use crate::{ProtocolError, Result, COMMAND_SIZE, HEADER_SIZE, PROTOCOL_MAGIC};

/// Envelope command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    Addr,
    Inv,
    GetData,
    GetPubKey,
    PubKey,
    Msg,
    Broadcast,
    /// Any other ASCII command; carried through so callers can ignore it.
    Unknown(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Addr => "addr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::GetPubKey => "getpubkey",
            Command::PubKey => "pubkey",
            Command::Msg => "msg",
            Command::Broadcast => "broadcast",
            Command::Unknown(name) => name,
        }
    }

    /// Commands whose payload is a proof-of-work object.
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            Command::GetPubKey | Command::PubKey | Command::Msg | Command::Broadcast
        )
    }

    /// Parse the 12-byte command field. Anything after the first NUL is padding.
    pub fn from_wire(field: &[u8]) -> Result<Self> {
        let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
        let name = &field[..end];
        if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) {
            return Err(ProtocolError::MalformedInput(format!(
                "bad command field {}",
                hex::encode(field)
            )));
        }
        // Checked ascii above.
        let name = String::from_utf8_lossy(name);
        Ok(match name.as_ref() {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "addr" => Command::Addr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "getpubkey" => Command::GetPubKey,
            "pubkey" => Command::PubKey,
            "msg" => Command::Msg,
            "broadcast" => Command::Broadcast,
            other => Command::Unknown(other.to_string()),
        })
    }

    /// Render the NUL-padded command field.
    pub fn to_wire(&self) -> Result<[u8; COMMAND_SIZE]> {
        let name = self.as_str().as_bytes();
        if name.is_empty() || name.len() > COMMAND_SIZE {
            return Err(ProtocolError::MalformedInput(format!(
                "command {:?} must be 1..={COMMAND_SIZE} bytes",
                self.as_str()
            )));
        }
        let mut field = [0u8; COMMAND_SIZE];
        field[..name.len()].copy_from_slice(name);
        Ok(field)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checksum of a payload: first four bytes of its SHA-512, big-endian.
pub fn checksum(payload: &[u8]) -> u32 {
    let hash = bitmsg_crypto::sha512(payload);
    u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

/// Parsed envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub command: Command,
    pub length: u32,
    pub checksum: u32,
}

impl Header {
    /// Parse the first [`HEADER_SIZE`] bytes of `data`. Rejects a foreign magic
    /// before looking at anything else.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::TruncatedStream);
        }
        let mut r = Reader::new(&data[..HEADER_SIZE]);
        let magic = r.u32()?;
        if magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic {
                expected: PROTOCOL_MAGIC,
                got: magic,
            });
        }
        let command = Command::from_wire(r.bytes(COMMAND_SIZE)?)?;
        let length = r.u32()?;
        let checksum = r.u32()?;
        Ok(Self {
            magic,
            command,
            length,
            checksum,
        })
    }
}

/// One framed protocol message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    magic: u32,
    command: Command,
    length: u32,
    checksum: u32,
    payload: Vec<u8>,
}

impl WireMessage {
    /// Wrap a payload, computing length and checksum.
    pub fn new(command: Command, payload: Vec<u8>) -> Result<Self> {
        command.to_wire()?;
        let length = u32::try_from(payload.len()).map_err(|_| ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;
        Ok(Self {
            magic: PROTOCOL_MAGIC,
            checksum: checksum(&payload),
            command,
            length,
            payload,
        })
    }

    /// Assemble a message from raw header fields without checking them.
    pub fn from_parts(
        magic: u32,
        command: Command,
        length: u32,
        checksum: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            magic,
            command,
            length,
            checksum,
            payload,
        }
    }

    /// Build from a parsed header and the payload bytes that followed it.
    pub(crate) fn from_header(header: Header, payload: Vec<u8>) -> Result<Self> {
        let msg = Self::from_parts(
            header.magic,
            header.command,
            header.length,
            header.checksum,
            payload,
        );
        msg.check()?;
        Ok(msg)
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize header and payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    pub(crate) fn encode_into<B: BufMut>(&self, out: &mut B) -> Result<()> {
        let command = self.command.to_wire()?;
        out.put_u32(self.magic);
        out.put_slice(&command);
        out.put_u32(self.length);
        out.put_u32(self.checksum);
        out.put_slice(&self.payload);
        Ok(())
    }

    /// Read exactly one envelope from the front of `data`, returning it and
    /// the number of bytes consumed. Trailing bytes are left alone.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let header = Header::parse(data)?;
        let total = HEADER_SIZE + header.length as usize;
        if data.len() < total {
            return Err(ProtocolError::TruncatedStream);
        }
        let payload = data[HEADER_SIZE..total].to_vec();
        Ok((Self::from_header(header, payload)?, total))
    }

    /// Magic, length and checksum all consistent with the payload.
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`validate`](Self::validate), naming the first field that is off.
    pub fn check(&self) -> Result<()> {
        if self.magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic {
                expected: PROTOCOL_MAGIC,
                got: self.magic,
            });
        }
        if self.length as usize != self.payload.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: self.length,
                actual: self.payload.len(),
            });
        }
        let actual = checksum(&self.payload);
        if self.checksum != actual {
            return Err(ProtocolError::ChecksumMismatch {
                expected: self.checksum,
                got: actual,
            });
        }
        Ok(())
    }

    /// Payload of this message if it carries `expected`.
    pub fn expect(&self, expected: Command) -> Result<&[u8]> {
        if self.command != expected {
            return Err(ProtocolError::UnexpectedCommand {
                expected,
                got: self.command.clone(),
            });
        }
        Ok(&self.payload)
    }
}
