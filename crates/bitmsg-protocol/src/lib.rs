//! bitmsg protocol -- wire envelope, payload codecs, proof-of-work.
//!
//! Every frame on the wire is a 24-byte header (magic, command, length,
//! SHA-512 checksum) followed by a binary payload. Integers are big-endian.

pub mod codec;
pub mod envelope;
pub mod params;
pub mod payload;
pub mod pow;
pub mod var;

pub use codec::{FramedStream, WireCodec};
pub use envelope::{Command, WireMessage};
pub use params::{NetworkParams, MAINNET};
pub use payload::*;
pub use pow::PowParams;

/// Network magic: 0xE9BEB4D9
pub const PROTOCOL_MAGIC: u32 = 0xE9BE_B4D9;

/// Header size: magic (4) + command (12) + length (4) + checksum (4).
pub const HEADER_SIZE: usize = 24;

/// Width of the null-padded command field.
pub const COMMAND_SIZE: usize = 12;

/// Maximum accepted payload (sourced from the network parameters).
pub const MAX_PAYLOAD_SIZE: usize = MAINNET.max_payload_bytes;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("invalid magic: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },
    #[error("checksum mismatch: header {expected:#010x}, payload {got:#010x}")]
    ChecksumMismatch { expected: u32, got: u32 },
    #[error("length mismatch: header declares {declared}, payload has {actual}")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("unsupported protocol version {0}")]
    ProtocolMismatch(u32),
    #[error("unexpected command: expected {expected}, got {got}")]
    UnexpectedCommand { expected: Command, got: Command },
    #[error("stream ended before the declared length was read")]
    TruncatedStream,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("proof of work does not meet target")]
    PowUnsatisfied,
    #[error("operation timed out")]
    Timeout,
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("connected to self (matching version nonce)")]
    SelfConnection,
    #[error("proof-of-work nonce already set")]
    NonceAlreadySet,
    #[error("crypto error: {0}")]
    Crypto(#[from] bitmsg_crypto::CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
