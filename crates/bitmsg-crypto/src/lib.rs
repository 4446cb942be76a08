//! bitmsg crypto -- secp256k1 signing keys, hash primitives, cipher hook.
//!
//! Compatible with the historical Bitmessage network:
//! - public keys travel as 64 raw bytes (X || Y, no 0x04 prefix)
//! - signatures are DER-encoded ECDSA over a SHA-1 digest
//! - object hashes are truncated double SHA-512

use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use ripemd::Ripemd160;
use sha2::{Digest, Sha512};

pub mod keypair;

// Re-exports
pub use keypair::KeyPair;

/// Length of an encoded public key on the wire.
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// Length of an inventory hash.
pub const INVENTORY_HASH_LENGTH: usize = 32;

/// Length of a ripe hash (RIPEMD-160).
pub const RIPE_LENGTH: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),
    #[error("key has no private half")]
    MissingPrivateKey,
    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// SHA-512 of data.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

/// SHA-512(SHA-512(data)).
pub fn double_sha512(data: &[u8]) -> [u8; 64] {
    sha512(&sha512(data))
}

/// Inventory hash of an object payload: first 32 bytes of its double SHA-512.
pub fn inventory_hash(payload: &[u8]) -> [u8; INVENTORY_HASH_LENGTH] {
    let full = double_sha512(payload);
    let mut hash = [0u8; INVENTORY_HASH_LENGTH];
    hash.copy_from_slice(&full[..INVENTORY_HASH_LENGTH]);
    hash
}

/// SHA-1 digest, used only for the legacy signature scheme.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let d = digest(&SHA1_FOR_LEGACY_USE_ONLY, data);
    let mut out = [0u8; 20];
    out.copy_from_slice(d.as_ref());
    out
}

/// Ripe hash identifying an address: RIPEMD-160(SHA-512(sign_pub || encrypt_pub)).
///
/// Both keys are hashed in their prefixed 65-byte form, as the network does.
pub fn ripe_hash(sign_key: &KeyPair, encrypt_key: &KeyPair) -> [u8; RIPE_LENGTH] {
    let mut hasher = Sha512::new();
    hasher.update(sign_key.encode_public_prefixed());
    hasher.update(encrypt_key.encode_public_prefixed());
    let sha = hasher.finalize();

    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; RIPE_LENGTH];
    out.copy_from_slice(&ripe);
    out
}

/// Encryption capability injected into message construction.
///
/// The network's object encryption scheme is not implemented here; callers
/// supply an implementation. [`PassThrough`] leaves data untouched.
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext` so that only the holder of `recipient`'s private key can read it.
    fn encrypt(&self, recipient: &KeyPair, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt `ciphertext` addressed to `own`.
    fn decrypt(&self, own: &KeyPair, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Identity cipher.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Cipher for PassThrough {
    fn encrypt(&self, _recipient: &KeyPair, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _own: &KeyPair, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.to_vec())
    }
}
