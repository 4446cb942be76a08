//! secp256k1 key pair -- generation, 64-byte public encoding, SHA-1/ECDSA signatures.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use crate::{CryptoError, PUBLIC_KEY_LENGTH};

/// Uncompressed SEC1 point prefix, stripped on the wire.
const UNCOMPRESSED_PREFIX: u8 = 0x04;

/// Elliptic-curve key pair. The private half is optional: keys decoded from
/// the wire are public-only and can verify but not sign.
#[derive(Clone)]
pub struct KeyPair {
    secret: Option<SecretKey>,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        Self::from_secret(secret)
    }

    /// Build a key pair from a 32-byte private scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key_global(&secret);
        Self {
            secret: Some(secret),
            public,
        }
    }

    /// Decode a 64-byte (X || Y) public key. The result is public-only.
    pub fn decode_public(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() != PUBLIC_KEY_LENGTH {
            return Err(CryptoError::InvalidPublicKey(format!(
                "expected {PUBLIC_KEY_LENGTH} bytes, got {}",
                data.len()
            )));
        }

        let mut sec1 = [0u8; PUBLIC_KEY_LENGTH + 1];
        sec1[0] = UNCOMPRESSED_PREFIX;
        sec1[1..].copy_from_slice(data);

        let public = PublicKey::from_slice(&sec1)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self {
            secret: None,
            public,
        })
    }

    /// Encode the public point as 64 raw bytes, without the SEC1 prefix.
    pub fn encode_public(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let full = self.public.serialize_uncompressed();
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(&full[1..]);
        out
    }

    /// Encode the public point in 65-byte SEC1 uncompressed form.
    pub fn encode_public_prefixed(&self) -> [u8; PUBLIC_KEY_LENGTH + 1] {
        self.public.serialize_uncompressed()
    }

    /// The 32-byte private scalar, if present.
    pub fn secret_bytes(&self) -> Option<[u8; 32]> {
        self.secret.as_ref().map(SecretKey::secret_bytes)
    }

    /// Whether this key can sign.
    pub fn has_private(&self) -> bool {
        self.secret.is_some()
    }

    /// Copy of this key without its private half.
    pub fn public_only(&self) -> Self {
        Self {
            secret: None,
            public: self.public,
        }
    }

    /// Sign data: SHA-1 digest, ECDSA over secp256k1, DER-encoded (r, s).
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret = self.secret.as_ref().ok_or(CryptoError::MissingPrivateKey)?;
        let msg = digest_message(data);
        let sig = SECP256K1.sign_ecdsa(&msg, secret);
        Ok(sig.serialize_der().to_vec())
    }

    /// Verify a DER signature over data. Unparseable signatures verify false.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        self.verify_strict(data, signature).unwrap_or(false)
    }

    /// Verify, distinguishing a malformed signature from a wrong one.
    pub fn verify_strict(&self, data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        let mut sig = Signature::from_der(signature)
            .map_err(|e| CryptoError::InvalidSignatureEncoding(e.to_string()))?;
        // libsecp256k1 only accepts low-S; older peers emit either form.
        sig.normalize_s();

        let msg = digest_message(data);
        Ok(SECP256K1.verify_ecdsa(&msg, &sig, &self.public).is_ok())
    }
}

/// SHA-1 digest left-padded to the 32-byte scalar width.
fn digest_message(data: &[u8]) -> Message {
    let sha = crate::sha1(data);
    let mut padded = [0u8; 32];
    padded[32 - sha.len()..].copy_from_slice(&sha);
    Message::from_digest(padded)
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for KeyPair {}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.encode_public()))
            .field("has_private", &self.has_private())
            .finish()
    }
}
