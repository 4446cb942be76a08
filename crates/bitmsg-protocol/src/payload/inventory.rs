//! `inv` and `getdata` payloads: var-int count + 32-byte inventory hashes.
//!
//! Both payloads share one encoding and are identical across protocol versions.

use std::fmt;

use bitmsg_crypto::INVENTORY_HASH_LENGTH;

use crate::var::{put_var_int, Reader};
use crate::{ProtocolError, Result};

/// Content hash of an object payload (nonce included).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InventoryHash(pub [u8; INVENTORY_HASH_LENGTH]);

impl InventoryHash {
    /// Hash of a complete object payload.
    pub fn of(object: &[u8]) -> Self {
        Self(bitmsg_crypto::inventory_hash(object))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let raw: [u8; INVENTORY_HASH_LENGTH] = data.try_into().map_err(|_| {
            ProtocolError::MalformedInput(format!(
                "inventory hash must be {INVENTORY_HASH_LENGTH} bytes, got {}",
                data.len()
            ))
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; INVENTORY_HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InventoryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InventoryHash({})", self.to_hex())
    }
}

impl fmt::Display for InventoryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn encode_hash_list(hashes: &[InventoryHash]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + hashes.len() * INVENTORY_HASH_LENGTH);
    put_var_int(&mut out, hashes.len() as u64);
    for hash in hashes {
        out.extend_from_slice(&hash.0);
    }
    out
}

fn decode_hash_list(data: &[u8]) -> Result<Vec<InventoryHash>> {
    let mut r = Reader::new(data);
    let count = r.var_int()?;
    let count = r.ensure_records(count, INVENTORY_HASH_LENGTH)?;
    (0..count)
        .map(|_| r.array().map(InventoryHash))
        .collect()
}

pub fn encode_inventory(hashes: &[InventoryHash]) -> Vec<u8> {
    encode_hash_list(hashes)
}

pub fn decode_inventory(data: &[u8]) -> Result<Vec<InventoryHash>> {
    decode_hash_list(data)
}

pub fn encode_getdata(hashes: &[InventoryHash]) -> Vec<u8> {
    encode_hash_list(hashes)
}

pub fn decode_getdata(data: &[u8]) -> Result<Vec<InventoryHash>> {
    decode_hash_list(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_hashes(n: usize) -> Vec<InventoryHash> {
        let mut rng = rand::thread_rng();
        (0..n)
            .map(|_| {
                let mut raw = [0u8; 32];
                rng.fill_bytes(&mut raw);
                InventoryHash(raw)
            })
            .collect()
    }

    #[test]
    fn test_thousand_hashes_roundtrip() {
        let hashes = random_hashes(1000);
        let data = encode_inventory(&hashes);
        // 1000 needs the 0xFD tag: 3 bytes of count
        assert_eq!(data.len(), 3 + 1000 * 32);
        assert_eq!(&data[..3], &[0xFD, 0x03, 0xE8]);
        assert_eq!(decode_inventory(&data).unwrap(), hashes);
    }

    #[test]
    fn test_getdata_shares_encoding() {
        let hashes = random_hashes(3);
        assert_eq!(encode_getdata(&hashes), encode_inventory(&hashes));
        assert_eq!(decode_getdata(&encode_getdata(&hashes)).unwrap(), hashes);
    }

    #[test]
    fn test_empty_inventory() {
        assert_eq!(encode_inventory(&[]), vec![0]);
        assert!(decode_inventory(&[0]).unwrap().is_empty());
    }

    #[test]
    fn test_short_inventory_rejected() {
        let mut data = encode_inventory(&random_hashes(2));
        data.truncate(data.len() - 1);
        assert!(matches!(
            decode_inventory(&data),
            Err(ProtocolError::MalformedInput(_))
        ));
        assert!(decode_inventory(&[]).is_err());
    }

    #[test]
    fn test_hash_of_object() {
        let hash = InventoryHash::of(b"object bytes");
        assert_eq!(hash.0, bitmsg_crypto::inventory_hash(b"object bytes"));
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(InventoryHash::from_slice(&hash.0).unwrap(), hash);
        assert!(InventoryHash::from_slice(&[0u8; 31]).is_err());
    }
}
