//! Proof of work for network objects.
//!
//! ```text
//! kernel = SHA-512(payload)
//! trial  = first 8 bytes (big-endian) of SHA-512(SHA-512(nonce_be || kernel))
//! target = u64::MAX / ((len(payload) + extra_bytes + 8) * trials_per_byte)
//! ```
//!
//! A nonce is valid when `trial <= target`. Mining is CPU-bound and blocking;
//! async callers should run it on a blocking thread.

use std::time::Instant;

use bitmsg_crypto::{double_sha512, sha512};

use crate::{ProtocolError, Result};

/// Width of the nonce prefix on an object payload.
pub const NONCE_LENGTH: usize = 8;

/// Difficulty parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PowParams {
    pub trials_per_byte: u64,
    pub extra_bytes: u64,
}

impl PowParams {
    pub const fn new(trials_per_byte: u64, extra_bytes: u64) -> Self {
        Self {
            trials_per_byte,
            extra_bytes,
        }
    }
}

impl Default for PowParams {
    fn default() -> Self {
        crate::MAINNET.pow
    }
}

/// Highest trial value accepted for a payload of `payload_len` bytes.
pub fn target(payload_len: usize, params: PowParams) -> u64 {
    let len = (payload_len as u64)
        .saturating_add(params.extra_bytes)
        .saturating_add(NONCE_LENGTH as u64);
    let divisor = len.saturating_mul(params.trials_per_byte).max(1);
    u64::MAX / divisor
}

fn trial_value(nonce: u64, kernel: &[u8; 64]) -> u64 {
    let mut input = [0u8; NONCE_LENGTH + 64];
    input[..NONCE_LENGTH].copy_from_slice(&nonce.to_be_bytes());
    input[NONCE_LENGTH..].copy_from_slice(kernel);
    let hash = double_sha512(&input);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(head)
}

/// Find the lowest nonce (counting up from 0) satisfying the target for `payload`.
///
/// Blocks until found. Exhausting the full 64-bit space is treated as
/// unreachable at any sane difficulty.
pub fn mine(payload: &[u8], params: PowParams) -> u64 {
    let kernel = sha512(payload);
    let target = target(payload.len(), params);
    let started = Instant::now();

    for nonce in 0..=u64::MAX {
        if trial_value(nonce, &kernel) <= target {
            tracing::debug!(
                nonce,
                len = payload.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pow: nonce found"
            );
            return nonce;
        }
    }
    panic!("pow: nonce space exhausted for target {target:#x}")
}

/// Check an object payload whose first 8 bytes are the nonce. The target is
/// computed from the length of the bytes after the nonce.
pub fn verify(object: &[u8], params: PowParams) -> bool {
    if object.len() < NONCE_LENGTH {
        return false;
    }
    let (nonce, body) = object.split_at(NONCE_LENGTH);
    let mut raw = [0u8; NONCE_LENGTH];
    raw.copy_from_slice(nonce);
    trial_value(u64::from_be_bytes(raw), &sha512(body)) <= target(body.len(), params)
}

/// [`verify`] as a `Result`.
pub fn check(object: &[u8], params: PowParams) -> Result<()> {
    if verify(object, params) {
        Ok(())
    } else {
        Err(ProtocolError::PowUnsatisfied)
    }
}

/// `nonce_be || body`.
pub fn prefix_nonce(nonce: u64, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(NONCE_LENGTH + body.len());
    out.extend_from_slice(&nonce.to_be_bytes());
    out.extend_from_slice(body);
    out
}
