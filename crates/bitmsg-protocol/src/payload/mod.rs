//! Payload codecs.
//!
//! Handshake payloads (`version`, `addr`, `inv`, `getdata`) are plain binary
//! structures whose address layout depends on the negotiated protocol
//! version. Object payloads (`getpubkey`, `pubkey`, `msg`, `broadcast`)
//! carry an 8-byte proof-of-work nonce prefix.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::MAINNET;

pub mod address;
pub mod info;
pub mod inventory;
pub mod objects;
pub mod version;

pub use address::{
    decode_addr_list, encode_addr_list, AddressLayout, AddressRecord, NetAddress,
    ProtocolVersion, V1Layout, V2Layout,
};
pub use info::{BroadcastInfo, MessageEncoding, MsgInfo};
pub use inventory::{
    decode_getdata, decode_inventory, encode_getdata, encode_inventory, InventoryHash,
};
pub use objects::{Broadcast, GetPubKey, Message, ObjectPayload, PowObject, PubKey};
pub use version::Version;

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Timestamp for a locally built object: now, fuzzed by the network's spread.
pub fn object_time() -> u64 {
    fuzzy_time(now_secs(), MAINNET.object_time_fuzz_secs)
}

/// `now` shifted by a random offset in `[-spread/2, spread/2]`, so an object's
/// timestamp does not reveal exactly when it was built.
pub fn fuzzy_time(now: u64, spread: u64) -> u64 {
    let half = spread / 2;
    if half == 0 {
        return now;
    }
    let offset = rand::thread_rng().gen_range(0..=2 * half);
    now.saturating_sub(half).saturating_add(offset)
}
