//! Network parameters -- the constants every peer on a network must agree on.
//!
//! Connection pool sizes and bootstrap lists are node-local decisions and are
//! not part of this set.

use crate::payload::ProtocolVersion;
use crate::pow::PowParams;

/// A named set of timing, size and proof-of-work parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    /// Protocol version a node speaks unless configured otherwise.
    pub default_protocol: ProtocolVersion,

    // -- Proof of work --
    /// Default proof-of-work difficulty for published objects.
    pub pow: PowParams,

    // -- Objects --
    /// Maximum random offset (either direction) applied to object timestamps.
    pub object_time_fuzz_secs: u64,
    /// Broadcast object format version.
    pub broadcast_version: u64,
    /// Address version stamped into locally built objects.
    pub address_version: u64,

    // -- Transport --
    /// Outbound dial timeout in seconds.
    pub dial_timeout_secs: u64,
    /// Per-read timeout during handshake and get-data in seconds.
    pub read_timeout_secs: u64,
    /// Maximum payload accepted in a single envelope.
    pub max_payload_bytes: usize,
    /// Peers each new object is relayed to.
    pub relay_fanout: usize,
}

/// Main network parameters.
pub const MAINNET: NetworkParams = NetworkParams {
    default_protocol: ProtocolVersion::V2,

    pow: PowParams {
        trials_per_byte: 320,
        extra_bytes: 14_000,
    },

    object_time_fuzz_secs: 300,
    broadcast_version: 2,
    address_version: 3,

    dial_timeout_secs: 7,
    read_timeout_secs: 7,
    max_payload_bytes: 1_600_000,
    relay_fanout: 10,
};
