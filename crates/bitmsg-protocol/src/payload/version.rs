//! `version` payload.
//!
//! ```text
//! protocol u32 | services u64 | timestamp u64 | to_addr (short) | from_addr (short)
//!   | nonce u64 | user_agent var-str | streams var-int list
//! ```
//!
//! Decoding reads the leading protocol number and routes the address fields
//! to that version's layout. Encoding needs the protocol from the caller: a
//! freshly built payload has none until the handshake negotiates one.

use bytes::BufMut;

use crate::payload::address::{NetAddress, ProtocolVersion};
use crate::var::{put_int_list, put_var_str, Reader};
use crate::Result;

pub const DEFAULT_USER_AGENT: &str = "/bitmsg:0.2/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    protocol: Option<ProtocolVersion>,
    pub services: u64,
    /// Unix seconds.
    pub timestamp: u64,
    /// Address of the node the message is sent to.
    pub to_addr: NetAddress,
    /// Address the sender can be reached at.
    pub from_addr: NetAddress,
    /// Random per-node value used to detect connections to self.
    pub nonce: u64,
    pub user_agent: String,
    pub streams: Vec<u64>,
}

impl Version {
    pub fn new(from_addr: NetAddress, to_addr: NetAddress, nonce: u64) -> Self {
        Self {
            protocol: None,
            services: from_addr.services,
            timestamp: crate::payload::now_secs(),
            to_addr,
            from_addr,
            nonce,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            streams: vec![1],
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_streams(mut self, streams: Vec<u64>) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Protocol this payload was decoded with. `None` for local payloads.
    pub fn protocol(&self) -> Option<ProtocolVersion> {
        self.protocol
    }

    pub fn encode(&self, protocol: ProtocolVersion) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + self.user_agent.len());
        out.put_u32(protocol.number());
        out.put_u64(self.services);
        out.put_u64(self.timestamp);
        protocol.put_short(&mut out, &self.to_addr);
        protocol.put_short(&mut out, &self.from_addr);
        out.put_u64(self.nonce);
        put_var_str(&mut out, &self.user_agent);
        put_int_list(&mut out, &self.streams);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let protocol = ProtocolVersion::try_from(r.u32()?)?;
        let services = r.u64()?;
        let timestamp = r.u64()?;
        let to_addr = protocol.read_short(&mut r)?;
        let from_addr = protocol.read_short(&mut r)?;
        let nonce = r.u64()?;
        let user_agent = r.var_str()?;
        let streams = r.int_list()?;

        Ok(Self {
            protocol: Some(protocol),
            services,
            timestamp,
            to_addr,
            from_addr,
            nonce,
            user_agent,
            streams,
        })
    }
}
