//! Network address records and the per-version address layouts.
//!
//! ```text
//! long record, v1 (34 bytes): time u32 | stream u32 | services u64 | ip 16 | port u16
//! long record, v2 (38 bytes): time u64 | stream u32 | services u64 | ip 16 | port u16
//! short record   (26 bytes):                         services u64 | ip 16 | port u16
//! ```
//!
//! IPv4 addresses travel in IPv4-mapped IPv6 form (`::ffff:a.b.c.d`).

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::BufMut;

use crate::var::{put_var_int, Reader};
use crate::{ProtocolError, Result};

/// Prefix of an IPv4-mapped IPv6 address.
pub const IPV4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF];

/// Size of a short address record.
pub const SHORT_ADDRESS_LENGTH: usize = 26;

fn put_ip(out: &mut Vec<u8>, ip: Ipv4Addr) {
    out.put_slice(&IPV4_MAPPED_PREFIX);
    out.put_slice(&ip.octets());
}

fn read_ip(r: &mut Reader<'_>) -> Result<Ipv4Addr> {
    let raw: [u8; 16] = r.array()?;
    if raw[..12] != IPV4_MAPPED_PREFIX {
        return Err(ProtocolError::MalformedInput(format!(
            "address {} is not ipv4-mapped",
            hex::encode(raw)
        )));
    }
    Ok(Ipv4Addr::new(raw[12], raw[13], raw[14], raw[15]))
}

/// Short address record, as carried in `version` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddress {
    pub services: u64,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NetAddress {
    pub fn new(services: u64, addr: SocketAddrV4) -> Self {
        Self {
            services,
            ip: *addr.ip(),
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_u64(self.services);
        put_ip(out, self.ip);
        out.put_u16(self.port);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SHORT_ADDRESS_LENGTH);
        self.encode_into(&mut out);
        out
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            services: r.u64()?,
            ip: read_ip(r)?,
            port: r.u16()?,
        })
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(data);
        let addr = Self::read(&mut r)?;
        Ok((addr, r.position()))
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Long address record, as carried in `addr` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRecord {
    /// Unix seconds the address was last seen.
    pub time: u64,
    pub stream: u32,
    pub services: u64,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl AddressRecord {
    pub fn from_net(net: NetAddress, time: u64, stream: u32) -> Self {
        Self {
            time,
            stream,
            services: net.services,
            ip: net.ip,
            port: net.port,
        }
    }

    pub fn net_address(&self) -> NetAddress {
        NetAddress {
            services: self.services,
            ip: self.ip,
            port: self.port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.net_address().socket_addr()
    }

    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut out = Vec::with_capacity(version.record_length());
        version.put_record(&mut out, self);
        out
    }

    pub fn decode(version: ProtocolVersion, data: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(data);
        let record = version.read_record(&mut r)?;
        Ok((record, r.position()))
    }
}

/// Field layout of one protocol version's address records.
pub trait AddressLayout {
    /// Width of the time field in a long record.
    const TIME_LENGTH: usize;
    /// Total long record size.
    const RECORD_LENGTH: usize = Self::TIME_LENGTH + 4 + SHORT_ADDRESS_LENGTH;
    const SHORT_LENGTH: usize = SHORT_ADDRESS_LENGTH;

    fn put_time(out: &mut Vec<u8>, time: u64);
    fn read_time(r: &mut Reader<'_>) -> Result<u64>;

    fn put_record(out: &mut Vec<u8>, record: &AddressRecord) {
        Self::put_time(out, record.time);
        out.put_u32(record.stream);
        record.net_address().encode_into(out);
    }

    fn read_record(r: &mut Reader<'_>) -> Result<AddressRecord> {
        let time = Self::read_time(r)?;
        let stream = r.u32()?;
        let net = NetAddress::read(r)?;
        Ok(AddressRecord::from_net(net, time, stream))
    }

    fn put_short(out: &mut Vec<u8>, addr: &NetAddress) {
        addr.encode_into(out);
    }

    fn read_short(r: &mut Reader<'_>) -> Result<NetAddress> {
        NetAddress::read(r)
    }
}

/// Protocol 1: 32-bit timestamps.
#[derive(Debug, Clone, Copy)]
pub struct V1Layout;

impl AddressLayout for V1Layout {
    const TIME_LENGTH: usize = 4;

    /// Times past 2106 do not fit and are truncated to the low 32 bits.
    fn put_time(out: &mut Vec<u8>, time: u64) {
        out.put_u32(time as u32);
    }

    fn read_time(r: &mut Reader<'_>) -> Result<u64> {
        Ok(r.u32()? as u64)
    }
}

/// Protocol 2: 64-bit timestamps.
#[derive(Debug, Clone, Copy)]
pub struct V2Layout;

impl AddressLayout for V2Layout {
    const TIME_LENGTH: usize = 8;

    fn put_time(out: &mut Vec<u8>, time: u64) {
        out.put_u64(time);
    }

    fn read_time(r: &mut Reader<'_>) -> Result<u64> {
        r.u64()
    }
}

/// Protocol version declared in the `version` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    pub fn number(self) -> u32 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }

    pub fn record_length(self) -> usize {
        match self {
            ProtocolVersion::V1 => V1Layout::RECORD_LENGTH,
            ProtocolVersion::V2 => V2Layout::RECORD_LENGTH,
        }
    }

    pub fn put_record(self, out: &mut Vec<u8>, record: &AddressRecord) {
        match self {
            ProtocolVersion::V1 => V1Layout::put_record(out, record),
            ProtocolVersion::V2 => V2Layout::put_record(out, record),
        }
    }

    pub fn read_record(self, r: &mut Reader<'_>) -> Result<AddressRecord> {
        match self {
            ProtocolVersion::V1 => V1Layout::read_record(r),
            ProtocolVersion::V2 => V2Layout::read_record(r),
        }
    }

    pub fn put_short(self, out: &mut Vec<u8>, addr: &NetAddress) {
        match self {
            ProtocolVersion::V1 => V1Layout::put_short(out, addr),
            ProtocolVersion::V2 => V2Layout::put_short(out, addr),
        }
    }

    pub fn read_short(self, r: &mut Reader<'_>) -> Result<NetAddress> {
        match self {
            ProtocolVersion::V1 => V1Layout::read_short(r),
            ProtocolVersion::V2 => V2Layout::read_short(r),
        }
    }
}

impl TryFrom<u32> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            other => Err(ProtocolError::ProtocolMismatch(other)),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// `addr` payload: var-int count + long records.
pub fn encode_addr_list(version: ProtocolVersion, records: &[AddressRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + records.len() * version.record_length());
    put_var_int(&mut out, records.len() as u64);
    for record in records {
        version.put_record(&mut out, record);
    }
    out
}

pub fn decode_addr_list(version: ProtocolVersion, data: &[u8]) -> Result<Vec<AddressRecord>> {
    let mut r = Reader::new(data);
    let count = r.var_int()?;
    let count = r.ensure_records(count, version.record_length())?;
    (0..count).map(|_| version.read_record(&mut r)).collect()
}
