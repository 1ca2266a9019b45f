//! Identity types for the replication stack
//!
//! Peers are named by their IPv4 endpoint, which is also how they are
//! written on the wire. Broadcasts and add operations carry 128-bit random
//! identifiers encoded as two big-endian 64-bit halves.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::str::FromStr;

use rand::Rng;

use crate::ConcordError;

/// Peer identity - network address and port, immutable
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(SocketAddrV4);

impl PeerId {
    /// Encoded size: 4 address bytes + 2 port bytes
    pub const ENCODED_LEN: usize = 6;

    #[inline]
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        PeerId(SocketAddrV4::new(ip, port))
    }

    /// Loopback peer, mostly useful in tests and simulations
    #[inline]
    pub fn localhost(port: u16) -> Self {
        PeerId::new(Ipv4Addr::LOCALHOST, port)
    }

    #[inline]
    pub fn ip(self) -> Ipv4Addr {
        *self.0.ip()
    }

    #[inline]
    pub fn port(self) -> u16 {
        self.0.port()
    }

    #[inline]
    pub fn socket_addr(self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let ip = self.0.ip().octets();
        let port = self.0.port().to_be_bytes();
        [ip[0], ip[1], ip[2], ip[3], port[0], port[1]]
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; Self::ENCODED_LEN]) -> Self {
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        PeerId::new(ip, u16::from_be_bytes([bytes[4], bytes[5]]))
    }
}

impl From<SocketAddrV4> for PeerId {
    fn from(addr: SocketAddrV4) -> Self {
        PeerId(addr)
    }
}

impl TryFrom<SocketAddr> for PeerId {
    type Error = ConcordError;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        match addr {
            SocketAddr::V4(v4) => Ok(PeerId(v4)),
            SocketAddr::V6(v6) => Err(ConcordError::UnsupportedAddress(v6.to_string())),
        }
    }
}

impl FromStr for PeerId {
    type Err = ConcordError;

    /// Accepts `a.b.c.d:port` directly and resolves `host:port` otherwise,
    /// keeping the first IPv4 result.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddrV4>() {
            return Ok(PeerId(addr));
        }

        let resolved = s
            .to_socket_addrs()
            .map_err(|e| ConcordError::UnsupportedAddress(format!("{}: {}", s, e)))?;

        resolved
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(PeerId(v4)),
                SocketAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| ConcordError::UnsupportedAddress(s.to_string()))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn fmt_uuid(value: u128, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let hex = format!("{:032x}", value);
    write!(
        f,
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Broadcast identity - fresh per broadcast invocation, never regenerated on relay
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageId(pub u128);

impl MessageId {
    /// Draw a fresh identifier from the thread RNG
    pub fn random() -> Self {
        MessageId(rand::random())
    }

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        MessageId(rng.gen())
    }

    #[inline]
    pub fn from_parts(hi: u64, lo: u64) -> Self {
        MessageId(((hi as u128) << 64) | lo as u128)
    }

    #[inline]
    pub fn hi(self) -> u64 {
        (self.0 >> 64) as u64
    }

    #[inline]
    pub fn lo(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({:032x})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_uuid(self.0, f)
    }
}

/// Add tag - one per successful add of a set element
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AddTag(pub u128);

impl AddTag {
    pub fn random() -> Self {
        AddTag(rand::random())
    }

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        AddTag(rng.gen())
    }

    #[inline]
    pub fn from_parts(hi: u64, lo: u64) -> Self {
        AddTag(((hi as u128) << 64) | lo as u128)
    }

    #[inline]
    pub fn hi(self) -> u64 {
        (self.0 >> 64) as u64
    }

    #[inline]
    pub fn lo(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Debug for AddTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:032x})", self.0)
    }
}

impl fmt::Display for AddTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_uuid(self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_bytes_are_address_then_port() {
        let peer = PeerId::new(Ipv4Addr::new(10, 0, 0, 7), 0x1F90);
        assert_eq!(peer.to_bytes(), [10, 0, 0, 7, 0x1F, 0x90]);
        assert_eq!(PeerId::from_bytes(peer.to_bytes()), peer);
    }

    #[test]
    fn test_peer_id_parse() {
        let peer: PeerId = "127.0.0.1:6000".parse().unwrap();
        assert_eq!(peer, PeerId::localhost(6000));
        assert_eq!(peer.to_string(), "127.0.0.1:6000");
    }

    #[test]
    fn test_peer_id_rejects_ipv6() {
        let addr: SocketAddr = "[::1]:6000".parse().unwrap();
        assert!(PeerId::try_from(addr).is_err());
    }

    #[test]
    fn test_message_id_halves() {
        let id = MessageId::from_parts(0xDEADBEEF_CAFEBABE, 0x01234567_89ABCDEF);
        assert_eq!(id.hi(), 0xDEADBEEF_CAFEBABE);
        assert_eq!(id.lo(), 0x01234567_89ABCDEF);
    }

    #[test]
    fn test_uuid_display() {
        let tag = AddTag::from_parts(0x123e4567_e89b_12d3, 0xa456_426614174000);
        assert_eq!(tag.to_string(), "123e4567-e89b-12d3-a456-426614174000");
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(MessageId::random(), MessageId::random());
        assert_ne!(AddTag::random(), AddTag::random());
    }
}
