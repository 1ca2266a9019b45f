//! Concord Transport - Links between statically configured peers
//!
//! - One TCP connection per neighbor pair; the higher peer dials
//! - Mutual challenge-response handshake proving each side's Ed25519 key
//! - Length-delimited frames carrying `WireMessage`s
//!
//! The transport reports neighbor up/down and inbound messages as
//! [`TransportEvent`]s on a channel.

pub mod handshake;
pub mod tcp;

pub use handshake::*;
pub use tcp::*;

use std::collections::HashMap;
use std::time::Duration;

use concord_core::{NeighborDown, NeighborUp, PeerId};
use concord_crypto::{Identity, PublicIdentity};
use concord_wire::WireMessage;

/// What the transport reports to its owner
#[derive(Clone, Debug)]
pub enum TransportEvent {
    NeighborUp(NeighborUp),
    NeighborDown(NeighborDown),
    Message { from: PeerId, message: WireMessage },
}

/// Transport configuration
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub local: PeerId,
    /// The fixed neighbor set; anyone else is refused
    pub neighbors: Vec<PeerId>,
    pub identity: Identity,
    /// Keys a neighbor must present, when pinned
    pub trusted_keys: HashMap<PeerId, PublicIdentity>,
    /// Pause between dial attempts
    pub redial_interval: Duration,
    pub handshake_timeout: Duration,
    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl TransportConfig {
    pub fn new(local: PeerId, neighbors: Vec<PeerId>, identity: Identity) -> Self {
        TransportConfig {
            local,
            neighbors,
            identity,
            trusted_keys: HashMap::new(),
            redial_interval: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(5),
            event_buffer: 1024,
        }
    }

    pub fn is_neighbor(&self, peer: PeerId) -> bool {
        self.neighbors.contains(&peer)
    }

    /// Whether we open the connection to `peer`
    pub fn dials(&self, peer: PeerId) -> bool {
        self.local > peer
    }
}
