//! Concord Broadcast - Reliable dissemination of opaque payloads
//!
//! Two interchangeable protocols share one interface:
//! - [`CausalBroadcast`]: crash-fault, version-vector causal order
//! - [`ByzantineBroadcast`]: Bracha-style echo/ready quorums with signatures
//!
//! Both are sans-IO state machines. Callers feed membership events and
//! inbound messages, then drain outgoing messages and deliveries.

pub mod byzantine;
pub mod causal;
pub mod quorum;

pub use byzantine::*;
pub use causal::*;
pub use quorum::*;

use std::time::Duration;

use bytes::Bytes;

use concord_core::{Delivered, MessageId, NeighborDown, NeighborUp, PeerId};
use concord_wire::WireMessage;

/// A message addressed to one neighbor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub to: PeerId,
    pub message: WireMessage,
}

/// Broadcast layer counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub broadcasts: u64,
    pub delivered: u64,
    pub relayed: u64,
    pub buffered: u64,
    pub dropped_duplicate: u64,
    pub dropped_invalid: u64,
    pub dropped_equivocation: u64,
}

/// Common surface of both broadcast variants
pub trait BroadcastProtocol {
    /// The local process
    fn local(&self) -> PeerId;

    fn neighbors(&self) -> Vec<PeerId>;

    fn on_neighbor_up(&mut self, event: NeighborUp);

    fn on_neighbor_down(&mut self, event: NeighborDown);

    /// Disseminate `payload`; the returned id is fresh for this call
    fn broadcast(&mut self, payload: Bytes) -> MessageId;

    /// Handle one message received on the link from `from`
    fn on_message(&mut self, from: PeerId, message: WireMessage);

    fn pop_outgoing(&mut self) -> Option<Outgoing>;

    fn pop_delivered(&mut self) -> Option<Delivered>;

    fn stats(&self) -> &BroadcastStats;

    /// Ids held back for longer than `older_than` without being delivered
    fn stalled(&self, older_than: Duration) -> Vec<MessageId>;
}
