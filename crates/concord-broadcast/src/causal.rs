//! Crash-fault reliable broadcast with causal delivery
//!
//! Every broadcast carries the author's version vector, incremented at the
//! author's own coordinate. A received message is delivered once all of its
//! causal predecessors have been; until then it waits in the pending buffer,
//! which is swept after every delivery. Delivered messages are relayed once
//! so that peers without a direct link to the author still receive them.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use concord_core::{
    BroadcastRequest, ChannelAvailable, Delivered, MessageId, NeighborDown, NeighborUp, PeerId,
    VersionVector,
};
use concord_wire::{Broadcast, WireMessage};

use crate::{BroadcastProtocol, BroadcastStats, Outgoing};

/// A received message waiting for its predecessors
#[derive(Clone, Debug)]
struct Pending {
    from: PeerId,
    message: Broadcast,
    received_at: Instant,
}

/// Causal broadcast instance
pub struct CausalBroadcast {
    local: PeerId,
    channel_id: u16,
    neighbors: BTreeSet<PeerId>,
    /// Peers that left at least once; a return resets their counter
    departed: HashSet<PeerId>,
    clock: VersionVector,
    delivered: HashSet<MessageId>,
    /// Arrival order is preserved so sweeps are deterministic
    pending: Vec<Pending>,
    pending_ids: HashSet<MessageId>,
    outgoing: VecDeque<Outgoing>,
    deliveries: VecDeque<Delivered>,
    stats: BroadcastStats,
}

impl CausalBroadcast {
    pub fn new(channel: ChannelAvailable) -> Self {
        let mut clock = VersionVector::new();
        clock.set(channel.local, 0);
        debug!(local = %channel.local, channel = channel.channel_id, "causal broadcast started");

        CausalBroadcast {
            local: channel.local,
            channel_id: channel.channel_id,
            neighbors: BTreeSet::new(),
            departed: HashSet::new(),
            clock,
            delivered: HashSet::new(),
            pending: Vec::new(),
            pending_ids: HashSet::new(),
            outgoing: VecDeque::new(),
            deliveries: VecDeque::new(),
            stats: BroadcastStats::default(),
        }
    }

    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    /// Local version vector
    pub fn clock(&self) -> &VersionVector {
        &self.clock
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_delivered(&self, id: MessageId) -> bool {
        self.delivered.contains(&id)
    }

    /// All predecessors of `message` are delivered here, and it is the
    /// author's next message
    fn is_ready(&self, message: &Broadcast) -> bool {
        message.version.iter().all(|(peer, count)| {
            let local = self.clock.get(peer);
            if peer == message.sender {
                count == local.saturating_add(1)
            } else {
                count <= local
            }
        })
    }

    fn handle_broadcast(&mut self, from: PeerId, message: Broadcast) {
        if self.delivered.contains(&message.id) || self.pending_ids.contains(&message.id) {
            self.stats.dropped_duplicate += 1;
            return;
        }

        if !message.version.contains(message.sender) {
            warn!(
                from = %from,
                author = %message.sender,
                id = %message.id,
                "broadcast without the author's own clock entry, dropping"
            );
            self.stats.dropped_invalid += 1;
            return;
        }

        if self.is_ready(&message) {
            self.deliver(from, message);
            self.drain_pending();
        } else {
            debug!(
                from = %from,
                author = %message.sender,
                id = %message.id,
                "predecessors missing, buffering"
            );
            self.pending_ids.insert(message.id);
            self.pending.push(Pending {
                from,
                message,
                received_at: Instant::now(),
            });
            self.stats.buffered += 1;
        }
    }

    fn deliver(&mut self, from: PeerId, message: Broadcast) {
        self.delivered.insert(message.id);
        self.clock.increment(message.sender);
        self.stats.delivered += 1;

        match BroadcastRequest::decode(&message.payload) {
            Ok(request) => self.deliveries.push_back(request.into_delivered(message.id)),
            Err(e) => warn!(id = %message.id, error = %e, "undecodable broadcast envelope"),
        }

        let targets: Vec<PeerId> = self
            .neighbors
            .iter()
            .copied()
            .filter(|&p| p != from && p != message.sender)
            .collect();
        for to in targets {
            self.stats.relayed += 1;
            self.outgoing.push_back(Outgoing {
                to,
                message: WireMessage::Broadcast(message.clone()),
            });
        }
    }

    /// Deliver buffered messages until a full sweep finds nothing ready
    fn drain_pending(&mut self) {
        while let Some(pos) = self.pending.iter().position(|p| self.is_ready(&p.message)) {
            let entry = self.pending.remove(pos);
            self.pending_ids.remove(&entry.message.id);
            debug!(id = %entry.message.id, "buffered broadcast became ready");
            self.deliver(entry.from, entry.message);
        }
    }
}

impl BroadcastProtocol for CausalBroadcast {
    fn local(&self) -> PeerId {
        self.local
    }

    fn neighbors(&self) -> Vec<PeerId> {
        self.neighbors.iter().copied().collect()
    }

    fn on_neighbor_up(&mut self, event: NeighborUp) {
        debug!(peer = %event.peer, "neighbor up");
        self.neighbors.insert(event.peer);
        if self.departed.remove(&event.peer) {
            warn!(
                peer = %event.peer,
                "neighbor rejoined, its causal counter restarts at zero"
            );
        }
        self.clock.set(event.peer, 0);
    }

    fn on_neighbor_down(&mut self, event: NeighborDown) {
        debug!(peer = %event.peer, "neighbor down");
        self.neighbors.remove(&event.peer);
        self.clock.remove(event.peer);
        self.departed.insert(event.peer);
    }

    fn broadcast(&mut self, payload: Bytes) -> MessageId {
        let id = MessageId::random();
        self.clock.increment(self.local);
        self.stats.broadcasts += 1;

        let message = Broadcast {
            sender: self.local,
            id,
            payload: BroadcastRequest::new(self.local, payload.clone()).encode(),
            version: self.clock.clone(),
        };

        self.delivered.insert(id);
        self.stats.delivered += 1;
        self.deliveries.push_back(Delivered {
            id,
            payload,
            original_sender: self.local,
        });

        for &to in &self.neighbors {
            self.outgoing.push_back(Outgoing {
                to,
                message: WireMessage::Broadcast(message.clone()),
            });
        }
        id
    }

    fn on_message(&mut self, from: PeerId, message: WireMessage) {
        match message {
            WireMessage::Broadcast(broadcast) => self.handle_broadcast(from, broadcast),
            other => {
                warn!(from = %from, kind = other.kind(), "unexpected message for causal broadcast");
                self.stats.dropped_invalid += 1;
            }
        }
    }

    fn pop_outgoing(&mut self) -> Option<Outgoing> {
        self.outgoing.pop_front()
    }

    fn pop_delivered(&mut self) -> Option<Delivered> {
        self.deliveries.pop_front()
    }

    fn stats(&self) -> &BroadcastStats {
        &self.stats
    }

    fn stalled(&self, older_than: Duration) -> Vec<MessageId> {
        self.pending
            .iter()
            .filter(|p| p.received_at.elapsed() >= older_than)
            .map(|p| p.message.id)
            .collect()
    }
}
