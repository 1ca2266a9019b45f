//! Concord Node - sans-IO composition of broadcast and replica
//!
//! The node owns one broadcast protocol and one OR-set replica. Callers
//! queue inbound messages, membership changes and application requests,
//! call [`Node::tick`], then drain outgoing messages and replies.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, warn};

use concord_broadcast::{
    BroadcastProtocol, BroadcastStats, ByzantineBroadcast, CausalBroadcast, Outgoing, QuorumConfig,
};
use concord_core::{ChannelAvailable, MessageId, NeighborDown, NeighborUp, PeerId};
use concord_crdt::{ApplyMode, Replica, ReplicaStats, Reply, Request};
use concord_crypto::{Identity, SecureChannelAvailable};
use concord_wire::WireMessage;

use crate::config::{FaultModel, NodeSettings};

/// Channel the replica's broadcast runs on
pub const REPLICATION_CHANNEL: u16 = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub incoming_queued: u64,
    pub outgoing_popped: u64,
    pub requests: u64,
    pub deliveries: u64,
    pub neighbor_ups: u64,
    pub neighbor_downs: u64,
}

/// Concord Node - one replica and its broadcast layer
pub struct Node {
    local: PeerId,
    fault_model: FaultModel,
    broadcast: Box<dyn BroadcastProtocol + Send>,
    replica: Replica,
    /// Inbound messages awaiting the next tick
    incoming: VecDeque<(PeerId, WireMessage)>,
    stats: RuntimeStats,
}

impl Node {
    /// Crash-fault node: causal broadcast, optimistic replica
    pub fn crash(channel: ChannelAvailable) -> Self {
        info!(local = %channel.local, channel = channel.channel_id, "causal broadcast ready");
        Node {
            local: channel.local,
            fault_model: FaultModel::Crash,
            broadcast: Box::new(CausalBroadcast::new(channel)),
            replica: Replica::new(channel.local, ApplyMode::Optimistic),
            incoming: VecDeque::new(),
            stats: RuntimeStats::default(),
        }
    }

    /// Byzantine node: signed quorum broadcast, apply on delivery
    pub fn byzantine(channel: SecureChannelAvailable, quorum: QuorumConfig) -> Self {
        info!(
            local = %channel.local,
            channel = channel.channel_id,
            key = %channel.identity.fingerprint(),
            f = quorum.f,
            "byzantine broadcast ready"
        );
        let local = channel.local;
        Node {
            local,
            fault_model: FaultModel::Byzantine,
            broadcast: Box::new(ByzantineBroadcast::new(channel, quorum)),
            replica: Replica::new(local, ApplyMode::OnDelivery),
            incoming: VecDeque::new(),
            stats: RuntimeStats::default(),
        }
    }

    pub fn with_fault_model(
        local: PeerId,
        fault_model: FaultModel,
        identity: Identity,
        quorum: QuorumConfig,
    ) -> Self {
        match fault_model {
            FaultModel::Crash => Node::crash(ChannelAvailable {
                channel_id: REPLICATION_CHANNEL,
                local,
            }),
            FaultModel::Byzantine => Node::byzantine(
                SecureChannelAvailable {
                    channel_id: REPLICATION_CHANNEL,
                    local,
                    identity,
                },
                quorum,
            ),
        }
    }

    pub fn from_settings(settings: &NodeSettings) -> Self {
        Node::with_fault_model(
            settings.local,
            settings.fault_model,
            settings.identity.clone(),
            settings.quorum,
        )
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn fault_model(&self) -> FaultModel {
        self.fault_model
    }

    pub fn neighbors(&self) -> Vec<PeerId> {
        self.broadcast.neighbors()
    }

    pub fn on_neighbor_up(&mut self, event: NeighborUp) {
        debug!(peer = %event.peer, "neighbor up");
        self.stats.neighbor_ups += 1;
        self.broadcast.on_neighbor_up(event);
    }

    pub fn on_neighbor_down(&mut self, event: NeighborDown) {
        debug!(peer = %event.peer, "neighbor down");
        self.stats.neighbor_downs += 1;
        self.broadcast.on_neighbor_down(event);
    }

    /// Queue a message received on the link from `from`
    pub fn queue_incoming(&mut self, from: PeerId, message: WireMessage) {
        self.incoming.push_back((from, message));
        self.stats.incoming_queued += 1;
    }

    /// Hand an application request to the replica
    pub fn request(&mut self, request: Request) {
        self.stats.requests += 1;
        self.replica.handle(request);
    }

    /// Run until no layer has work left
    pub fn tick(&mut self) {
        self.stats.ticks += 1;
        loop {
            let mut progressed = false;

            while let Some((from, message)) = self.incoming.pop_front() {
                self.broadcast.on_message(from, message);
                progressed = true;
            }

            while let Some(payload) = self.replica.pop_broadcast() {
                let id = self.broadcast.broadcast(payload);
                debug!(id = %id, "operation broadcast");
                progressed = true;
            }

            while let Some(delivered) = self.broadcast.pop_delivered() {
                self.replica.on_delivered(&delivered);
                self.stats.deliveries += 1;
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    pub fn pop_outgoing(&mut self) -> Option<Outgoing> {
        let next = self.broadcast.pop_outgoing();
        if next.is_some() {
            self.stats.outgoing_popped += 1;
        }
        next
    }

    pub fn pop_reply(&mut self) -> Option<Reply> {
        self.replica.pop_reply()
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn stalled(&self, older_than: Duration) -> Vec<MessageId> {
        self.broadcast.stalled(older_than)
    }

    /// Warn about deliveries held back longer than `older_than`
    pub fn log_stalled(&self, older_than: Duration) -> usize {
        let stalled = self.stalled(older_than);
        for id in &stalled {
            warn!(id = %id, waited = ?older_than, "delivery stalled");
        }
        stalled.len()
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn broadcast_stats(&self) -> &BroadcastStats {
        self.broadcast.stats()
    }

    pub fn replica_stats(&self) -> &ReplicaStats {
        self.replica.stats()
    }
}
