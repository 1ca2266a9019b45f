//! Network simulator for multi-node replication tests
//!
//! Nodes exchange encoded wire bytes over seeded chaos links, so every hop
//! goes through the real codec. Peers can also be *scripted*: they have a
//! key and links but no node, and tests write their traffic by hand.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use concord_broadcast::{BroadcastStats, QuorumConfig};
use concord_core::{NeighborDown, NeighborUp, PeerId};
use concord_crdt::{Reply, Request};
use concord_crypto::Identity;
use concord_runtime::{FaultModel, Node};
use concord_wire::WireMessage;

use crate::adversary::Adversary;
use crate::chaos::{ChaosConfig, ChaosNetwork, ChaosStats};

/// Simulator counters
#[derive(Clone, Debug, Default)]
pub struct SimulatorStats {
    pub sent: u64,
    pub delivered: u64,
    /// Messages addressed to a peer without a link
    pub undeliverable: u64,
    pub decode_failures: u64,
}

/// Network simulator
pub struct NetworkSimulator {
    nodes: BTreeMap<PeerId, Node>,
    keys: HashMap<PeerId, Option<[u8; 32]>>,
    links: BTreeMap<(PeerId, PeerId), ChaosNetwork<Bytes>>,
    /// Traffic addressed to scripted peers
    captured: Vec<(PeerId, PeerId, WireMessage)>,
    replies: HashMap<PeerId, Vec<Reply>>,
    default_config: ChaosConfig,
    seed: u64,
    seed_counter: u64,
    tick_interval: Duration,
    current_time: Duration,
    stats: SimulatorStats,
}

impl NetworkSimulator {
    pub fn new(default_config: ChaosConfig, seed: u64) -> Self {
        NetworkSimulator {
            nodes: BTreeMap::new(),
            keys: HashMap::new(),
            links: BTreeMap::new(),
            captured: Vec::new(),
            replies: HashMap::new(),
            default_config,
            seed,
            seed_counter: 0,
            tick_interval: Duration::from_millis(5),
            current_time: Duration::ZERO,
            stats: SimulatorStats::default(),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn add_node(&mut self, node: Node, public_key: Option<[u8; 32]>) {
        self.keys.insert(node.local(), public_key);
        self.nodes.insert(node.local(), node);
    }

    /// Register a peer whose traffic the test writes itself
    pub fn add_scripted(&mut self, peer: PeerId, public_key: Option<[u8; 32]>) {
        self.keys.insert(peer, public_key);
    }

    /// Open links both ways and announce each side to the other
    pub fn connect(&mut self, a: PeerId, b: PeerId) {
        for (from, to) in [(a, b), (b, a)] {
            let seed = self.seed.wrapping_add(self.seed_counter);
            self.seed_counter += 1;
            self.links
                .insert((from, to), ChaosNetwork::new(self.default_config.clone(), seed));
        }
        for (local, peer) in [(a, b), (b, a)] {
            let public_key = self.keys.get(&peer).copied().flatten();
            if let Some(node) = self.nodes.get_mut(&local) {
                node.on_neighbor_up(NeighborUp { peer, public_key });
            }
        }
        self.flush(a);
        self.flush(b);
    }

    /// Close both links; whatever was in flight is lost
    pub fn disconnect(&mut self, a: PeerId, b: PeerId) {
        self.links.remove(&(a, b));
        self.links.remove(&(b, a));
        for (local, peer) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get_mut(&local) {
                node.on_neighbor_down(NeighborDown { peer });
            }
        }
        self.flush(a);
        self.flush(b);
    }

    /// Link every registered peer with every other
    pub fn full_mesh(&mut self) {
        let mut peers: Vec<PeerId> = self.keys.keys().copied().collect();
        peers.sort();
        for (i, &a) in peers.iter().enumerate() {
            for &b in &peers[i + 1..] {
                self.connect(a, b);
            }
        }
    }

    pub fn request(&mut self, peer: PeerId, request: Request) {
        if let Some(node) = self.nodes.get_mut(&peer) {
            node.request(request);
            node.tick();
        }
        self.flush(peer);
    }

    /// Put a hand-written message on the link `from -> to`
    pub fn inject(&mut self, from: PeerId, to: PeerId, message: &WireMessage) {
        self.transmit(from, to, message.encode());
    }

    /// Advance every link by one tick and let the nodes react
    pub fn step(&mut self) {
        self.current_time += self.tick_interval;

        let mut arrivals = Vec::new();
        for (&(from, to), link) in self.links.iter_mut() {
            for bytes in link.tick(self.tick_interval) {
                arrivals.push((from, to, bytes));
            }
        }

        for (from, to, bytes) in arrivals {
            let message = match WireMessage::decode(bytes) {
                Ok(message) => message,
                Err(e) => {
                    debug!(from = %from, to = %to, error = %e, "undecodable bytes on link");
                    self.stats.decode_failures += 1;
                    continue;
                }
            };
            self.stats.delivered += 1;
            match self.nodes.get_mut(&to) {
                Some(node) => node.queue_incoming(from, message),
                None => self.captured.push((from, to, message)),
            }
        }

        let peers: Vec<PeerId> = self.nodes.keys().copied().collect();
        for peer in peers {
            if let Some(node) = self.nodes.get_mut(&peer) {
                node.tick();
            }
            self.flush(peer);
        }
    }

    /// Step until no link carries anything; false if `max_steps` ran out
    pub fn run_until_quiet(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if self.is_quiet() {
                return true;
            }
            self.step();
        }
        self.is_quiet()
    }

    pub fn is_quiet(&self) -> bool {
        self.links.values().all(|link| link.in_flight() == 0)
    }

    fn transmit(&mut self, from: PeerId, to: PeerId, bytes: Bytes) {
        match self.links.get_mut(&(from, to)) {
            Some(link) => {
                link.send(bytes);
                self.stats.sent += 1;
            }
            None => self.stats.undeliverable += 1,
        }
    }

    fn flush(&mut self, peer: PeerId) {
        let Some(node) = self.nodes.get_mut(&peer) else {
            return;
        };

        let mut outgoing = Vec::new();
        while let Some(out) = node.pop_outgoing() {
            outgoing.push(out);
        }
        let replies = self.replies.entry(peer).or_default();
        while let Some(reply) = node.pop_reply() {
            replies.push(reply);
        }

        for out in outgoing {
            self.transmit(peer, out.to, out.message.encode());
        }
    }

    pub fn node(&self, peer: PeerId) -> Option<&Node> {
        self.nodes.get(&peer)
    }

    pub fn node_mut(&mut self, peer: PeerId) -> Option<&mut Node> {
        self.nodes.get_mut(&peer)
    }

    /// Peers running a real node, sorted
    pub fn node_peers(&self) -> Vec<PeerId> {
        self.nodes.keys().copied().collect()
    }

    /// Drain the replies a node has produced
    pub fn take_replies(&mut self, peer: PeerId) -> Vec<Reply> {
        self.replies.remove(&peer).unwrap_or_default()
    }

    /// Drain traffic addressed to scripted peers
    pub fn take_captured(&mut self) -> Vec<(PeerId, PeerId, WireMessage)> {
        std::mem::take(&mut self.captured)
    }

    pub fn digests(&self) -> BTreeMap<PeerId, String> {
        self.nodes
            .iter()
            .map(|(&peer, node)| (peer, node.replica().digest()))
            .collect()
    }

    /// Every node holds the same set
    pub fn converged(&self) -> bool {
        let mut digests = self.nodes.values().map(|node| node.replica().digest());
        match digests.next() {
            Some(first) => digests.all(|digest| digest == first),
            None => true,
        }
    }

    pub fn broadcast_stats(&self, peer: PeerId) -> Option<&BroadcastStats> {
        self.nodes.get(&peer).map(|node| node.broadcast_stats())
    }

    pub fn link_stats(&self, from: PeerId, to: PeerId) -> Option<&ChaosStats> {
        self.links.get(&(from, to)).map(|link| link.stats())
    }

    pub fn stats(&self) -> &SimulatorStats {
        &self.stats
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }
}

/// A built scenario
pub struct Scenario {
    pub sim: NetworkSimulator,
    /// Peers running a node
    pub honest: Vec<PeerId>,
    pub adversaries: Vec<Adversary>,
}

/// Test scenario builder
pub struct ScenarioBuilder {
    nodes: u16,
    adversaries: u16,
    fault_model: FaultModel,
    quorum: QuorumConfig,
    config: ChaosConfig,
    seed: u64,
    base_port: u16,
    full_mesh: bool,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        ScenarioBuilder {
            nodes: 3,
            adversaries: 0,
            fault_model: FaultModel::Crash,
            quorum: QuorumConfig::default(),
            config: ChaosConfig::fifo(),
            seed: 0,
            base_port: 7000,
            full_mesh: true,
        }
    }

    pub fn with_nodes(mut self, count: u16) -> Self {
        self.nodes = count;
        self
    }

    /// Byzantine broadcast with the given quorum rule
    pub fn byzantine(mut self, quorum: QuorumConfig) -> Self {
        self.fault_model = FaultModel::Byzantine;
        self.quorum = quorum;
        self
    }

    /// Scripted Byzantine peers, numbered after the honest ones
    pub fn with_adversaries(mut self, count: u16) -> Self {
        self.adversaries = count;
        self
    }

    pub fn with_config(mut self, config: ChaosConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Leave links to the caller
    pub fn without_links(mut self) -> Self {
        self.full_mesh = false;
        self
    }

    /// Port of the `i`th honest node (0-based)
    pub fn peer(&self, i: u16) -> PeerId {
        PeerId::localhost(self.base_port + i)
    }

    pub fn build(self) -> Scenario {
        let mut sim = NetworkSimulator::new(self.config.clone(), self.seed);

        let mut honest = Vec::new();
        for i in 0..self.nodes {
            let local = self.peer(i);
            let identity = Identity::from_seed(&seed_for(self.seed, i));
            let key = identity.public_key_bytes();
            sim.add_node(
                Node::with_fault_model(local, self.fault_model, identity, self.quorum),
                Some(key),
            );
            honest.push(local);
        }

        let mut adversaries = Vec::new();
        for j in 0..self.adversaries {
            let index = self.nodes + j;
            let adversary = Adversary::new(
                self.peer(index),
                Identity::from_seed(&seed_for(self.seed, index)),
            );
            sim.add_scripted(adversary.local(), Some(adversary.public_key()));
            adversaries.push(adversary);
        }

        if self.full_mesh {
            sim.full_mesh();
        }

        Scenario {
            sim,
            honest,
            adversaries,
        }
    }
}

fn seed_for(seed: u64, index: u16) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_be_bytes());
    bytes[8..10].copy_from_slice(&index.to_be_bytes());
    bytes[31] = 0xC0;
    bytes
}
