//! Byzantine reliable broadcast (Bracha-style echo/ready quorums)
//!
//! Phases for one message id:
//! 1. Send: the author signs the envelope and sends it to its neighbors.
//! 2. Echo: on a verified send, each process signs and floods an echo once.
//!    Echoes count only with a valid author signature; enough matching
//!    echoes trigger Ready.
//! 3. Ready: `f + 1` matching readies force our own Ready; `2f + 1`
//!    matching readies deliver.
//!
//! Every hop is signed by the link peer, and a peer's first payload for an
//! id is the only one ever counted for it. Nothing here is retried; a
//! message that cannot gather its quorums stays undelivered.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use concord_core::{
    BroadcastRequest, Delivered, MessageId, NeighborDown, NeighborUp, PeerId, VersionVector,
};
use concord_crypto::{Identity, KeyDirectory, PublicIdentity, SecureChannelAvailable};
use concord_wire::{Echo, Ready, Signed, SignedBroadcast, WireBody, WireMessage};

use crate::{BroadcastProtocol, BroadcastStats, Outgoing, QuorumConfig, Tally, Witness};

/// Per-id protocol record
#[derive(Debug)]
struct Instance {
    echoes: Tally,
    readies: Tally,
    echo_sent: bool,
    ready_sent: bool,
    created_at: Instant,
}

impl Instance {
    fn new() -> Self {
        Instance {
            echoes: Tally::new(),
            readies: Tally::new(),
            echo_sent: false,
            ready_sent: false,
            created_at: Instant::now(),
        }
    }
}

/// Byzantine broadcast instance
pub struct ByzantineBroadcast {
    local: PeerId,
    channel_id: u16,
    identity: Identity,
    directory: KeyDirectory,
    neighbors: BTreeSet<PeerId>,
    quorum: QuorumConfig,
    instances: HashMap<MessageId, Instance>,
    delivered: HashSet<MessageId>,
    outgoing: VecDeque<Outgoing>,
    deliveries: VecDeque<Delivered>,
    stats: BroadcastStats,
}

impl ByzantineBroadcast {
    pub fn new(channel: SecureChannelAvailable, quorum: QuorumConfig) -> Self {
        let mut directory = KeyDirectory::new();
        directory.insert(channel.local, channel.identity.public());
        debug!(
            local = %channel.local,
            channel = channel.channel_id,
            f = quorum.f,
            key = %channel.identity.fingerprint(),
            "byzantine broadcast started"
        );

        ByzantineBroadcast {
            local: channel.local,
            channel_id: channel.channel_id,
            identity: channel.identity,
            directory,
            neighbors: BTreeSet::new(),
            quorum,
            instances: HashMap::new(),
            delivered: HashSet::new(),
            outgoing: VecDeque::new(),
            deliveries: VecDeque::new(),
            stats: BroadcastStats::default(),
        }
    }

    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    pub fn quorum(&self) -> QuorumConfig {
        self.quorum
    }

    pub fn directory(&self) -> &KeyDirectory {
        &self.directory
    }

    pub fn is_delivered(&self, id: MessageId) -> bool {
        self.delivered.contains(&id)
    }

    /// Ids with an open (undelivered) record
    pub fn open_instances(&self) -> usize {
        self.instances.len()
    }

    fn send_to_neighbors(&mut self, message: WireMessage) {
        for &to in &self.neighbors {
            self.outgoing.push_back(Outgoing {
                to,
                message: message.clone(),
            });
        }
    }

    fn seal<T: WireBody>(&self, body: T) -> Signed<T> {
        Signed::seal(body, |bytes| self.identity.sign(bytes))
    }

    /// Check the link signature and that the claimed sender is the link peer
    fn authenticate<T: WireBody>(&mut self, from: PeerId, claimed: PeerId, signed: &Signed<T>) -> bool {
        if claimed != from {
            warn!(from = %from, claimed = %claimed, "sender field does not match link peer, dropping");
            self.stats.dropped_invalid += 1;
            return false;
        }

        if let Err(e) = self
            .directory
            .verify(from, signed.signed_bytes(), &signed.signature)
        {
            warn!(from = %from, error = %e, "invalid signature from sender, dropping");
            self.stats.dropped_invalid += 1;
            return false;
        }
        true
    }

    /// The author signed exactly this envelope, and the envelope names it
    fn original_is_authentic(
        &mut self,
        original_sender: PeerId,
        id: MessageId,
        payload: &Bytes,
        signature: &[u8],
    ) -> bool {
        if let Err(e) = self.directory.verify(original_sender, payload, signature) {
            warn!(id = %id, author = %original_sender, error = %e, "invalid signature from original sender");
            self.stats.dropped_invalid += 1;
            return false;
        }

        match BroadcastRequest::decode(payload) {
            Ok(request) if request.sender == original_sender => true,
            Ok(request) => {
                warn!(
                    id = %id,
                    author = %original_sender,
                    envelope = %request.sender,
                    "envelope names a different author"
                );
                self.stats.dropped_invalid += 1;
                false
            }
            Err(e) => {
                warn!(id = %id, error = %e, "undecodable broadcast envelope");
                self.stats.dropped_invalid += 1;
                false
            }
        }
    }

    fn handle_send(&mut self, send: SignedBroadcast) {
        if self
            .instances
            .get(&send.id)
            .map_or(false, |instance| instance.echo_sent)
        {
            self.stats.dropped_duplicate += 1;
            return;
        }

        if !self.original_is_authentic(
            send.original_sender,
            send.id,
            &send.payload,
            &send.original_signature,
        ) {
            return;
        }

        let echo = Echo {
            original_sender: send.original_sender,
            sender: self.local,
            id: send.id,
            payload: send.payload,
            original_signature: send.original_signature,
        };
        let signed = self.seal(echo.clone());

        self.instances
            .entry(send.id)
            .or_insert_with(Instance::new)
            .echo_sent = true;

        debug!(id = %echo.id, author = %echo.original_sender, "echoing");
        self.send_to_neighbors(WireMessage::Echo(signed));
        self.handle_echo(echo);
    }

    fn handle_echo(&mut self, echo: Echo) {
        let threshold = self.quorum.echo_threshold(self.neighbors.len());
        let instance = self.instances.entry(echo.id).or_insert_with(Instance::new);

        match instance.echoes.record(echo.sender, &echo.payload) {
            Witness::Recorded => {}
            Witness::Duplicate => {
                self.stats.dropped_duplicate += 1;
                return;
            }
            Witness::Conflict => {
                warn!(id = %echo.id, sender = %echo.sender, "conflicting echo, equivocation");
                self.stats.dropped_equivocation += 1;
                return;
            }
        }

        if instance.ready_sent || instance.echoes.count(&echo.payload) < threshold {
            return;
        }

        debug!(id = %echo.id, threshold, "echo quorum reached");
        self.send_ready(echo.id, echo.payload);
    }

    fn send_ready(&mut self, id: MessageId, payload: Bytes) {
        let ready = Ready {
            sender: self.local,
            id,
            payload,
        };
        let signed = self.seal(ready.clone());

        if let Some(instance) = self.instances.get_mut(&id) {
            instance.ready_sent = true;
        }

        self.send_to_neighbors(WireMessage::Ready(signed));
        self.handle_ready(ready);
    }

    fn handle_ready(&mut self, ready: Ready) {
        let instance = self.instances.entry(ready.id).or_insert_with(Instance::new);

        match instance.readies.record(ready.sender, &ready.payload) {
            Witness::Recorded => {}
            Witness::Duplicate => {
                self.stats.dropped_duplicate += 1;
                return;
            }
            Witness::Conflict => {
                warn!(id = %ready.id, sender = %ready.sender, "conflicting ready, equivocation");
                self.stats.dropped_equivocation += 1;
                return;
            }
        }

        let count = instance.readies.count(&ready.payload);
        if !instance.ready_sent && count >= self.quorum.amplify_threshold() {
            debug!(id = %ready.id, count, "ready amplification");
            // Our own ready re-enters here and takes the delivery check
            self.send_ready(ready.id, ready.payload);
            return;
        }

        if count >= self.quorum.delivery_threshold() {
            self.deliver(ready.id, ready.payload);
        }
    }

    fn deliver(&mut self, id: MessageId, payload: Bytes) {
        if !self.delivered.insert(id) {
            return;
        }
        self.instances.remove(&id);
        self.stats.delivered += 1;

        match BroadcastRequest::decode(&payload) {
            Ok(request) => {
                debug!(id = %id, author = %request.sender, "delivered");
                self.deliveries.push_back(request.into_delivered(id));
            }
            Err(e) => warn!(id = %id, error = %e, "undecodable broadcast envelope"),
        }
    }
}

impl BroadcastProtocol for ByzantineBroadcast {
    fn local(&self) -> PeerId {
        self.local
    }

    fn neighbors(&self) -> Vec<PeerId> {
        self.neighbors.iter().copied().collect()
    }

    fn on_neighbor_up(&mut self, event: NeighborUp) {
        debug!(peer = %event.peer, "neighbor up");
        match event.public_key.as_ref().and_then(PublicIdentity::from_bytes) {
            Some(key) => {
                self.directory.insert(event.peer, key);
            }
            None => warn!(
                peer = %event.peer,
                "neighbor has no usable public key, its messages will be dropped"
            ),
        }
        self.neighbors.insert(event.peer);
    }

    fn on_neighbor_down(&mut self, event: NeighborDown) {
        debug!(peer = %event.peer, "neighbor down");
        self.neighbors.remove(&event.peer);
        if event.peer != self.local {
            self.directory.remove(event.peer);
        }
    }

    fn broadcast(&mut self, payload: Bytes) -> MessageId {
        let id = MessageId::random();
        let envelope = BroadcastRequest::new(self.local, payload).encode();
        let original_signature = Bytes::copy_from_slice(&self.identity.sign(&envelope));
        self.stats.broadcasts += 1;

        let send = SignedBroadcast {
            original_sender: self.local,
            sender: self.local,
            id,
            payload: envelope,
            original_signature,
            version: VersionVector::new(),
        };
        let signed = self.seal(send.clone());

        self.send_to_neighbors(WireMessage::SignedBroadcast(signed));
        self.handle_send(send);
        id
    }

    fn on_message(&mut self, from: PeerId, message: WireMessage) {
        if let Some(id) = message.message_id() {
            if self.delivered.contains(&id) {
                self.stats.dropped_duplicate += 1;
                return;
            }
        }

        match message {
            WireMessage::SignedBroadcast(signed) => {
                if self.authenticate(from, signed.body.sender, &signed) {
                    self.handle_send(signed.body);
                }
            }
            WireMessage::Echo(signed) => {
                if !self.authenticate(from, signed.body.sender, &signed) {
                    return;
                }
                let echo = signed.body;
                // Only echoes carrying the author's signature are counted
                if self.original_is_authentic(
                    echo.original_sender,
                    echo.id,
                    &echo.payload,
                    &echo.original_signature,
                ) {
                    self.handle_echo(echo);
                }
            }
            WireMessage::Ready(signed) => {
                if self.authenticate(from, signed.body.sender, &signed) {
                    self.handle_ready(signed.body);
                }
            }
            other => {
                warn!(from = %from, kind = other.kind(), "unexpected message for byzantine broadcast");
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
        self.instances
            .iter()
            .filter(|(_, instance)| instance.created_at.elapsed() >= older_than)
            .map(|(id, _)| *id)
            .collect()
    }
}
