//! Replica engine: requests in, operations to broadcast, deliveries applied

use std::collections::{BTreeSet, VecDeque};

use bytes::Bytes;
use tracing::{debug, warn};

use concord_core::{AddTag, Delivered, PeerId};

use crate::{Operation, OrSet};

/// When the replica's own operations take effect
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Apply and acknowledge immediately; skip our own deliveries
    #[default]
    Optimistic,
    /// Apply and acknowledge only when our own broadcast is delivered
    OnDelivery,
}

/// Application request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Add(String),
    Remove(String),
    Read,
}

/// Acknowledgement handed back to the application
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Add { element: String },
    Remove { element: String },
    Read { elements: BTreeSet<String> },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    pub adds: u64,
    pub removes: u64,
    pub noop_removes: u64,
    pub applied: u64,
    pub skipped_own: u64,
    pub decode_failures: u64,
}

/// One OR-set replica
pub struct Replica {
    local: PeerId,
    mode: ApplyMode,
    set: OrSet,
    broadcasts: VecDeque<Bytes>,
    replies: VecDeque<Reply>,
    stats: ReplicaStats,
}

impl Replica {
    pub fn new(local: PeerId, mode: ApplyMode) -> Self {
        Replica {
            local,
            mode,
            set: OrSet::new(),
            broadcasts: VecDeque::new(),
            replies: VecDeque::new(),
            stats: ReplicaStats::default(),
        }
    }

    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    pub fn state(&self) -> &OrSet {
        &self.set
    }

    pub fn stats(&self) -> &ReplicaStats {
        &self.stats
    }

    pub fn observed(&self, element: &str) -> BTreeSet<AddTag> {
        self.set.observed(element)
    }

    pub fn digest(&self) -> String {
        self.set.digest()
    }

    pub fn handle(&mut self, request: Request) {
        match request {
            Request::Add(element) => self.add(element),
            Request::Remove(element) => self.remove(element),
            Request::Read => self.read(),
        }
    }

    pub fn add(&mut self, element: String) {
        let op = Operation::Add {
            tag: AddTag::random(),
            element,
        };
        self.stats.adds += 1;

        if self.mode == ApplyMode::Optimistic {
            self.set.apply(&op);
            self.replies.push_back(Reply::Add {
                element: op.element().to_string(),
            });
        }
        self.broadcasts.push_back(op.encode());
    }

    pub fn remove(&mut self, element: String) {
        let tags = self.set.observed(&element);
        if tags.is_empty() {
            debug!(element = %element, "remove of absent element");
            self.stats.noop_removes += 1;
            self.replies.push_back(Reply::Remove { element });
            return;
        }

        let op = Operation::Remove { tags, element };
        self.stats.removes += 1;
        self.broadcasts.push_back(op.encode());

        if self.mode == ApplyMode::Optimistic {
            self.set.apply(&op);
            self.replies.push_back(Reply::Remove {
                element: op.element().to_string(),
            });
        }
    }

    pub fn read(&mut self) {
        self.replies.push_back(Reply::Read {
            elements: self.set.elements(),
        });
    }

    /// Consume one delivery from the broadcast layer
    pub fn on_delivered(&mut self, delivered: &Delivered) {
        let own = delivered.original_sender == self.local;
        if own && self.mode == ApplyMode::Optimistic {
            self.stats.skipped_own += 1;
            return;
        }

        let op = match Operation::decode(&delivered.payload) {
            Ok(op) => op,
            Err(e) => {
                warn!(
                    id = %delivered.id,
                    author = %delivered.original_sender,
                    error = %e,
                    "dropping undecodable operation"
                );
                self.stats.decode_failures += 1;
                return;
            }
        };

        self.set.apply(&op);
        self.stats.applied += 1;

        if own {
            let element = op.element().to_string();
            self.replies.push_back(match op {
                Operation::Add { .. } => Reply::Add { element },
                Operation::Remove { .. } => Reply::Remove { element },
            });
        }
    }

    /// Next encoded operation to hand to the broadcast layer
    pub fn pop_broadcast(&mut self) -> Option<Bytes> {
        self.broadcasts.pop_front()
    }

    pub fn pop_reply(&mut self) -> Option<Reply> {
        self.replies.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::MessageId;

    fn peer(port: u16) -> PeerId {
        PeerId::localhost(port)
    }

    fn deliver(replica: &mut Replica, from: PeerId, payload: Bytes) {
        replica.on_delivered(&Delivered {
            id: MessageId::random(),
            payload,
            original_sender: from,
        });
    }

    #[test]
    fn test_optimistic_add_applies_and_replies_immediately() {
        let mut r = Replica::new(peer(1), ApplyMode::Optimistic);
        r.handle(Request::Add("x".into()));

        assert!(r.state().contains("x"));
        assert_eq!(r.pop_reply(), Some(Reply::Add { element: "x".into() }));
        let op = Operation::decode(&r.pop_broadcast().unwrap()).unwrap();
        assert!(matches!(op, Operation::Add { .. }));
    }

    #[test]
    fn test_own_delivery_skipped_when_optimistic() {
        let mut r = Replica::new(peer(1), ApplyMode::Optimistic);
        r.handle(Request::Add("x".into()));
        let op = r.pop_broadcast().unwrap();
        r.handle(Request::Remove("x".into()));
        r.pop_broadcast();

        // Late self-delivery of the add must not resurrect x
        deliver(&mut r, peer(1), op);
        assert!(!r.state().contains("x"));
        assert_eq!(r.stats().skipped_own, 1);
    }

    #[test]
    fn test_remove_carries_observed_tags() {
        let mut r = Replica::new(peer(1), ApplyMode::Optimistic);
        r.handle(Request::Add("x".into()));
        r.handle(Request::Add("x".into()));
        let tags = r.observed("x");
        r.pop_broadcast();
        r.pop_broadcast();

        r.handle(Request::Remove("x".into()));
        match Operation::decode(&r.pop_broadcast().unwrap()).unwrap() {
            Operation::Remove { tags: carried, element } => {
                assert_eq!(element, "x");
                assert_eq!(carried, tags);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!r.state().contains("x"));
    }

    #[test]
    fn test_remove_absent_replies_without_broadcast() {
        let mut r = Replica::new(peer(1), ApplyMode::OnDelivery);
        r.handle(Request::Remove("nope".into()));
        assert_eq!(r.pop_reply(), Some(Reply::Remove { element: "nope".into() }));
        assert!(r.pop_broadcast().is_none());
        assert_eq!(r.stats().noop_removes, 1);
    }

    #[test]
    fn test_on_delivery_mode_waits_for_self_delivery() {
        let mut r = Replica::new(peer(1), ApplyMode::OnDelivery);
        r.handle(Request::Add("x".into()));
        assert!(r.pop_reply().is_none());
        assert!(!r.state().contains("x"));

        let op = r.pop_broadcast().unwrap();
        deliver(&mut r, peer(1), op);
        assert!(r.state().contains("x"));
        assert_eq!(r.pop_reply(), Some(Reply::Add { element: "x".into() }));
    }

    #[test]
    fn test_remote_delivery_applies_without_reply() {
        let mut r = Replica::new(peer(1), ApplyMode::OnDelivery);
        let op = Operation::Add {
            tag: AddTag::random(),
            element: "y".into(),
        };
        deliver(&mut r, peer(2), op.encode());
        assert!(r.state().contains("y"));
        assert!(r.pop_reply().is_none());
    }

    #[test]
    fn test_undecodable_delivery_is_counted() {
        let mut r = Replica::new(peer(1), ApplyMode::Optimistic);
        deliver(&mut r, peer(2), Bytes::from_static(b"\x00\x00"));
        assert_eq!(r.stats().decode_failures, 1);
        assert!(r.state().is_empty());
    }

    #[test]
    fn test_read_snapshot() {
        let mut r = Replica::new(peer(1), ApplyMode::Optimistic);
        r.handle(Request::Add("b".into()));
        r.handle(Request::Add("a".into()));
        r.pop_reply();
        r.pop_reply();
        r.handle(Request::Read);
        let Some(Reply::Read { elements }) = r.pop_reply() else {
            panic!("expected read reply");
        };
        assert_eq!(elements.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
