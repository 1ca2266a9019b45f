//! Version vectors for causal ordering

use std::collections::HashMap;

use crate::PeerId;

/// Version vector - per-peer delivery counters
///
/// Counters are 32-bit because that is their width on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionVector {
    clocks: HashMap<PeerId, u32>,
}

impl VersionVector {
    pub fn new() -> Self {
        VersionVector {
            clocks: HashMap::new(),
        }
    }

    /// Get the counter for a peer (zero when absent)
    #[inline]
    pub fn get(&self, peer: PeerId) -> u32 {
        self.clocks.get(&peer).copied().unwrap_or(0)
    }

    #[inline]
    pub fn contains(&self, peer: PeerId) -> bool {
        self.clocks.contains_key(&peer)
    }

    /// Increment the counter for a peer, returning the new value
    pub fn increment(&mut self, peer: PeerId) -> u32 {
        let clock = self.clocks.entry(peer).or_insert(0);
        *clock = clock.saturating_add(1);
        *clock
    }

    /// Set the counter for a peer
    pub fn set(&mut self, peer: PeerId, value: u32) {
        self.clocks.insert(peer, value);
    }

    /// Drop a peer's entry entirely
    pub fn remove(&mut self, peer: PeerId) -> Option<u32> {
        self.clocks.remove(&peer)
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, u32)> + '_ {
        self.clocks.iter().map(|(&p, &c)| (p, c))
    }

    /// Check if self happens-before other
    pub fn happens_before(&self, other: &VersionVector) -> bool {
        if self == other {
            return false;
        }

        let mut strictly_less = false;

        for (peer, &clock) in &self.clocks {
            let other_clock = other.get(*peer);
            if clock > other_clock {
                return false;
            }
            if clock < other_clock {
                strictly_less = true;
            }
        }

        for (peer, &clock) in &other.clocks {
            if !self.clocks.contains_key(peer) && clock > 0 {
                strictly_less = true;
            }
        }

        strictly_less
    }

    /// Compact representation for the wire, sorted by peer
    pub fn to_compact(&self) -> Vec<(PeerId, u32)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_unstable_by_key(|(peer, _)| *peer);
        entries
    }

    /// Restore from compact representation
    pub fn from_compact(entries: Vec<(PeerId, u32)>) -> Self {
        VersionVector {
            clocks: entries.into_iter().collect(),
        }
    }
}

impl FromIterator<(PeerId, u32)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (PeerId, u32)>>(iter: I) -> Self {
        VersionVector {
            clocks: iter.into_iter().collect(),
        }
    }
}
