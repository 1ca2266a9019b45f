//! Quorum arithmetic and per-phase witness tallies

use std::collections::HashMap;

use bytes::Bytes;

use concord_core::PeerId;

/// How the echo threshold is derived from the neighbor count
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EchoQuorum {
    /// `ceil((neighbors + 1 + f) / 2)`
    #[default]
    Standard,
    /// `ceil((neighbors + 1 + f + 1) / 2)`; any two echo quorums share an
    /// honest process even when `n > 3f + 1`
    Strict,
}

/// Byzantine broadcast parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumConfig {
    /// Assumed maximum number of Byzantine processes
    pub f: usize,
    pub echo: EchoQuorum,
}

impl QuorumConfig {
    pub fn new(f: usize) -> Self {
        QuorumConfig {
            f,
            echo: EchoQuorum::Standard,
        }
    }

    pub fn strict(f: usize) -> Self {
        QuorumConfig {
            f,
            echo: EchoQuorum::Strict,
        }
    }

    /// Matching echoes needed before sending Ready
    pub fn echo_threshold(&self, neighbors: usize) -> usize {
        let processes = neighbors + 1;
        match self.echo {
            EchoQuorum::Standard => (processes + self.f + 1) / 2,
            EchoQuorum::Strict => (processes + self.f + 2) / 2,
        }
    }

    /// Matching readies that force our own Ready
    pub fn amplify_threshold(&self) -> usize {
        self.f + 1
    }

    /// Matching readies that deliver
    pub fn delivery_threshold(&self) -> usize {
        2 * self.f + 1
    }

    /// Whether `processes` is enough to tolerate `f` faults
    pub fn tolerates(&self, processes: usize) -> bool {
        processes >= 3 * self.f + 1
    }
}

impl Default for QuorumConfig {
    fn default() -> Self {
        QuorumConfig::new(1)
    }
}

/// Outcome of recording one witness
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Witness {
    /// First statement from this sender
    Recorded,
    /// Same payload again from the same sender
    Duplicate,
    /// Sender already vouched for a different payload
    Conflict,
}

/// Distinct-sender witnesses for one message id in one phase
///
/// A sender's first payload is authoritative; later different payloads
/// from it are equivocation and never counted.
#[derive(Clone, Debug, Default)]
pub struct Tally {
    witnesses: HashMap<PeerId, Bytes>,
}

impl Tally {
    pub fn new() -> Self {
        Tally::default()
    }

    pub fn record(&mut self, sender: PeerId, payload: &Bytes) -> Witness {
        match self.witnesses.get(&sender) {
            Some(existing) if existing == payload => Witness::Duplicate,
            Some(_) => Witness::Conflict,
            None => {
                self.witnesses.insert(sender, payload.clone());
                Witness::Recorded
            }
        }
    }

    /// Number of distinct senders vouching for `payload`
    pub fn count(&self, payload: &[u8]) -> usize {
        self.witnesses
            .values()
            .filter(|p| p.as_ref() == payload)
            .count()
    }
}
