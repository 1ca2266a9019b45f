//! Public-key directory keyed by peer

use std::collections::HashMap;

use thiserror::Error;

use concord_core::PeerId;

use crate::PublicIdentity;

/// Why a signature was not accepted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no public key known for {0}")]
    UnknownSigner(PeerId),

    #[error("signature is malformed")]
    MalformedSignature,

    #[error("signature does not match")]
    BadSignature,
}

/// Peer -> public key, populated from neighbor-up events
#[derive(Clone, Debug, Default)]
pub struct KeyDirectory {
    keys: HashMap<PeerId, PublicIdentity>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        KeyDirectory::default()
    }

    /// Register a key, returning the one it replaced
    pub fn insert(&mut self, peer: PeerId, key: PublicIdentity) -> Option<PublicIdentity> {
        self.keys.insert(peer, key)
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<PublicIdentity> {
        self.keys.remove(&peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&PublicIdentity> {
        self.keys.get(&peer)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.keys.contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify `signature` over `message` with `signer`'s registered key
    pub fn verify(&self, signer: PeerId, message: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
        self.keys
            .get(&signer)
            .ok_or(VerifyError::UnknownSigner(signer))?
            .verify(message, signature)
    }
}
