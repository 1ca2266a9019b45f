//! Scripted Byzantine processes
//!
//! An [`Adversary`] holds a real signing key and builds correctly signed
//! protocol messages with whatever content a test wants, such as two
//! different payloads under one id.

use bytes::Bytes;

use concord_core::{BroadcastRequest, MessageId, PeerId, VersionVector};
use concord_crypto::Identity;
use concord_wire::{Echo, Ready, Signed, SignedBroadcast, WireMessage};

pub struct Adversary {
    local: PeerId,
    identity: Identity,
}

impl Adversary {
    pub fn new(local: PeerId, identity: Identity) -> Self {
        Adversary { local, identity }
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.identity.public_key_bytes()
    }

    /// Envelope bytes naming this adversary as author
    pub fn envelope(&self, payload: &[u8]) -> Bytes {
        BroadcastRequest::new(self.local, Bytes::copy_from_slice(payload)).encode()
    }

    /// A send the adversary authored and signed
    pub fn send(&self, id: MessageId, payload: &[u8]) -> WireMessage {
        let envelope = self.envelope(payload);
        let original_signature = self.sign(&envelope);
        self.seal_send(self.local, id, envelope, original_signature)
    }

    /// A send claiming `author` wrote it; signed with the adversary's key
    pub fn forged_send(&self, author: PeerId, id: MessageId, payload: &[u8]) -> WireMessage {
        let envelope = BroadcastRequest::new(author, Bytes::copy_from_slice(payload)).encode();
        let original_signature = self.sign(&envelope);
        self.seal_send(author, id, envelope, original_signature)
    }

    /// Sends of `first` to some peers and `second` to the rest, under one id
    pub fn equivocate(
        &self,
        id: MessageId,
        first: (&[u8], &[PeerId]),
        second: (&[u8], &[PeerId]),
    ) -> Vec<(PeerId, WireMessage)> {
        let mut out = Vec::new();
        for (payload, targets) in [first, second] {
            let message = self.send(id, payload);
            for &to in targets {
                out.push((to, message.clone()));
            }
        }
        out
    }

    /// An echo of this adversary's own envelope
    pub fn echo(&self, id: MessageId, payload: &[u8]) -> WireMessage {
        let envelope = self.envelope(payload);
        let echo = Echo {
            original_sender: self.local,
            sender: self.local,
            id,
            original_signature: self.sign(&envelope),
            payload: envelope,
        };
        WireMessage::Echo(Signed::seal(echo, |bytes| self.identity.sign(bytes)))
    }

    /// A ready vouching for arbitrary envelope bytes
    pub fn ready(&self, id: MessageId, envelope: Bytes) -> WireMessage {
        let ready = Ready {
            sender: self.local,
            id,
            payload: envelope,
        };
        WireMessage::Ready(Signed::seal(ready, |bytes| self.identity.sign(bytes)))
    }

    fn sign(&self, bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(&self.identity.sign(bytes))
    }

    fn seal_send(
        &self,
        original_sender: PeerId,
        id: MessageId,
        payload: Bytes,
        original_signature: Bytes,
    ) -> WireMessage {
        let send = SignedBroadcast {
            original_sender,
            sender: self.local,
            id,
            payload,
            original_signature,
            version: VersionVector::new(),
        };
        WireMessage::SignedBroadcast(Signed::seal(send, |bytes| self.identity.sign(bytes)))
    }
}
