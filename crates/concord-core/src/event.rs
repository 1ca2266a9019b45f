//! Events exchanged between membership, broadcast and the replica layer

use bytes::{Bytes, BytesMut};

use crate::codec::{get_len_bytes, get_peer, put_len_bytes, put_peer};
use crate::{ConcordError, ConcordResult, MessageId, PeerId};

/// Startup signal for the crash-fault broadcast
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelAvailable {
    pub channel_id: u16,
    /// The local process
    pub local: PeerId,
}

/// A neighbor finished its handshake
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighborUp {
    pub peer: PeerId,
    /// Ed25519 public key proven during the handshake
    pub public_key: Option<[u8; 32]>,
}

/// A neighbor's connection was lost
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborDown {
    pub peer: PeerId,
}

/// Delivery notification handed to the upper layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub id: MessageId,
    pub payload: Bytes,
    pub original_sender: PeerId,
}

/// Envelope carried as the payload of every broadcast
///
/// Layout: `sender | len | payload`. The original sender's signature in
/// the Byzantine variant covers exactly these bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastRequest {
    pub sender: PeerId,
    pub payload: Bytes,
}

impl BroadcastRequest {
    pub fn new(sender: PeerId, payload: Bytes) -> Self {
        BroadcastRequest { sender, payload }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PeerId::ENCODED_LEN + 4 + self.payload.len());
        put_peer(&mut buf, self.sender);
        put_len_bytes(&mut buf, &self.payload);
        buf.freeze()
    }

    pub fn decode(bytes: &Bytes) -> ConcordResult<Self> {
        let mut buf = bytes.clone();
        let sender = get_peer(&mut buf)?;
        let payload = get_len_bytes(&mut buf)?;
        if !buf.is_empty() {
            return Err(ConcordError::InvalidWireFormat(format!(
                "{} trailing bytes after broadcast request",
                buf.len()
            )));
        }
        Ok(BroadcastRequest { sender, payload })
    }

    /// Turn a decoded envelope into the notification for `id`
    pub fn into_delivered(self, id: MessageId) -> Delivered {
        Delivered {
            id,
            payload: self.payload,
            original_sender: self.sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let req = BroadcastRequest::new(PeerId::localhost(6000), Bytes::from_static(b"op"));
        let bytes = req.encode();
        assert_eq!(&bytes[..6], &[127, 0, 0, 1, 0x17, 0x70]);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 2]);
        assert_eq!(BroadcastRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn test_request_rejects_trailing_bytes() {
        let req = BroadcastRequest::new(PeerId::localhost(1), Bytes::new());
        let mut raw = BytesMut::from(&req.encode()[..]);
        raw.extend_from_slice(&[0]);
        assert!(BroadcastRequest::decode(&raw.freeze()).is_err());
    }

    #[test]
    fn test_into_delivered_keeps_author() {
        let author = PeerId::localhost(7);
        let id = MessageId::random();
        let delivered = BroadcastRequest::new(author, Bytes::from_static(b"x")).into_delivered(id);
        assert_eq!(delivered.original_sender, author);
        assert_eq!(delivered.id, id);
        assert_eq!(&delivered.payload[..], b"x");
    }
}
