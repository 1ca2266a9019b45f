//! Wire messages for the broadcast layer and the membership handshake

use bytes::{BufMut, Bytes, BytesMut};

use concord_core::codec::{
    get_len_bytes, get_message_id, get_peer, get_u16, get_u64, get_version_vector,
    put_len_bytes, put_message_id, put_peer, put_version_vector,
};
use concord_core::{ConcordError, ConcordResult, MessageId, PeerId, VersionVector};

/// Handshake greeting
pub const HELLO: u16 = 202;
/// Handshake challenge answer
pub const CHALLENGE_REPLY: u16 = 204;
/// Causal broadcast (unsigned)
pub const BROADCAST: u16 = 302;
/// Byzantine broadcast send phase
pub const SIGNED_BROADCAST: u16 = 303;
/// Byzantine echo phase
pub const ECHO: u16 = 304;
/// Byzantine ready phase
pub const READY: u16 = 305;

/// A message body with a fixed type tag and a body codec
pub trait WireBody: Sized {
    const MESSAGE_TYPE: u16;

    fn encode_body(&self, buf: &mut BytesMut);

    fn decode_body(buf: &mut Bytes) -> ConcordResult<Self>;
}

/// Causal broadcast, tagged with the author's version vector
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broadcast {
    /// Author of the message (never rewritten on relay)
    pub sender: PeerId,
    pub id: MessageId,
    pub payload: Bytes,
    pub version: VersionVector,
}

impl WireBody for Broadcast {
    const MESSAGE_TYPE: u16 = BROADCAST;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_peer(buf, self.sender);
        put_message_id(buf, self.id);
        put_len_bytes(buf, &self.payload);
        put_version_vector(buf, &self.version);
    }

    fn decode_body(buf: &mut Bytes) -> ConcordResult<Self> {
        Ok(Broadcast {
            sender: get_peer(buf)?,
            id: get_message_id(buf)?,
            payload: get_len_bytes(buf)?,
            version: get_version_vector(buf)?,
        })
    }
}

/// Byzantine send phase: the author's signed payload, relayed by `sender`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedBroadcast {
    pub original_sender: PeerId,
    pub sender: PeerId,
    pub id: MessageId,
    pub payload: Bytes,
    pub original_signature: Bytes,
    /// Unused by the quorum protocol; kept so the layout matches the causal one
    pub version: VersionVector,
}

impl WireBody for SignedBroadcast {
    const MESSAGE_TYPE: u16 = SIGNED_BROADCAST;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_peer(buf, self.original_sender);
        put_peer(buf, self.sender);
        put_message_id(buf, self.id);
        put_len_bytes(buf, &self.payload);
        put_len_bytes(buf, &self.original_signature);
        put_version_vector(buf, &self.version);
    }

    fn decode_body(buf: &mut Bytes) -> ConcordResult<Self> {
        Ok(SignedBroadcast {
            original_sender: get_peer(buf)?,
            sender: get_peer(buf)?,
            id: get_message_id(buf)?,
            payload: get_len_bytes(buf)?,
            original_signature: get_len_bytes(buf)?,
            version: get_version_vector(buf)?,
        })
    }
}

/// Byzantine echo phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Echo {
    pub original_sender: PeerId,
    pub sender: PeerId,
    pub id: MessageId,
    pub payload: Bytes,
    pub original_signature: Bytes,
}

impl WireBody for Echo {
    const MESSAGE_TYPE: u16 = ECHO;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_peer(buf, self.original_sender);
        put_peer(buf, self.sender);
        put_message_id(buf, self.id);
        put_len_bytes(buf, &self.payload);
        put_len_bytes(buf, &self.original_signature);
    }

    fn decode_body(buf: &mut Bytes) -> ConcordResult<Self> {
        Ok(Echo {
            original_sender: get_peer(buf)?,
            sender: get_peer(buf)?,
            id: get_message_id(buf)?,
            payload: get_len_bytes(buf)?,
            original_signature: get_len_bytes(buf)?,
        })
    }
}

/// Byzantine ready phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ready {
    pub sender: PeerId,
    pub id: MessageId,
    pub payload: Bytes,
}

impl WireBody for Ready {
    const MESSAGE_TYPE: u16 = READY;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_peer(buf, self.sender);
        put_message_id(buf, self.id);
        put_len_bytes(buf, &self.payload);
    }

    fn decode_body(buf: &mut Bytes) -> ConcordResult<Self> {
        Ok(Ready {
            sender: get_peer(buf)?,
            id: get_message_id(buf)?,
            payload: get_len_bytes(buf)?,
        })
    }
}

/// Handshake greeting: who I am, my key, and a challenge for you
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    pub peer: PeerId,
    pub public_key: [u8; 32],
    pub challenge: u64,
}

impl WireBody for Hello {
    const MESSAGE_TYPE: u16 = HELLO;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_peer(buf, self.peer);
        put_len_bytes(buf, &self.public_key);
        buf.put_u64(self.challenge);
    }

    fn decode_body(buf: &mut Bytes) -> ConcordResult<Self> {
        let peer = get_peer(buf)?;
        let key = get_len_bytes(buf)?;
        let public_key: [u8; 32] = key[..].try_into().map_err(|_| {
            ConcordError::InvalidWireFormat(format!("public key is {} bytes", key.len()))
        })?;
        Ok(Hello {
            peer,
            public_key,
            challenge: get_u64(buf)?,
        })
    }
}

/// Handshake answer: signature over the peer's challenge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeReply {
    pub peer: PeerId,
    pub answer: Bytes,
}

impl WireBody for ChallengeReply {
    const MESSAGE_TYPE: u16 = CHALLENGE_REPLY;

    fn encode_body(&self, buf: &mut BytesMut) {
        put_peer(buf, self.peer);
        put_len_bytes(buf, &self.answer);
    }

    fn decode_body(buf: &mut Bytes) -> ConcordResult<Self> {
        Ok(ChallengeReply {
            peer: get_peer(buf)?,
            answer: get_len_bytes(buf)?,
        })
    }
}

/// A body together with a signature over its exact encoding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signed<T> {
    pub body: T,
    body_bytes: Bytes,
    pub signature: Bytes,
}

impl<T: WireBody> Signed<T> {
    /// Encode the body and sign the encoding
    pub fn seal<F, S>(body: T, sign: F) -> Self
    where
        F: FnOnce(&[u8]) -> S,
        S: AsRef<[u8]>,
    {
        let mut buf = BytesMut::new();
        body.encode_body(&mut buf);
        let body_bytes = buf.freeze();
        let signature = Bytes::copy_from_slice(sign(&body_bytes).as_ref());
        Signed {
            body,
            body_bytes,
            signature,
        }
    }

    /// Attach an arbitrary signature without signing
    pub fn with_signature(body: T, signature: Bytes) -> Self {
        let mut buf = BytesMut::new();
        body.encode_body(&mut buf);
        Signed {
            body,
            body_bytes: buf.freeze(),
            signature,
        }
    }

    /// The bytes the signature covers
    pub fn signed_bytes(&self) -> &Bytes {
        &self.body_bytes
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.body_bytes);
        put_len_bytes(buf, &self.signature);
    }

    fn decode(buf: &mut Bytes) -> ConcordResult<Self> {
        let start = buf.clone();
        let body = T::decode_body(buf)?;
        let consumed = start.len() - buf.len();
        let body_bytes = start.slice(..consumed);
        let signature = get_len_bytes(buf)?;
        Ok(Signed {
            body,
            body_bytes,
            signature,
        })
    }
}

/// Every message that travels between peers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    Hello(Signed<Hello>),
    ChallengeReply(Signed<ChallengeReply>),
    Broadcast(Broadcast),
    SignedBroadcast(Signed<SignedBroadcast>),
    Echo(Signed<Echo>),
    Ready(Signed<Ready>),
}

impl WireMessage {
    pub fn message_type(&self) -> u16 {
        match self {
            WireMessage::Hello(_) => HELLO,
            WireMessage::ChallengeReply(_) => CHALLENGE_REPLY,
            WireMessage::Broadcast(_) => BROADCAST,
            WireMessage::SignedBroadcast(_) => SIGNED_BROADCAST,
            WireMessage::Echo(_) => ECHO,
            WireMessage::Ready(_) => READY,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello(_) => "hello",
            WireMessage::ChallengeReply(_) => "challenge-reply",
            WireMessage::Broadcast(_) => "broadcast",
            WireMessage::SignedBroadcast(_) => "signed-broadcast",
            WireMessage::Echo(_) => "echo",
            WireMessage::Ready(_) => "ready",
        }
    }

    /// Broadcast identifier, for the broadcast-layer messages
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            WireMessage::Broadcast(m) => Some(m.id),
            WireMessage::SignedBroadcast(m) => Some(m.body.id),
            WireMessage::Echo(m) => Some(m.body.id),
            WireMessage::Ready(m) => Some(m.body.id),
            WireMessage::Hello(_) | WireMessage::ChallengeReply(_) => None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u16(self.message_type());
        match self {
            WireMessage::Hello(m) => m.encode(buf),
            WireMessage::ChallengeReply(m) => m.encode(buf),
            WireMessage::Broadcast(m) => m.encode_body(buf),
            WireMessage::SignedBroadcast(m) => m.encode(buf),
            WireMessage::Echo(m) => m.encode(buf),
            WireMessage::Ready(m) => m.encode(buf),
        }
    }

    /// Decode one complete message; trailing bytes are an error
    pub fn decode(bytes: Bytes) -> ConcordResult<Self> {
        let mut buf = bytes;
        let message_type = get_u16(&mut buf)?;
        let message = match message_type {
            HELLO => WireMessage::Hello(Signed::decode(&mut buf)?),
            CHALLENGE_REPLY => WireMessage::ChallengeReply(Signed::decode(&mut buf)?),
            BROADCAST => WireMessage::Broadcast(Broadcast::decode_body(&mut buf)?),
            SIGNED_BROADCAST => WireMessage::SignedBroadcast(Signed::decode(&mut buf)?),
            ECHO => WireMessage::Echo(Signed::decode(&mut buf)?),
            READY => WireMessage::Ready(Signed::decode(&mut buf)?),
            other => return Err(ConcordError::UnknownMessageType(other)),
        };

        if !buf.is_empty() {
            return Err(ConcordError::InvalidWireFormat(format!(
                "{} trailing bytes after {}",
                buf.len(),
                message.kind()
            )));
        }
        Ok(message)
    }
}
