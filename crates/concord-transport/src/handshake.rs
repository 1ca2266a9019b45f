//! Mutual challenge-response handshake
//!
//! Both sides send a signed `Hello{peer, public_key, challenge}` at once,
//! then answer the other's challenge with a signed `ChallengeReply`.
//! A link is accepted only if:
//! - the hello is self-consistent (signed by the key it carries)
//! - the peer belongs to the static neighbor set (and is who we dialed)
//! - the key matches the pinned one, when pinned
//! - the reply signs our challenge with that same key

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use concord_core::{ConcordError, ConcordResult, PeerId};
use concord_crypto::PublicIdentity;
use concord_wire::{ChallengeReply, Hello, Signed, WireMessage};

use crate::tcp::{write_message, FramedReader};
use crate::TransportConfig;

/// A neighbor whose key has been proven
#[derive(Clone, Debug)]
pub struct AuthenticatedPeer {
    pub peer: PeerId,
    pub key: PublicIdentity,
}

fn refuse(peer: impl ToString, reason: impl Into<String>) -> ConcordError {
    ConcordError::HandshakeFailed {
        peer: peer.to_string(),
        reason: reason.into(),
    }
}

/// Our greeting for a fresh challenge
pub fn hello_for(config: &TransportConfig, challenge: u64) -> WireMessage {
    let hello = Hello {
        peer: config.local,
        public_key: config.identity.public_key_bytes(),
        challenge,
    };
    WireMessage::Hello(Signed::seal(hello, |b| config.identity.sign(b)))
}

/// Validate a received hello; returns the claimed peer, its key and its challenge
pub fn check_hello(
    config: &TransportConfig,
    expected: Option<PeerId>,
    message: WireMessage,
) -> ConcordResult<(PeerId, PublicIdentity, u64)> {
    let kind = message.kind();
    let WireMessage::Hello(signed) = message else {
        return Err(refuse(
            expected.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
            format!("expected hello, got {}", kind),
        ));
    };
    let hello = &signed.body;

    let key = PublicIdentity::from_bytes(&hello.public_key)
        .ok_or_else(|| refuse(hello.peer, "invalid public key"))?;
    key.verify(signed.signed_bytes(), &signed.signature)
        .map_err(|e| refuse(hello.peer, format!("hello signature: {}", e)))?;

    if !config.is_neighbor(hello.peer) {
        return Err(refuse(hello.peer, "not a configured neighbor"));
    }
    if let Some(expected) = expected {
        if expected != hello.peer {
            return Err(refuse(expected, format!("answered as {}", hello.peer)));
        }
    }
    if let Some(pinned) = config.trusted_keys.get(&hello.peer) {
        if pinned != &key {
            return Err(refuse(hello.peer, "key does not match the pinned key"));
        }
    }

    Ok((hello.peer, key, hello.challenge))
}

/// Our answer to the peer's challenge
pub fn reply_for(config: &TransportConfig, their_challenge: u64) -> WireMessage {
    let reply = ChallengeReply {
        peer: config.local,
        answer: Bytes::copy_from_slice(&config.identity.sign(&their_challenge.to_be_bytes())),
    };
    WireMessage::ChallengeReply(Signed::seal(reply, |b| config.identity.sign(b)))
}

/// Validate the peer's answer to our challenge
pub fn check_reply(
    peer: PeerId,
    key: &PublicIdentity,
    our_challenge: u64,
    message: WireMessage,
) -> ConcordResult<()> {
    let kind = message.kind();
    let WireMessage::ChallengeReply(signed) = message else {
        return Err(refuse(peer, format!("expected challenge reply, got {}", kind)));
    };

    if signed.body.peer != peer {
        return Err(refuse(peer, format!("reply names {}", signed.body.peer)));
    }
    key.verify(signed.signed_bytes(), &signed.signature)
        .map_err(|e| refuse(peer, format!("reply signature: {}", e)))?;
    key.verify(&our_challenge.to_be_bytes(), &signed.body.answer)
        .map_err(|e| refuse(peer, format!("challenge answer: {}", e)))?;
    Ok(())
}

async fn expect_message<R>(reader: &mut FramedReader<R>, stage: &str) -> ConcordResult<WireMessage>
where
    R: AsyncRead + Unpin,
{
    let frame = reader
        .next_frame()
        .await?
        .ok_or_else(|| refuse("unknown", format!("connection closed before {}", stage)))?;
    WireMessage::decode(frame)
}

/// Run the handshake over an established stream
pub async fn handshake<R, W>(
    config: &TransportConfig,
    expected: Option<PeerId>,
    reader: &mut FramedReader<R>,
    writer: &mut W,
) -> ConcordResult<AuthenticatedPeer>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let challenge: u64 = rand::random();
    write_message(writer, &hello_for(config, challenge)).await?;

    let (peer, key, their_challenge) =
        check_hello(config, expected, expect_message(reader, "hello").await?)?;
    debug!(peer = %peer, key = %key.fingerprint(), "hello accepted");

    write_message(writer, &reply_for(config, their_challenge)).await?;
    check_reply(peer, &key, challenge, expect_message(reader, "challenge reply").await?)?;

    Ok(AuthenticatedPeer { peer, key })
}
