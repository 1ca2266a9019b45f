//! Concord Crypto - Signing identities and key lookup
//!
//! Provides:
//! - Ed25519 signing identities and their public halves
//! - A directory from peer to public key, filled at neighbor-up time
//! - The secure startup event that hands a broadcast layer its key

pub mod directory;
pub mod identity;

pub use directory::*;
pub use identity::*;

use concord_core::PeerId;

/// Startup signal for the Byzantine broadcast; grants the signing key
#[derive(Clone, Debug)]
pub struct SecureChannelAvailable {
    pub channel_id: u16,
    pub local: PeerId,
    pub identity: Identity,
}
