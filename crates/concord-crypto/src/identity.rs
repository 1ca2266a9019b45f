//! Identity management using Ed25519

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use concord_core::{ConcordError, ConcordResult};

use crate::VerifyError;

/// Short key fingerprint for logs (first 8 bytes of SHA-256)
fn fingerprint_of(verifying_key: &VerifyingKey) -> [u8; 8] {
    let hash = Sha256::digest(verifying_key.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// Signing keypair for a peer
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    fingerprint: [u8; 8],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    pub fn generate_with<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        Self::from_signing_key(SigningKey::generate(rng))
    }

    /// Create identity from a 32-byte secret seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// Parse a hex-encoded 32-byte seed
    pub fn from_hex(seed: &str) -> ConcordResult<Self> {
        let raw = hex::decode(seed.trim())
            .map_err(|e| ConcordError::InvalidKey(format!("seed is not hex: {}", e)))?;
        let seed: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ConcordError::InvalidKey(format!("seed is {} bytes, want 32", raw.len())))?;
        Ok(Self::from_seed(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let fingerprint = fingerprint_of(&verifying_key);
        Identity {
            signing_key,
            verifying_key,
            fingerprint,
        }
    }

    /// Get the secret seed
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            verifying_key: self.verifying_key,
            fingerprint: self.fingerprint,
        }
    }

    pub fn fingerprint(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Public identity for verification only
#[derive(Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    verifying_key: VerifyingKey,
    fingerprint: [u8; 8],
}

impl PublicIdentity {
    /// Create from public key bytes; `None` if the point is invalid
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes).ok()?;
        let fingerprint = fingerprint_of(&verifying_key);
        Some(PublicIdentity {
            verifying_key,
            fingerprint,
        })
    }

    /// Parse a hex-encoded public key
    pub fn from_hex(key: &str) -> ConcordResult<Self> {
        let raw = hex::decode(key.trim())
            .map_err(|e| ConcordError::InvalidKey(format!("public key is not hex: {}", e)))?;
        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            ConcordError::InvalidKey(format!("public key is {} bytes, want 32", raw.len()))
        })?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| ConcordError::InvalidKey("not a valid ed25519 point".into()))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn fingerprint(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Verify a signature; malformed signatures are an error, not a panic
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
        let sig = Signature::from_slice(signature).map_err(|_| VerifyError::MalformedSignature)?;
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| VerifyError::BadSignature)
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_generation() {
        let id1 = Identity::generate();
        let id2 = Identity::generate();
        assert_ne!(id1.public_key_bytes(), id2.public_key_bytes());
        assert_ne!(id1.fingerprint(), id2.fingerprint());
    }

    #[test]
    fn test_sign_verify() {
        let identity = Identity::generate();
        let message = b"add x";

        let signature = identity.sign(message);
        assert!(identity.public().verify(message, &signature).is_ok());
        assert_eq!(
            identity.public().verify(b"remove x", &signature),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn test_malformed_signature() {
        let identity = Identity::generate();
        assert_eq!(
            identity.public().verify(b"m", &[0u8; 12]),
            Err(VerifyError::MalformedSignature)
        );
    }

    #[test]
    fn test_seed_roundtrip_through_hex() {
        let identity = Identity::generate();
        let restored = Identity::from_hex(&hex::encode(identity.seed_bytes())).unwrap();
        assert_eq!(identity.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_bad_seed_hex() {
        assert!(Identity::from_hex("zz").is_err());
        assert!(Identity::from_hex("abcd").is_err());
    }

    #[test]
    fn test_public_identity_hex() {
        let identity = Identity::generate();
        let public = PublicIdentity::from_hex(&identity.public().to_hex()).unwrap();
        assert_eq!(public, identity.public());
    }

    proptest! {
        #[test]
        fn prop_any_bit_flip_breaks_the_signature(
            seed in any::<[u8; 32]>(),
            message in prop::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let identity = Identity::from_seed(&seed);
            let signature = identity.sign(&message);
            prop_assert!(identity.public().verify(&message, &signature).is_ok());

            let mut tampered = message.clone();
            tampered[flip.index(message.len())] ^= 1 << bit;
            prop_assert_eq!(
                identity.public().verify(&tampered, &signature),
                Err(VerifyError::BadSignature)
            );
        }
    }
}
