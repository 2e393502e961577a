//! Session cryptography.
//!
//! Each connection mints a fresh X25519 key and a random 32-byte session
//! seed. Seeds cross the wire encrypted under the Diffie-Hellman shared key;
//! the session key is then derived from both seeds sorted, so either side
//! computes the same key regardless of which seed arrived first.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{ProtocolError, Result};

/// Domain separation for the seed-transport key.
const SEED_TRANSPORT_CONTEXT: &str = "coterie seed transport v0";

/// Domain separation for the session key.
const SESSION_KEY_CONTEXT: &str = "coterie session key v0";

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

/// A per-connection X25519 secret.
pub struct X25519Secret(StaticSecret);

impl X25519Secret {
    /// Generate a fresh secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(*PublicKey::from(&self.0).as_bytes())
    }

    /// Key agreement with the peer's connection key, yielding the key used to
    /// seal session seeds in both directions.
    pub fn seed_transport_key(&self, peer: &X25519PublicKey) -> EncryptionKey {
        let shared = self.0.diffie_hellman(&peer.to_dalek());
        let mut hasher = blake3::Hasher::new_derive_key(SEED_TRANSPORT_CONTEXT);
        hasher.update(shared.as_bytes());
        EncryptionKey(*hasher.finalize().as_bytes())
    }
}

impl std::fmt::Debug for X25519Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X25519Secret(..)")
    }
}

/// A random per-connection seed contributed by one side.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionSeed(pub [u8; 32]);

impl SessionSeed {
    pub fn generate() -> Self {
        Self(coterie_core::random_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SessionSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionSeed(..)")
    }
}

/// Derive the symmetric session key from both sides' seeds.
///
/// The seeds are sorted before hashing, so `session_key(a, b)` equals
/// `session_key(b, a)`.
pub fn session_key(ours: &SessionSeed, theirs: &SessionSeed) -> EncryptionKey {
    let (lo, hi) = if ours.0 <= theirs.0 {
        (&ours.0, &theirs.0)
    } else {
        (&theirs.0, &ours.0)
    };
    let mut hasher = blake3::Hasher::new_derive_key(SESSION_KEY_CONTEXT);
    hasher.update(lo);
    hasher.update(hi);
    EncryptionKey(*hasher.finalize().as_bytes())
}

/// A 256-bit ChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &EncryptionNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| ProtocolError::Encryption(e.to_string()))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey(..)")
    }
}

/// A 96-bit ChaCha20-Poly1305 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionNonce(pub [u8; 12]);

impl EncryptionNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }
}
