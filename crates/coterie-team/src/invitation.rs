//! Seed-based invitations.
//!
//! A member mints a random seed and shares it with the invitee out of band.
//! Both sides derive the same Ed25519 keypair from the seed, so the team only
//! ever records the derived *public* key; whoever holds the seed can later
//! prove they were invited by signing with the derived secret key. The seed
//! itself never touches the graph or the wire.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use coterie_core::{Keypair, PublicKey, SignatureBytes};

/// Domain separation for deriving the invitation keypair from a seed.
const KEYPAIR_CONTEXT: &str = "coterie invitation keypair v0";

/// Prefix for the proof signature message.
const PROOF_PREFIX: &[u8] = b"coterie invitation proof v0";

/// A 16-byte invitation identifier: truncated Blake3 of the derived public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvitationId(pub [u8; 16]);

impl InvitationId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Derive the id from the invitation's public key.
    pub fn derive(public_key: &PublicKey) -> Self {
        let digest = blake3::hash(public_key.as_bytes());
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest.as_bytes()[..16]);
        Self(id)
    }
}

impl fmt::Debug for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvitationId({})", self.to_hex())
    }
}

impl fmt::Display for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The random secret shared out of band with the invitee.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvitationSeed(pub [u8; 16]);

impl InvitationSeed {
    /// Mint a fresh random seed.
    pub fn generate() -> Self {
        let bytes = coterie_core::random_bytes();
        let mut seed = [0u8; 16];
        seed.copy_from_slice(&bytes[..16]);
        Self(seed)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The Ed25519 keypair deterministically derived from this seed.
    pub fn keypair(&self) -> Keypair {
        let derived = blake3::derive_key(KEYPAIR_CONTEXT, &self.0);
        Keypair::from_seed(&derived)
    }

    /// The record to post on the team graph. Contains no secret material.
    pub fn record(&self) -> InvitationRecord {
        let public_key = self.keypair().public_key();
        InvitationRecord {
            id: InvitationId::derive(&public_key),
            public_key,
        }
    }
}

impl fmt::Debug for InvitationSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvitationSeed(..)")
    }
}

/// The public half of an invitation, posted to the graph by a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationRecord {
    pub id: InvitationId,
    pub public_key: PublicKey,
}

/// Proof of invitation, presented by the invitee at connection time.
///
/// The signature covers the invitation id together with the member key the
/// invitee claims, so a captured proof cannot be replayed to admit a
/// different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationProof {
    pub id: InvitationId,
    pub signature: SignatureBytes,
}

fn proof_message(id: &InvitationId, member_key: &PublicKey) -> Vec<u8> {
    let mut message = Vec::with_capacity(PROOF_PREFIX.len() + 16 + 32);
    message.extend_from_slice(PROOF_PREFIX);
    message.extend_from_slice(id.as_bytes());
    message.extend_from_slice(member_key.as_bytes());
    message
}

/// Generate a proof binding the seed to the invitee's member key.
pub fn generate_proof(seed: &InvitationSeed, member_key: &PublicKey) -> InvitationProof {
    let keypair = seed.keypair();
    let id = InvitationId::derive(&keypair.public_key());
    let signature = keypair.sign(&proof_message(&id, member_key));
    InvitationProof { id, signature }
}

/// Check a proof against the posted record and the claimed member key.
pub fn validate_proof(
    proof: &InvitationProof,
    record: &InvitationRecord,
    member_key: &PublicKey,
) -> bool {
    proof.id == record.id
        && record
            .public_key
            .verify(&proof_message(&proof.id, member_key), &proof.signature)
}

/// Memoizing wrapper around [`generate_proof`].
///
/// Proof generation derives a keypair and signs; callers that retry a
/// connection present the same proof repeatedly, so cache by input.
#[derive(Debug, Default)]
pub struct ProofCache {
    cache: HashMap<([u8; 16], PublicKey), InvitationProof>,
}

impl ProofCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proof(&mut self, seed: &InvitationSeed, member_key: &PublicKey) -> InvitationProof {
        *self
            .cache
            .entry((seed.0, *member_key))
            .or_insert_with(|| generate_proof(seed, member_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_proof_agree() {
        let seed = InvitationSeed::generate();
        let record = seed.record();
        let member = Keypair::generate().public_key();

        let proof = generate_proof(&seed, &member);
        assert_eq!(proof.id, record.id);
        assert!(validate_proof(&proof, &record, &member));
    }

    #[test]
    fn test_proof_bound_to_member_key() {
        let seed = InvitationSeed::generate();
        let record = seed.record();
        let member = Keypair::generate().public_key();
        let other = Keypair::generate().public_key();

        let proof = generate_proof(&seed, &member);
        assert!(!validate_proof(&proof, &record, &other));
    }

    #[test]
    fn test_wrong_seed_rejected() {
        let seed = InvitationSeed::generate();
        let record = seed.record();
        let member = Keypair::generate().public_key();

        let forged = generate_proof(&InvitationSeed::generate(), &member);
        assert!(!validate_proof(&forged, &record, &member));
    }

    #[test]
    fn test_derivation_deterministic() {
        let seed = InvitationSeed::from_bytes([7; 16]);
        assert_eq!(seed.record(), seed.record());
        assert_eq!(seed.keypair().public_key(), seed.keypair().public_key());
    }

    #[test]
    fn test_cache_returns_same_proof() {
        let seed = InvitationSeed::from_bytes([7; 16]);
        let member = Keypair::from_seed(&[1; 32]).public_key();
        let mut cache = ProofCache::new();
        let first = cache.proof(&seed, &member);
        let second = cache.proof(&seed, &member);
        assert_eq!(first, second);
    }
}
