//! Wire messages and envelopes.

use serde::{Deserialize, Serialize};

use coterie_core::{PublicKey, SignatureBytes};
use coterie_sync::SyncPayload;
use coterie_team::InvitationProof;

use crate::crypto::{EncryptionNonce, X25519PublicKey};
use crate::error::{ProtocolError, Result};

/// Envelope index reserved for control messages that bypass ordered delivery
/// (resend requests must not queue behind the very gap they are reporting).
pub const CONTROL_INDEX: u64 = u64::MAX;

/// Who the sender claims to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    /// The member key the sender will be challenged to prove.
    pub member_id: PublicKey,

    /// Display name, recorded on admission.
    pub name: String,
}

/// Everything that crosses the wire between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Opening message from each side.
    Hello {
        identity_claim: Option<IdentityClaim>,
        proof: Option<InvitationProof>,
        encryption_key: X25519PublicKey,
    },

    /// Prove you control the claimed member key: sign this.
    ChallengeIdentity { challenge: [u8; 32] },

    /// The signed challenge response.
    ProveIdentity { signature: SignatureBytes },

    /// The peer's identity checked out.
    AcceptIdentity,

    /// Admission: the full serialized team graph for a proven invitee.
    AcceptInvitation { serialized_graph: Vec<u8> },

    /// This side's session seed, sealed under the seed-transport key.
    Seed {
        encrypted_seed: Vec<u8>,
        nonce: EncryptionNonce,
    },

    /// One round of graph reconciliation.
    Sync { payload: SyncPayload },

    /// A local change made while connected, pushed eagerly.
    LocalUpdate { payload: SyncPayload },

    /// Application data under the session key.
    EncryptedMessage {
        nonce: EncryptionNonce,
        ciphertext: Vec<u8>,
    },

    /// Ask the peer to retransmit a lost envelope. Control message.
    RequestResend { index: u64 },

    /// Fatal protocol failure, reported before disconnecting.
    Error { message: String },

    /// Orderly shutdown.
    Disconnect,
}

impl WireMessage {
    /// Short name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::ChallengeIdentity { .. } => "challenge-identity",
            WireMessage::ProveIdentity { .. } => "prove-identity",
            WireMessage::AcceptIdentity => "accept-identity",
            WireMessage::AcceptInvitation { .. } => "accept-invitation",
            WireMessage::Seed { .. } => "seed",
            WireMessage::Sync { .. } => "sync",
            WireMessage::LocalUpdate { .. } => "local-update",
            WireMessage::EncryptedMessage { .. } => "encrypted-message",
            WireMessage::RequestResend { .. } => "request-resend",
            WireMessage::Error { .. } => "error",
            WireMessage::Disconnect => "disconnect",
        }
    }
}

/// An indexed wire message. Indexes are strictly increasing per direction,
/// except [`CONTROL_INDEX`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub index: u64,
    pub message: WireMessage,
}

impl Envelope {
    pub fn control(message: WireMessage) -> Self {
        Self {
            index: CONTROL_INDEX,
            message,
        }
    }

    pub fn is_control(&self) -> bool {
        self.index == CONTROL_INDEX
    }

    /// Encode to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}
