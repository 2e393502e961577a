//! Team action payloads.
//!
//! Actions are the opaque payloads carried by graph links. They are encoded
//! with CBOR; the bytes an author produced are what gets signed and hashed,
//! so re-encoding on other replicas never has to reproduce them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use coterie_core::PublicKey;

use crate::error::{Result, TeamError};
use crate::invitation::{InvitationId, InvitationRecord};

/// A person (or device) on the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The member's signing key, which is also their identity.
    pub id: PublicKey,

    /// Display name. Informational only, never used for resolution.
    pub name: String,
}

impl Member {
    pub fn new(id: PublicKey, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// One change to team state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamAction {
    /// Establish the team. Only valid as the root link's payload.
    Found { team_name: String, founder: Member },

    /// Add a member directly (author vouches for the key).
    AddMember { member: Member },

    /// Remove a member from the team.
    RemoveMember { id: PublicKey },

    /// Define a role.
    AddRole { role: String },

    /// Delete a role and all its assignments.
    RemoveRole { role: String },

    /// Give a member a role.
    AssignRole { id: PublicKey, role: String },

    /// Take a role away from a member.
    RevokeRole { id: PublicKey, role: String },

    /// Publish an invitation's public record.
    PostInvitation { invitation: InvitationRecord },

    /// Withdraw an invitation before it is used.
    RevokeInvitation { id: InvitationId },

    /// Admit an invitee who presented a valid proof.
    AdmitMember {
        member: Member,
        invitation_id: InvitationId,
    },
}

impl TeamAction {
    /// Encode to CBOR payload bytes.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| TeamError::SerializationError(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| TeamError::MalformedAction(e.to_string()))
    }
}
