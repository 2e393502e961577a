//! Error types for the peer protocol.

use thiserror::Error;

/// Errors that can occur while running a connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Both sides presented invitations; no one can vouch for the team.
    #[error("neither peer is a team member")]
    NeitherIsMember,

    /// The presented invitation proof did not check out.
    #[error("invitation proof rejected")]
    InvalidProof,

    /// The admitting peer delivered a graph that does not contain our
    /// invitation.
    #[error("delivered graph is not the team we were invited to")]
    WrongTeam,

    /// The peer failed to prove control of the claimed member key.
    #[error("identity challenge failed")]
    IdentityChallengeFailed,

    /// An awaited message did not arrive in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The peer is no longer on the team.
    #[error("peer was removed from the team")]
    PeerRemoved,

    /// The peer reported a protocol failure.
    #[error("peer reported an error: {0}")]
    RemoteError(String),

    /// A message arrived that the current state cannot accept.
    #[error("unexpected {message} message while {state}")]
    UnexpectedMessage { state: String, message: String },

    /// Session encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A resend was requested for an index we never sent.
    #[error("resend requested for never-sent index {0}")]
    NeverSent(u64),

    /// Team error.
    #[error("team error: {0}")]
    Team(#[from] coterie_team::TeamError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] coterie_sync::SyncError),

    /// Graph error.
    #[error("graph error: {0}")]
    Graph(#[from] coterie_core::GraphError),

    /// A received graph failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] coterie_core::ValidationError),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
