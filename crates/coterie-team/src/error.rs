//! Error types for the team module.

use thiserror::Error;

/// Errors that can occur while interpreting a graph as a team.
#[derive(Debug, Error)]
pub enum TeamError {
    /// The graph's root link does not carry a Found action.
    #[error("root link does not found a team")]
    NotATeam,

    /// An action payload could not be decoded.
    #[error("malformed action payload: {0}")]
    MalformedAction(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The named member is not on the team.
    #[error("unknown member: {0}")]
    UnknownMember(String),

    /// The named invitation does not exist.
    #[error("unknown invitation: {0}")]
    UnknownInvitation(String),

    /// The invitation was revoked or already used.
    #[error("invitation no longer valid: {0}")]
    InvitationSpent(String),

    /// Graph error.
    #[error("graph error: {0}")]
    Graph(#[from] coterie_core::GraphError),
}

/// Result type for team operations.
pub type Result<T> = std::result::Result<T, TeamError>;
