//! Error types for the unified API.

use thiserror::Error;

/// Errors surfaced by a [`crate::Replica`] and its connections.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The replica has no graph yet (an invitee before admission).
    #[error("replica has not joined a team yet")]
    NoTeam,

    /// The transport failed to move an envelope.
    #[error("transport error: {0}")]
    Transport(String),

    /// Team error.
    #[error("team error: {0}")]
    Team(#[from] coterie_team::TeamError),

    /// Graph error.
    #[error("graph error: {0}")]
    Graph(#[from] coterie_core::GraphError),

    /// A loaded graph failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] coterie_core::ValidationError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] coterie_proto::ProtocolError),
}

/// Result type for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;
