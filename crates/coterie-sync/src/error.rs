//! Error types for sync.

use thiserror::Error;

use coterie_core::LinkHash;

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer is syncing a different graph entirely. Fatal.
    #[error("peer graph has different root: ours {ours}, theirs {theirs}")]
    RootMismatch { ours: LinkHash, theirs: LinkHash },

    /// A received filter could not be decoded.
    #[error("malformed hash filter: {0}")]
    MalformedFilter(String),

    /// A received message violated the protocol.
    #[error("invalid sync message: {0}")]
    InvalidMessage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Graph error.
    #[error("graph error: {0}")]
    Graph(#[from] coterie_core::GraphError),

    /// A received graph failed validation.
    #[error("received graph failed validation: {0}")]
    Validation(#[from] coterie_core::ValidationError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
