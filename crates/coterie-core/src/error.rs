//! Error types for coterie-core.

use thiserror::Error;

use crate::hash::LinkHash;

/// Errors from graph construction and (de)serialization.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graphs have different roots: ours {ours}, theirs {theirs}")]
    RootMismatch { ours: LinkHash, theirs: LinkHash },

    #[error("link {0} not present in graph")]
    MissingLink(LinkHash),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Structural and cryptographic validation failures.
///
/// Validation short-circuits: the first violation found is returned and the
/// graph must be rejected outright, never partially applied.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("link key {claimed} does not match recomputed hash {actual}")]
    HashMismatch { claimed: LinkHash, actual: LinkHash },

    #[error("signature verification failed for link {0}")]
    SignatureFailed(LinkHash),

    #[error("link {link} references missing parent {parent}")]
    MissingParent { link: LinkHash, parent: LinkHash },

    #[error("graph has no parentless root link")]
    NoRoot,

    #[error("graph has multiple parentless links")]
    MultipleRoots(Vec<LinkHash>),

    #[error("declared root {declared} is not the parentless link {actual}")]
    RootInconsistent { declared: LinkHash, actual: LinkHash },

    #[error("declared head {0} not present in graph")]
    HeadMissing(LinkHash),

    #[error("cycle detected at link {0}")]
    CycleDetected(LinkHash),

    #[error("malformed merge link {0}")]
    MalformedMergeLink(LinkHash),

    #[error("link {0} is not reachable from the head")]
    OrphanLink(LinkHash),
}

/// Result type for graph operations.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;
