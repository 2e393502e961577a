//! # Coterie Sync
//!
//! Incremental reconciliation of two replicas' action graphs.
//!
//! The protocol is expressed as two pure functions, [`generate_message`] and
//! [`receive_message`], over per-peer [`SyncState`]. No I/O happens here; the
//! connection layer ferries [`SyncPayload`]s and installs merged graphs.
//!
//! While branches are divergent each side advertises a [`TruncatedHashFilter`]
//! summarizing its link set; once one side holds the other's head, the
//! remaining links are computed exactly from ancestry and no filter is needed.

pub mod engine;
pub mod error;
pub mod filter;
pub mod messages;
pub mod state;

pub use engine::{generate_message, receive_message};
pub use error::SyncError;
pub use filter::{TruncatedHashFilter, DEFAULT_RESOLUTION};
pub use messages::SyncPayload;
pub use state::{SyncConfig, SyncState};
