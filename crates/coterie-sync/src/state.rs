//! Per-peer sync bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use coterie_core::{Link, LinkHash};

/// Tunables for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Prefix width for the advertised hash filter, in bytes.
    pub filter_resolution: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            filter_resolution: crate::filter::DEFAULT_RESOLUTION,
        }
    }
}

/// Everything we know about one peer's copy of the graph.
///
/// Created fresh per connection; all fields start empty. The engine functions
/// in [`engine`](crate::engine) are the only writers.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// The most recent head of theirs that we have fully incorporated.
    /// Convergence is `last_common_head == Some(our current head)`.
    pub last_common_head: Option<LinkHash>,

    /// The head we last announced to them.
    pub our_head: Option<LinkHash>,

    /// Their head as last announced to us.
    pub their_head: Option<LinkHash>,

    /// Hashes we know we are missing (dangling parents, unseen heads).
    pub our_need: BTreeSet<LinkHash>,

    /// Hashes they asked for, or that their filter proved they lack.
    pub their_need: BTreeSet<LinkHash>,

    /// Every hash we have transmitted. Never re-sent.
    pub we_have_sent: BTreeSet<LinkHash>,

    /// Every hash they have transmitted to us.
    pub they_have_sent: BTreeSet<LinkHash>,

    /// Received links that cannot be merged yet because a parent is missing.
    pub pending_links: BTreeMap<LinkHash, Link>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }
}
