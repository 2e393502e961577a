//! Pure reconciliation logic.
//!
//! `generate_message` and `receive_message` never touch the network; the
//! caller (the connection layer) moves payloads between peers and installs
//! merged graphs. Driving the pair in alternation converges two replicas in a
//! bounded number of rounds.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use coterie_core::{validate, HashGraph, Link, LinkHash};

use crate::error::{Result, SyncError};
use crate::filter::TruncatedHashFilter;
use crate::messages::SyncPayload;
use crate::state::{SyncConfig, SyncState};

/// Produce the next message for the peer, or `None` once converged.
///
/// Converged means we have incorporated their latest head, it equals ours,
/// and we have announced that head to them.
pub fn generate_message(
    graph: &HashGraph,
    state: &mut SyncState,
    config: &SyncConfig,
) -> Option<SyncPayload> {
    let head = graph.head();
    if state.last_common_head == Some(head) && state.our_head == Some(head) {
        return None;
    }

    let mut links = Vec::new();
    let mut encoded_filter = None;

    match state.their_head {
        Some(their_head) if graph.contains(&their_head) => {
            // Their history is a prefix of ours: everything outside their
            // head's ancestry is provably missing on their side.
            let mut theirs = graph.ancestors(&their_head);
            theirs.insert(their_head);
            for (hash, link) in graph.links() {
                if !theirs.contains(hash)
                    && !state.we_have_sent.contains(hash)
                    && !state.they_have_sent.contains(hash)
                {
                    state.we_have_sent.insert(*hash);
                    links.push(link.clone());
                }
            }
            state.their_need.clear();
        }
        _ => {
            // Divergent or unknown: advertise a filter so they can work out
            // what we lack, and answer any explicit requests.
            let filter =
                TruncatedHashFilter::from_hashes(config.filter_resolution, graph.hashes());
            encoded_filter = Some(filter.save());

            let requested: Vec<LinkHash> = state.their_need.iter().copied().collect();
            state.their_need.clear();
            for hash in requested {
                if state.we_have_sent.contains(&hash) {
                    continue;
                }
                if let Some(link) = graph.get(&hash) {
                    state.we_have_sent.insert(hash);
                    links.push(link.clone());
                } else {
                    warn!(%hash, "peer requested a link we do not have");
                }
            }
        }
    }

    state.our_head = Some(head);
    debug!(
        %head,
        links = links.len(),
        need = state.our_need.len(),
        filtered = encoded_filter.is_some(),
        "sync message generated"
    );
    Some(SyncPayload {
        root: graph.root(),
        head,
        links,
        need: state.our_need.iter().copied().collect(),
        encoded_filter,
    })
}

/// Absorb a message from the peer.
///
/// Returns the merged graph when the received links complete a coherent
/// extension, `None` when nothing changed (or links are still pending). The
/// caller must install the returned graph before generating the next message.
pub fn receive_message(
    graph: &HashGraph,
    state: &mut SyncState,
    message: SyncPayload,
    _config: &SyncConfig,
) -> Result<Option<HashGraph>> {
    if message.root != graph.root() {
        return Err(SyncError::RootMismatch {
            ours: graph.root(),
            theirs: message.root,
        });
    }

    state.their_head = Some(message.head);

    for link in message.links {
        let hash = link.hash();
        state.they_have_sent.insert(hash);
        state.our_need.remove(&hash);
        if !graph.contains(&hash) {
            state.pending_links.insert(hash, link);
        }
    }

    if let Some(bytes) = &message.encoded_filter {
        let filter = TruncatedHashFilter::load(bytes)?;
        for hash in graph.hashes() {
            // The advertised head and the shared root are on hand by
            // definition, whatever the filter claims.
            if *hash == message.root || *hash == message.head {
                continue;
            }
            if !filter.has(hash)
                && !state.we_have_sent.contains(hash)
                && !state.they_have_sent.contains(hash)
            {
                state.their_need.insert(*hash);
            }
        }
    }
    state.their_need.extend(message.need.iter().copied());

    if !graph.contains(&message.head) && !state.pending_links.contains_key(&message.head) {
        state.our_need.insert(message.head);
        return Ok(None);
    }

    // Their head is on hand. Merge once every pending link's parents resolve.
    let mut missing = BTreeSet::new();
    for link in state.pending_links.values() {
        for parent in &link.body.parents {
            if !graph.contains(parent) && !state.pending_links.contains_key(parent) {
                missing.insert(*parent);
            }
        }
    }
    if !missing.is_empty() {
        debug!(count = missing.len(), "pending links await parents");
        state.our_need.extend(missing);
        return Ok(None);
    }

    let their_graph = assemble(graph, &state.pending_links, message.root, message.head)?;
    if !state.pending_links.is_empty() {
        validate(&their_graph)?;
    }
    state.pending_links.clear();

    let merged = graph.merge(&their_graph)?;
    state.last_common_head = Some(message.head);
    if merged == *graph {
        return Ok(None);
    }
    debug!(head = %merged.head(), links = merged.len(), "graph advanced by sync");
    Ok(Some(merged))
}

/// Build the peer's graph: the closure of their head over our links plus the
/// pending ones.
fn assemble(
    graph: &HashGraph,
    pending: &BTreeMap<LinkHash, Link>,
    root: LinkHash,
    head: LinkHash,
) -> Result<HashGraph> {
    let lookup = |hash: &LinkHash| -> Option<&Link> {
        graph.get(hash).or_else(|| pending.get(hash))
    };

    let mut links = BTreeMap::new();
    let mut stack = vec![head];
    while let Some(hash) = stack.pop() {
        if links.contains_key(&hash) {
            continue;
        }
        let link = lookup(&hash)
            .ok_or(coterie_core::GraphError::MissingLink(hash))?
            .clone();
        stack.extend(link.body.parents.iter().copied());
        links.insert(hash, link);
    }
    Ok(HashGraph::from_parts(root, head, links))
}
