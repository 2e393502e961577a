//! Conflict resolution for concurrent membership changes.
//!
//! The rules, applied during linearization:
//!
//! - An action by a removed member is discarded when it is concurrent with or
//!   causally after the (surviving) removal.
//! - Two members who concurrently remove each other: the founder wins if
//!   involved, otherwise the more senior member (earlier join) wins, and the
//!   loser's removal is discarded.
//! - The same precedence settles mutual concurrent role revocations. Circular
//!   revocation chains among three or more members reduce to the pairwise rule
//!   applied to a fixed point.
//! - A removal or demotion authored by a non-member carries no authority and
//!   discards nothing (the reducer ignores such actions too).
//! - A concurrent re-add of a removed member does not resurrect them (the
//!   reducer ignores adds for removed ids; see `state`).

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use coterie_core::{HashGraph, LinkHash, PublicKey, Resolution, Resolver};

use crate::action::TeamAction;

/// A removal or demotion found in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Strike {
    link: LinkHash,
    author: PublicKey,
    target: PublicKey,
    kind: StrikeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrikeKind {
    Removal,
    Demotion,
}

/// The team's conflict resolution policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamResolver;

impl Resolver for TeamResolver {
    fn resolve(&self, graph: &HashGraph, order: &[LinkHash]) -> Resolution {
        let actions = decode_actions(graph, order);
        let founder = actions.iter().find_map(|(_, _, action)| match action {
            TeamAction::Found { founder, .. } => Some(founder.id),
            _ => None,
        });

        // Seniority over the provisional order; refined as the discarded set
        // grows, so a join recorded by a discarded action confers nothing.
        let mut seniority = seniority_over(&actions, &BTreeSet::new());

        let strikes: Vec<Strike> = actions
            .iter()
            .filter_map(|(hash, author, action)| match action {
                TeamAction::RemoveMember { id } => Some(Strike {
                    link: *hash,
                    author: *author,
                    target: *id,
                    kind: StrikeKind::Removal,
                }),
                TeamAction::RevokeRole { id, .. } => Some(Strike {
                    link: *hash,
                    author: *author,
                    target: *id,
                    kind: StrikeKind::Demotion,
                }),
                _ => None,
            })
            .collect();

        let mut discarded: BTreeSet<LinkHash> = BTreeSet::new();
        for _ in 0..=graph.len() {
            let next = resolve_pass(graph, &strikes, &discarded, founder, &seniority);
            if next == discarded {
                break;
            }
            discarded = next;
            seniority = seniority_over(&actions, &discarded);
        }

        if !discarded.is_empty() {
            debug!(count = discarded.len(), "links discarded by resolution");
        }

        Resolution {
            discarded,
            seniority,
        }
    }
}

/// One round: settle mutual strikes among still-live links, then discard
/// everything a surviving removal invalidates. Discards are monotone across
/// rounds; the fixed point is the first round that adds nothing.
fn resolve_pass(
    graph: &HashGraph,
    strikes: &[Strike],
    discarded: &BTreeSet<LinkHash>,
    founder: Option<PublicKey>,
    seniority: &BTreeMap<PublicKey, u64>,
) -> BTreeSet<LinkHash> {
    let mut next = discarded.clone();
    // Only a member's strike carries authority; the reducer ignores a
    // non-member's removal, so the resolver must too.
    let live: Vec<&Strike> = strikes
        .iter()
        .filter(|s| !discarded.contains(&s.link) && seniority.contains_key(&s.author))
        .collect();

    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            let mutual = a.kind == b.kind && a.target == b.author && b.target == a.author;
            if !mutual || !concurrent(graph, &a.link, &b.link) {
                continue;
            }
            let a_wins = precedes(&a.author, &b.author, founder, seniority);
            let loser = if a_wins { b } else { a };
            next.insert(loser.link);
        }
    }

    // A surviving removal takes down the target's concurrent and subsequent
    // actions, the winner's own removal excepted.
    for strike in &live {
        if strike.kind != StrikeKind::Removal || next.contains(&strike.link) {
            continue;
        }
        for (hash, link) in graph.links() {
            if link.body.author != strike.target || *hash == strike.link {
                continue;
            }
            if !graph.is_ancestor(hash, &strike.link) {
                next.insert(*hash);
            }
        }
    }

    next
}

fn decode_actions(
    graph: &HashGraph,
    order: &[LinkHash],
) -> Vec<(LinkHash, PublicKey, TeamAction)> {
    order
        .iter()
        .filter_map(|hash| {
            let link = graph.get(hash)?;
            let payload = link.body.payload.as_ref()?;
            let action = TeamAction::from_bytes(payload).ok()?;
            Some((*hash, link.body.author, action))
        })
        .collect()
}

/// Join-order seniority: founder 0, then each added or admitted member in the
/// order their join action appears.
fn seniority_over(
    actions: &[(LinkHash, PublicKey, TeamAction)],
    discarded: &BTreeSet<LinkHash>,
) -> BTreeMap<PublicKey, u64> {
    let mut seniority = BTreeMap::new();
    let mut next = 0u64;
    let mut join = |id: PublicKey, map: &mut BTreeMap<PublicKey, u64>| {
        if !map.contains_key(&id) {
            map.insert(id, next);
            next += 1;
        }
    };
    for (hash, _, action) in actions {
        if discarded.contains(hash) {
            continue;
        }
        match action {
            TeamAction::Found { founder, .. } => join(founder.id, &mut seniority),
            TeamAction::AddMember { member } | TeamAction::AdmitMember { member, .. } => {
                join(member.id, &mut seniority)
            }
            _ => {}
        }
    }
    seniority
}

fn concurrent(graph: &HashGraph, a: &LinkHash, b: &LinkHash) -> bool {
    !graph.is_ancestor(a, b) && !graph.is_ancestor(b, a)
}

/// Whether `a` outranks `b`: founder first, then earlier join, then key order
/// as a last resort.
fn precedes(
    a: &PublicKey,
    b: &PublicKey,
    founder: Option<PublicKey>,
    seniority: &BTreeMap<PublicKey, u64>,
) -> bool {
    if founder == Some(*a) {
        return true;
    }
    if founder == Some(*b) {
        return false;
    }
    let rank_a = seniority.get(a).copied().unwrap_or(u64::MAX);
    let rank_b = seniority.get(b).copied().unwrap_or(u64::MAX);
    (rank_a, a) < (rank_b, b)
}
