//! Deterministic linearization of the action graph.
//!
//! Every replica holding the same set of links computes the same total order,
//! so a deterministic reducer applied to that order yields the same state on
//! every device. Concurrency conflicts are settled by a pluggable [`Resolver`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::crypto::PublicKey;
use crate::graph::HashGraph;
use crate::hash::LinkHash;

/// The outcome of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Links whose effects must be dropped from the final sequence (for
    /// example, actions authored by a member who was concurrently removed).
    pub discarded: BTreeSet<LinkHash>,

    /// Seniority rank per author: lower is more senior. The founder is rank 0.
    /// Authors absent from the map sort after every ranked author.
    pub seniority: BTreeMap<PublicKey, u64>,
}

/// A conflict resolution policy.
///
/// `resolve` sees the graph together with a provisional total order and
/// returns which links to discard and how to rank authors. Linearization
/// re-runs the sort with the new ranking and calls `resolve` again until the
/// discarded set stops changing, so a discard in one pass can shift ordering
/// decisions in the next.
pub trait Resolver {
    fn resolve(&self, graph: &HashGraph, order: &[LinkHash]) -> Resolution;
}

/// A resolver that discards nothing and ranks no one. Ties fall back to hash
/// order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

impl Resolver for NullResolver {
    fn resolve(&self, _graph: &HashGraph, _order: &[LinkHash]) -> Resolution {
        Resolution::default()
    }
}

/// Linearize the graph into a total order of action links.
///
/// Synthetic merge links and discarded links are excluded from the result;
/// merge links still shape the partial order during the sort.
///
/// The loop is bounded by the link count. The discarded set always derives
/// from the same graph, so in the worst case the fixed point is reached when
/// every discardable link is discarded.
pub fn sequence(graph: &HashGraph, resolver: &dyn Resolver) -> Vec<LinkHash> {
    let mut resolution = Resolution::default();

    for pass in 0..=graph.len() {
        let order = topological_order(graph, &resolution.seniority);
        let next = resolver.resolve(graph, &order);
        if next.discarded == resolution.discarded && next.seniority == resolution.seniority {
            debug!(passes = pass + 1, links = order.len(), "sequence settled");
            return filtered(graph, order, &next.discarded);
        }
        resolution = next;
    }

    // Unreachable with a resolver whose discarded set is a function of the
    // graph, but terminate deterministically regardless.
    let order = topological_order(graph, &resolution.seniority);
    filtered(graph, order, &resolution.discarded)
}

fn filtered(
    graph: &HashGraph,
    order: Vec<LinkHash>,
    discarded: &BTreeSet<LinkHash>,
) -> Vec<LinkHash> {
    order
        .into_iter()
        .filter(|hash| {
            !discarded.contains(hash)
                && graph.get(hash).map(|link| !link.is_merge()).unwrap_or(false)
        })
        .collect()
}

/// Kahn's algorithm over the parent relation, emitting the ready set in
/// (author seniority, hash) order so concurrent branches interleave
/// identically on every replica.
fn topological_order(
    graph: &HashGraph,
    seniority: &BTreeMap<PublicKey, u64>,
) -> Vec<LinkHash> {
    let links = graph.links();

    let mut children: BTreeMap<LinkHash, Vec<LinkHash>> = BTreeMap::new();
    let mut indegree: BTreeMap<LinkHash, usize> = BTreeMap::new();
    for (hash, link) in links {
        indegree.entry(*hash).or_insert(0);
        for parent in &link.body.parents {
            if links.contains_key(parent) {
                children.entry(*parent).or_default().push(*hash);
                *indegree.entry(*hash).or_insert(0) += 1;
            }
        }
    }

    let rank = |hash: &LinkHash| -> (u64, LinkHash) {
        let author = &links[hash].body.author;
        (seniority.get(author).copied().unwrap_or(u64::MAX), *hash)
    };

    let mut ready: BTreeSet<(u64, LinkHash)> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(hash, _)| rank(hash))
        .collect();

    let mut order = Vec::with_capacity(links.len());
    while let Some(&(key, hash)) = ready.iter().next() {
        ready.remove(&(key, hash));
        order.push(hash);
        if let Some(kids) = children.get(&hash) {
            for kid in kids {
                if let Some(degree) = indegree.get_mut(kid) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(rank(kid));
                    }
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use bytes::Bytes;

    fn payload(tag: &str) -> Bytes {
        Bytes::copy_from_slice(tag.as_bytes())
    }

    #[test]
    fn test_linear_chain_in_order() {
        let alice = Keypair::from_seed(&[1; 32]);
        let g0 = HashGraph::found(payload("root"), &alice, 0);
        let g1 = g0.append(payload("a"), &alice, 1);
        let g2 = g1.append(payload("b"), &alice, 2);

        let seq = sequence(&g2, &NullResolver);
        assert_eq!(seq, vec![g0.head(), g1.head(), g2.head()]);
    }

    #[test]
    fn test_merge_links_excluded() {
        let alice = Keypair::from_seed(&[1; 32]);
        let base = HashGraph::found(payload("root"), &alice, 0);
        let left = base.append(payload("a"), &alice, 1);
        let right = base.append(payload("b"), &alice, 2);
        let merged = left.merge(&right).unwrap();

        let seq = sequence(&merged, &NullResolver);
        assert_eq!(seq.len(), 3);
        assert!(!seq.contains(&merged.head()));
    }

    #[test]
    fn test_same_links_same_order() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let base = HashGraph::found(payload("root"), &alice, 0);
        let left = base.append(payload("a"), &alice, 1);
        let right = base.append(payload("b"), &bob, 2);

        let ours = left.merge(&right).unwrap();
        let theirs = right.merge(&left).unwrap();
        assert_eq!(sequence(&ours, &NullResolver), sequence(&theirs, &NullResolver));
    }

    #[test]
    fn test_causal_order_respected() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let base = HashGraph::found(payload("root"), &alice, 0);
        let branch_a = base
            .append(payload("a1"), &alice, 1)
            .append(payload("a2"), &alice, 2);
        let branch_b = base.append(payload("b1"), &bob, 3);
        let merged = branch_a.merge(&branch_b).unwrap();

        let seq = sequence(&merged, &NullResolver);
        let pos = |h: &LinkHash| seq.iter().position(|x| x == h).unwrap();
        // Parents always precede children, whatever the tie-break does.
        for hash in &seq {
            for parent in &merged.get(hash).unwrap().body.parents {
                assert!(pos(parent) < pos(hash));
            }
        }
    }

    #[test]
    fn test_seniority_orders_concurrent_links() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let base = HashGraph::found(payload("root"), &alice, 0);
        let left = base.append(payload("a"), &alice, 1);
        let right = base.append(payload("b"), &bob, 2);
        let merged = left.merge(&right).unwrap();

        struct RankAlice(PublicKey);
        impl Resolver for RankAlice {
            fn resolve(&self, _graph: &HashGraph, _order: &[LinkHash]) -> Resolution {
                let mut seniority = BTreeMap::new();
                seniority.insert(self.0, 0);
                Resolution {
                    discarded: BTreeSet::new(),
                    seniority,
                }
            }
        }

        let seq = sequence(&merged, &RankAlice(alice.public_key()));
        let pos = |h: &LinkHash| seq.iter().position(|x| x == h).unwrap();
        assert!(pos(&left.head()) < pos(&right.head()));
    }

    #[test]
    fn test_discarded_links_dropped() {
        let alice = Keypair::from_seed(&[1; 32]);
        let base = HashGraph::found(payload("root"), &alice, 0);
        let extended = base.append(payload("a"), &alice, 1);
        let target = extended.head();

        struct DropOne(LinkHash);
        impl Resolver for DropOne {
            fn resolve(&self, _graph: &HashGraph, _order: &[LinkHash]) -> Resolution {
                let mut discarded = BTreeSet::new();
                discarded.insert(self.0);
                Resolution {
                    discarded,
                    seniority: BTreeMap::new(),
                }
            }
        }

        let seq = sequence(&extended, &DropOne(target));
        assert_eq!(seq, vec![extended.root()]);
    }
}
