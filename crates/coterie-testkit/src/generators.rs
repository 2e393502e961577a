//! Proptest generators for property-based testing.

use proptest::prelude::*;

use coterie_core::{HashGraph, Keypair, LinkHash, PublicKey};
use coterie_team::{Member, TeamAction};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a random link hash.
pub fn link_hash() -> impl Strategy<Value = LinkHash> {
    any::<[u8; 32]>().prop_map(LinkHash::from_bytes)
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_700_000_000_000i64
}

fn role_action(tag: usize) -> bytes::Bytes {
    TeamAction::AddRole {
        role: format!("role-{tag}"),
    }
    .to_bytes()
    .expect("role action encodes")
}

/// A founded graph extended with `appends` role actions by derived authors.
///
/// Every author is added as a member of nothing in particular; these graphs
/// exercise the graph algebra, not the team reducer.
pub fn founded_graph(seed: [u8; 32], appends: &[(u8, i64)]) -> HashGraph {
    let founder = Keypair::from_seed(&seed);
    let payload = TeamAction::Found {
        team_name: "generated".into(),
        founder: Member::new(founder.public_key(), "founder"),
    }
    .to_bytes()
    .expect("found action encodes");

    let mut graph = HashGraph::found(payload, &founder, 0);
    for (i, (author_byte, ts)) in appends.iter().enumerate() {
        let mut author_seed = seed;
        author_seed[0] ^= *author_byte;
        let author = Keypair::from_seed(&author_seed);
        graph = graph.append(role_action(i), &author, *ts);
    }
    graph
}

/// Generate a small graph grown linearly from one root.
pub fn graph(max_links: usize) -> impl Strategy<Value = HashGraph> {
    (
        any::<[u8; 32]>(),
        prop::collection::vec((any::<u8>(), timestamp()), 0..=max_links),
    )
        .prop_map(|(seed, appends)| founded_graph(seed, &appends))
}

/// Generate two graphs sharing a root, each extended with its own branch.
pub fn divergent_pair(max_each: usize) -> impl Strategy<Value = (HashGraph, HashGraph)> {
    (
        any::<[u8; 32]>(),
        prop::collection::vec((any::<u8>(), timestamp()), 0..=max_each),
        prop::collection::vec((any::<u8>(), timestamp()), 0..=max_each),
    )
        .prop_map(|(seed, left, right)| {
            let base = founded_graph(seed, &[]);
            (grow(&base, seed, 0, &left), grow(&base, seed, 100, &right))
        })
}

/// Generate three divergent branches over a common root.
pub fn divergent_trio(
    max_each: usize,
) -> impl Strategy<Value = (HashGraph, HashGraph, HashGraph)> {
    (
        any::<[u8; 32]>(),
        prop::collection::vec((any::<u8>(), timestamp()), 0..=max_each),
        prop::collection::vec((any::<u8>(), timestamp()), 0..=max_each),
        prop::collection::vec((any::<u8>(), timestamp()), 0..=max_each),
    )
        .prop_map(|(seed, a, b, c)| {
            let base = founded_graph(seed, &[]);
            (
                grow(&base, seed, 0, &a),
                grow(&base, seed, 100, &b),
                grow(&base, seed, 200, &c),
            )
        })
}

fn grow(base: &HashGraph, seed: [u8; 32], tag_offset: usize, appends: &[(u8, i64)]) -> HashGraph {
    let mut graph = base.clone();
    for (i, (author_byte, ts)) in appends.iter().enumerate() {
        let mut author_seed = seed;
        author_seed[0] ^= *author_byte;
        let author = Keypair::from_seed(&author_seed);
        graph = graph.append(role_action(tag_offset + i), &author, *ts);
    }
    graph
}
