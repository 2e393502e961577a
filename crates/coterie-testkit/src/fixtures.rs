//! Test fixtures and helpers.
//!
//! Common setup code for multi-party team scenarios.

use bytes::Bytes;

use coterie_core::{HashGraph, Keypair, PublicKey};
use coterie_team::{Member, TeamAction, TeamState};

/// A founded team with deterministic keypairs and a growing graph.
pub struct TeamFixture {
    pub founder: Keypair,
    pub members: Vec<Keypair>,
    pub graph: HashGraph,
    clock: i64,
}

impl TeamFixture {
    /// Found a team and add `member_count` members, all from fixed seeds.
    pub fn new(member_count: usize) -> Self {
        let founder = Keypair::from_seed(&seed_for(0));
        let graph = HashGraph::found(
            encode(&TeamAction::Found {
                team_name: "fixture".into(),
                founder: Member::new(founder.public_key(), "member-0"),
            }),
            &founder,
            0,
        );

        let mut fixture = Self {
            founder,
            members: Vec::new(),
            graph,
            clock: 0,
        };
        for i in 1..=member_count {
            let keypair = Keypair::from_seed(&seed_for(i as u8));
            fixture.append_as_founder(&TeamAction::AddMember {
                member: Member::new(keypair.public_key(), format!("member-{i}")),
            });
            fixture.members.push(keypair);
        }
        fixture
    }

    /// The keypair for member `i`; index 0 is the founder.
    pub fn keypair(&self, i: usize) -> &Keypair {
        if i == 0 {
            &self.founder
        } else {
            &self.members[i - 1]
        }
    }

    pub fn public_key(&self, i: usize) -> PublicKey {
        self.keypair(i).public_key()
    }

    /// Append an action signed by the founder.
    pub fn append_as_founder(&mut self, action: &TeamAction) {
        self.append_as(0, action);
    }

    /// Append an action signed by member `i`.
    pub fn append_as(&mut self, i: usize, action: &TeamAction) {
        self.clock += 10;
        self.graph = self
            .graph
            .append(encode(action), self.keypair(i), self.clock);
    }

    /// A branch off the current graph: member `i` appends `action` without
    /// advancing the fixture's own graph.
    pub fn branch(&self, i: usize, action: &TeamAction) -> HashGraph {
        self.graph
            .append(encode(action), self.keypair(i), self.clock + 5)
    }

    /// Reduce the current graph to team state.
    pub fn state(&self) -> TeamState {
        TeamState::from_graph(&self.graph).expect("fixture graph reduces")
    }
}

/// Deterministic keypairs for multi-party tests.
pub fn multi_party_keypairs(count: usize) -> Vec<Keypair> {
    (0..count)
        .map(|i| Keypair::from_seed(&seed_for(i as u8)))
        .collect()
}

fn seed_for(i: u8) -> [u8; 32] {
    let mut seed = [0x51u8; 32];
    seed[0] = i;
    seed
}

fn encode(action: &TeamAction) -> Bytes {
    action.to_bytes().expect("fixture action encodes")
}
