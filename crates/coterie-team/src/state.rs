//! Team state, computed by replaying the resolved action sequence.
//!
//! State is derived, never stored: every replica recomputes it from the graph
//! after each merge. Determinism of the linearization makes the result
//! identical everywhere.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use coterie_core::{sequence, HashGraph, PublicKey};

use crate::action::{Member, TeamAction};
use crate::error::{Result, TeamError};
use crate::invitation::{InvitationId, InvitationRecord};
use crate::resolver::TeamResolver;

/// The built-in administrative role.
pub const ADMIN_ROLE: &str = "admin";

/// A member's entry in the derived state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub member: Member,
    /// Join order: founder 0, then increasing.
    pub seniority: u64,
    pub roles: BTreeSet<String>,
}

/// Lifecycle of a posted invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationStatus {
    pub record: InvitationRecord,
    pub revoked: bool,
    pub used: bool,
}

impl InvitationStatus {
    /// Whether a proof against this invitation should still be accepted.
    pub fn is_open(&self) -> bool {
        !self.revoked && !self.used
    }
}

/// Derived team state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamState {
    team_name: String,
    founder: PublicKey,
    members: BTreeMap<PublicKey, MemberInfo>,
    removed: BTreeSet<PublicKey>,
    roles: BTreeSet<String>,
    invitations: BTreeMap<InvitationId, InvitationStatus>,
    next_seniority: u64,
}

impl TeamState {
    /// Linearize the graph with the team resolver and replay it.
    pub fn from_graph(graph: &HashGraph) -> Result<Self> {
        let order = sequence(graph, &TeamResolver);

        let mut iter = order.iter();
        let root = iter.next().ok_or(TeamError::NotATeam)?;
        let root_link = graph.get(root).ok_or(TeamError::NotATeam)?;
        let payload = root_link.body.payload.as_ref().ok_or(TeamError::NotATeam)?;
        let (team_name, founder) = match TeamAction::from_bytes(payload)? {
            TeamAction::Found { team_name, founder } => (team_name, founder),
            _ => return Err(TeamError::NotATeam),
        };

        let mut state = Self {
            team_name,
            founder: founder.id,
            members: BTreeMap::new(),
            removed: BTreeSet::new(),
            roles: BTreeSet::new(),
            invitations: BTreeMap::new(),
            next_seniority: 0,
        };
        state.roles.insert(ADMIN_ROLE.to_string());
        state.join(founder, &[ADMIN_ROLE.to_string()]);

        for hash in iter {
            let Some(link) = graph.get(hash) else { continue };
            let Some(payload) = link.body.payload.as_ref() else {
                continue;
            };
            match TeamAction::from_bytes(payload) {
                Ok(action) => state.apply(&link.body.author, action),
                Err(e) => {
                    warn!(link = %hash, error = %e, "skipping undecodable action");
                }
            }
        }
        Ok(state)
    }

    fn join(&mut self, member: Member, roles: &[String]) {
        let seniority = self.next_seniority;
        self.next_seniority += 1;
        self.members.insert(
            member.id,
            MemberInfo {
                member,
                seniority,
                roles: roles.iter().cloned().collect(),
            },
        );
    }

    /// Apply one surviving action. Actions that violate the rules are ignored
    /// with a warning rather than failing the whole replay: a malicious or
    /// buggy peer must not be able to wedge everyone's state computation.
    fn apply(&mut self, author: &PublicKey, action: TeamAction) {
        if !self.members.contains_key(author) {
            warn!(author = %author, "ignoring action by non-member");
            return;
        }
        match action {
            TeamAction::Found { .. } => {
                warn!(author = %author, "ignoring duplicate found action");
            }
            TeamAction::AddMember { member } => {
                // A re-add never resurrects a removed member.
                if self.removed.contains(&member.id) || self.members.contains_key(&member.id) {
                    return;
                }
                self.join(member, &[]);
            }
            TeamAction::RemoveMember { id } => {
                if self.members.remove(&id).is_some() {
                    self.removed.insert(id);
                }
            }
            TeamAction::AddRole { role } => {
                self.roles.insert(role);
            }
            TeamAction::RemoveRole { role } => {
                if role == ADMIN_ROLE {
                    warn!(author = %author, "ignoring removal of the admin role");
                    return;
                }
                self.roles.remove(&role);
                for info in self.members.values_mut() {
                    info.roles.remove(&role);
                }
            }
            TeamAction::AssignRole { id, role } => {
                if !self.roles.contains(&role) {
                    return;
                }
                if let Some(info) = self.members.get_mut(&id) {
                    info.roles.insert(role);
                }
            }
            TeamAction::RevokeRole { id, role } => {
                if let Some(info) = self.members.get_mut(&id) {
                    info.roles.remove(&role);
                }
            }
            TeamAction::PostInvitation { invitation } => {
                self.invitations
                    .entry(invitation.id)
                    .or_insert(InvitationStatus {
                        record: invitation,
                        revoked: false,
                        used: false,
                    });
            }
            TeamAction::RevokeInvitation { id } => {
                if let Some(status) = self.invitations.get_mut(&id) {
                    status.revoked = true;
                }
            }
            TeamAction::AdmitMember {
                member,
                invitation_id,
            } => {
                let Some(status) = self.invitations.get_mut(&invitation_id) else {
                    warn!(invitation = %invitation_id, "admit against unknown invitation");
                    return;
                };
                if !status.is_open() {
                    warn!(invitation = %invitation_id, "admit against spent invitation");
                    return;
                }
                status.used = true;
                if self.removed.contains(&member.id) || self.members.contains_key(&member.id) {
                    return;
                }
                self.join(member, &[]);
            }
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn team_name(&self) -> &str {
        &self.team_name
    }

    pub fn founder(&self) -> PublicKey {
        self.founder
    }

    pub fn is_member(&self, id: &PublicKey) -> bool {
        self.members.contains_key(id)
    }

    pub fn was_removed(&self, id: &PublicKey) -> bool {
        self.removed.contains(id)
    }

    pub fn has_role(&self, id: &PublicKey, role: &str) -> bool {
        self.members
            .get(id)
            .map(|info| info.roles.contains(role))
            .unwrap_or(false)
    }

    pub fn is_admin(&self, id: &PublicKey) -> bool {
        self.has_role(id, ADMIN_ROLE)
    }

    pub fn seniority(&self, id: &PublicKey) -> Option<u64> {
        self.members.get(id).map(|info| info.seniority)
    }

    pub fn member(&self, id: &PublicKey) -> Option<&MemberInfo> {
        self.members.get(id)
    }

    /// All current members in key order.
    pub fn members(&self) -> impl Iterator<Item = &MemberInfo> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn roles(&self) -> impl Iterator<Item = &String> {
        self.roles.iter()
    }

    pub fn invitation(&self, id: &InvitationId) -> Option<&InvitationStatus> {
        self.invitations.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invitation::InvitationSeed;
    use bytes::Bytes;
    use coterie_core::Keypair;

    fn act(action: &TeamAction) -> Bytes {
        action.to_bytes().unwrap()
    }

    fn founded(founder: &Keypair) -> HashGraph {
        HashGraph::found(
            act(&TeamAction::Found {
                team_name: "ops".into(),
                founder: Member::new(founder.public_key(), "alice"),
            }),
            founder,
            0,
        )
    }

    #[test]
    fn test_founder_is_admin() {
        let alice = Keypair::from_seed(&[1; 32]);
        let state = TeamState::from_graph(&founded(&alice)).unwrap();

        assert_eq!(state.team_name(), "ops");
        assert_eq!(state.founder(), alice.public_key());
        assert!(state.is_member(&alice.public_key()));
        assert!(state.is_admin(&alice.public_key()));
        assert_eq!(state.seniority(&alice.public_key()), Some(0));
    }

    #[test]
    fn test_add_and_remove_member() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let graph = founded(&alice).append(
            act(&TeamAction::AddMember {
                member: Member::new(bob.public_key(), "bob"),
            }),
            &alice,
            1,
        );

        let state = TeamState::from_graph(&graph).unwrap();
        assert!(state.is_member(&bob.public_key()));
        assert_eq!(state.seniority(&bob.public_key()), Some(1));

        let graph = graph.append(
            act(&TeamAction::RemoveMember {
                id: bob.public_key(),
            }),
            &alice,
            2,
        );
        let state = TeamState::from_graph(&graph).unwrap();
        assert!(!state.is_member(&bob.public_key()));
        assert!(state.was_removed(&bob.public_key()));
    }

    #[test]
    fn test_readd_does_not_resurrect() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let base = founded(&alice).append(
            act(&TeamAction::AddMember {
                member: Member::new(bob.public_key(), "bob"),
            }),
            &alice,
            1,
        );

        // Removal and re-add on divergent branches.
        let removing = base.append(
            act(&TeamAction::RemoveMember {
                id: bob.public_key(),
            }),
            &alice,
            2,
        );
        let readding = base.append(
            act(&TeamAction::AddMember {
                member: Member::new(bob.public_key(), "bob"),
            }),
            &alice,
            3,
        );
        let merged = removing.merge(&readding).unwrap();

        let state = TeamState::from_graph(&merged).unwrap();
        assert!(!state.is_member(&bob.public_key()));
    }

    #[test]
    fn test_roles() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let graph = founded(&alice)
            .append(
                act(&TeamAction::AddMember {
                    member: Member::new(bob.public_key(), "bob"),
                }),
                &alice,
                1,
            )
            .append(
                act(&TeamAction::AddRole {
                    role: "ops".into(),
                }),
                &alice,
                2,
            )
            .append(
                act(&TeamAction::AssignRole {
                    id: bob.public_key(),
                    role: "ops".into(),
                }),
                &alice,
                3,
            );

        let state = TeamState::from_graph(&graph).unwrap();
        assert!(state.has_role(&bob.public_key(), "ops"));
        assert!(!state.is_admin(&bob.public_key()));

        let graph = graph.append(
            act(&TeamAction::RemoveRole {
                role: "ops".into(),
            }),
            &alice,
            4,
        );
        let state = TeamState::from_graph(&graph).unwrap();
        assert!(!state.has_role(&bob.public_key(), "ops"));
    }

    #[test]
    fn test_nonmember_actions_ignored() {
        let alice = Keypair::from_seed(&[1; 32]);
        let mallory = Keypair::from_seed(&[9; 32]);
        let graph = founded(&alice).append(
            act(&TeamAction::AddMember {
                member: Member::new(mallory.public_key(), "mallory"),
            }),
            &mallory,
            1,
        );

        let state = TeamState::from_graph(&graph).unwrap();
        assert!(!state.is_member(&mallory.public_key()));
    }

    #[test]
    fn test_invitation_lifecycle() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let seed = InvitationSeed::from_bytes([5; 16]);
        let record = seed.record();

        let graph = founded(&alice).append(
            act(&TeamAction::PostInvitation { invitation: record }),
            &alice,
            1,
        );
        let state = TeamState::from_graph(&graph).unwrap();
        assert!(state.invitation(&record.id).unwrap().is_open());

        let graph = graph.append(
            act(&TeamAction::AdmitMember {
                member: Member::new(bob.public_key(), "bob"),
                invitation_id: record.id,
            }),
            &alice,
            2,
        );
        let state = TeamState::from_graph(&graph).unwrap();
        assert!(state.is_member(&bob.public_key()));
        assert!(!state.invitation(&record.id).unwrap().is_open());
    }

    #[test]
    fn test_revoked_invitation_rejects_admit() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let record = InvitationSeed::from_bytes([5; 16]).record();

        let graph = founded(&alice)
            .append(
                act(&TeamAction::PostInvitation { invitation: record }),
                &alice,
                1,
            )
            .append(act(&TeamAction::RevokeInvitation { id: record.id }), &alice, 2)
            .append(
                act(&TeamAction::AdmitMember {
                    member: Member::new(bob.public_key(), "bob"),
                    invitation_id: record.id,
                }),
                &alice,
                3,
            );

        let state = TeamState::from_graph(&graph).unwrap();
        assert!(!state.is_member(&bob.public_key()));
    }

    #[test]
    fn test_same_links_same_state() {
        let alice = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let carol = Keypair::from_seed(&[3; 32]);
        let base = founded(&alice).append(
            act(&TeamAction::AddMember {
                member: Member::new(bob.public_key(), "bob"),
            }),
            &alice,
            1,
        );

        let left = base.append(
            act(&TeamAction::AddMember {
                member: Member::new(carol.public_key(), "carol"),
            }),
            &alice,
            2,
        );
        let right = base.append(
            act(&TeamAction::AddRole {
                role: "ops".into(),
            }),
            &bob,
            2,
        );

        let s1 = TeamState::from_graph(&left.merge(&right).unwrap()).unwrap();
        let s2 = TeamState::from_graph(&right.merge(&left).unwrap()).unwrap();
        assert_eq!(s1, s2);
    }
}
