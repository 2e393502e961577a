//! # Coterie Team
//!
//! Team membership semantics on top of the action graph: action payloads, the
//! state reducer, the conflict resolution policy, and seed-based invitations.
//!
//! ## Key Types
//!
//! - [`TeamAction`] - The payload vocabulary (add/remove members, roles,
//!   invitations)
//! - [`TeamState`] - Derived state, recomputed from the graph after each merge
//! - [`TeamResolver`] - Settles concurrent removals and demotions
//! - [`InvitationSeed`] / [`InvitationProof`] - Out-of-band invitation scheme

pub mod action;
pub mod error;
pub mod invitation;
pub mod resolver;
pub mod state;

pub use action::{Member, TeamAction};
pub use error::TeamError;
pub use invitation::{
    generate_proof, validate_proof, InvitationId, InvitationProof, InvitationRecord,
    InvitationSeed, ProofCache,
};
pub use resolver::TeamResolver;
pub use state::{InvitationStatus, MemberInfo, TeamState, ADMIN_ROLE};
