//! # coterie
//!
//! Decentralized team membership over a signed, hash-linked action graph.
//!
//! ## Overview
//!
//! A team is a conflict-free replicated value: every change is a signed link
//! in a hash-linked graph, divergent branches merge without coordination, and
//! a deterministic resolver settles conflicting membership changes the same
//! way on every replica.
//!
//! - **Graph**: append-only links, each signed by its author and naming its
//!   parents by hash.
//! - **Team**: membership, roles, and invitations reduced from the resolved
//!   link order.
//! - **Sync**: incremental reconciliation that converges two replicas with a
//!   handful of messages.
//! - **Protocol**: mutual authentication, invitation admission, and an
//!   encrypted session, as a sans-I/O state machine.
//!
//! ## Usage
//!
//! ```rust
//! use coterie::{Replica, core::Keypair};
//! use coterie::team::{Member, TeamAction};
//!
//! let alice = Keypair::generate();
//! let replica = Replica::create_team(alice, "alice", "ops").unwrap();
//!
//! let bob = Keypair::generate();
//! replica
//!     .append_action(&TeamAction::AddMember {
//!         member: Member::new(bob.public_key(), "bob"),
//!     })
//!     .unwrap();
//!
//! assert!(replica.team_state().unwrap().is_member(&bob.public_key()));
//! ```
//!
//! ## Re-exports
//!
//! - `coterie::core` - the graph CRDT (links, merge, linearization)
//! - `coterie::team` - team actions, resolver, reducer, invitations
//! - `coterie::sync` - reconciliation engine and truncated-hash filter
//! - `coterie::proto` - the peer connection protocol

pub mod error;
pub mod replica;
pub mod transport;

// Re-export component crates
pub use coterie_core as core;
pub use coterie_proto as proto;
pub use coterie_sync as sync;
pub use coterie_team as team;

// Re-export main types for convenience
pub use error::{ReplicaError, Result};
pub use replica::{now_millis, Replica, ReplicaConnection};
pub use transport::Transport;

// Commonly used component types
pub use coterie_core::{HashGraph, Keypair, LinkHash, PublicKey};
pub use coterie_proto::{ConnectionConfig, ConnectionEffect, ConnectionEvent, Envelope};
pub use coterie_team::{InvitationSeed, Member, TeamAction, TeamState};
