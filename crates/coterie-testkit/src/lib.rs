//! # Coterie Testkit
//!
//! Testing utilities for coterie.
//!
//! ## Overview
//!
//! - **Generators**: proptest strategies for keypairs and graphs, including
//!   divergent branches over a shared root.
//! - **Fixtures**: founded teams with deterministic keypairs for multi-party
//!   scenarios.
//!
//! ## Property testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use coterie_testkit::generators::divergent_pair;
//!
//! proptest! {
//!     #[test]
//!     fn merge_is_commutative((a, b) in divergent_pair(5)) {
//!         prop_assert_eq!(a.merge(&b).unwrap().head(), b.merge(&a).unwrap().head());
//!     }
//! }
//! ```
//!
//! ## Fixtures
//!
//! ```rust
//! use coterie_testkit::fixtures::TeamFixture;
//!
//! let fixture = TeamFixture::new(2);
//! assert_eq!(fixture.state().member_count(), 3);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{multi_party_keypairs, TeamFixture};
pub use generators::{divergent_pair, divergent_trio, founded_graph, graph, keypair};
