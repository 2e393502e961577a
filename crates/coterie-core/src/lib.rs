//! # Coterie Core
//!
//! Pure primitives for Coterie: the hash-linked action graph, deterministic
//! linearization, and canonical serialization.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`HashGraph`] - Append-only DAG of signed actions, merged CRDT-style
//! - [`Link`] - The atomic, immutable unit of the graph
//! - [`LinkHash`] - Content-addressed identifier (Blake3 hash)
//! - [`Resolver`] - Pluggable conflict resolution for linearization
//!
//! ## Canonicalization
//!
//! All links and graphs are encoded using deterministic CBOR, so equal values
//! always serialize to equal bytes. See the [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod graph;
pub mod hash;
pub mod link;
pub mod sequence;
pub mod validation;

pub use crypto::{random_bytes, Keypair, PublicKey, SignatureBytes};
pub use error::{GraphError, ValidationError};
pub use graph::HashGraph;
pub use hash::LinkHash;
pub use link::{Link, LinkBody};
pub use sequence::{sequence, NullResolver, Resolution, Resolver};
pub use validation::validate;
