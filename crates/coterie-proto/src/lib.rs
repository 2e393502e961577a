//! # coterie-proto
//!
//! The peer connection protocol: mutual authentication over team membership,
//! invitation admission, session key negotiation, and graph synchronization,
//! all as a sans-I/O state machine driven by envelopes and clock ticks.
//!
//! ## Key types
//!
//! - [`Connection`]: one end of a peer connection.
//! - [`ConnectionEffect`] / [`ConnectionEvent`]: what the machine wants done.
//! - [`WireMessage`] / [`Envelope`]: what crosses the wire.
//! - [`OrderedDelivery`]: per-direction sequencing with resend requests.
//! - [`EncryptionKey`] / [`SessionSeed`]: session cryptography.

pub mod connection;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod messages;

pub use connection::{
    Connection, ConnectionConfig, ConnectionEffect, ConnectionEvent, ConnectionPhase,
};
pub use crypto::{
    session_key, EncryptionKey, EncryptionNonce, SessionSeed, X25519PublicKey, X25519Secret,
};
pub use delivery::{DeliveryConfig, OrderedDelivery};
pub use error::{ProtocolError, Result};
pub use messages::{Envelope, IdentityClaim, WireMessage, CONTROL_INDEX};
