//! The sync wire payload.

use serde::{Deserialize, Serialize};

use coterie_core::{Link, LinkHash};

use crate::error::{Result, SyncError};

/// One round of reconciliation, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Root of the sender's graph. A mismatch aborts the session.
    pub root: LinkHash,

    /// The sender's current head.
    pub head: LinkHash,

    /// Links the sender believes the receiver is missing.
    pub links: Vec<Link>,

    /// Hashes the sender knows it is missing and wants sent back.
    pub need: Vec<LinkHash>,

    /// Encoded [`TruncatedHashFilter`](crate::TruncatedHashFilter) over the
    /// sender's hashes, included while the branches are divergent.
    pub encoded_filter: Option<Vec<u8>>,
}

impl SyncPayload {
    /// Encode to CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| SyncError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use coterie_core::{HashGraph, Keypair};

    #[test]
    fn test_payload_roundtrip() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let graph = HashGraph::found(Bytes::from_static(b"root"), &keypair, 0);
        let link = graph.get(&graph.head()).unwrap().clone();

        let payload = SyncPayload {
            root: graph.root(),
            head: graph.head(),
            links: vec![link],
            need: vec![LinkHash::from_bytes([9; 32])],
            encoded_filter: Some(vec![4, 1, 2, 3, 4]),
        };
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(SyncPayload::from_bytes(&bytes).unwrap(), payload);
    }
}
