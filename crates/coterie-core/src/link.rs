//! Link: the immutable, signed unit of the action graph.
//!
//! A link is never edited after creation. Changes to team state are expressed
//! as new links appended on top of the current head.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{body_bytes, link_bytes};
use crate::crypto::{Keypair, PublicKey, SignatureBytes};
use crate::hash::LinkHash;

/// The signed portion of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBody {
    /// The opaque action payload, interpreted by the reducer and resolver.
    ///
    /// `None` only for synthetic merge links.
    pub payload: Option<Bytes>,

    /// Public key of the author.
    pub author: PublicKey,

    /// Author-claimed timestamp (Unix milliseconds). Untrusted.
    pub timestamp: i64,

    /// Hashes of the link(s) this one causally follows.
    ///
    /// Empty for the unique root link; two entries for merge links.
    pub parents: Vec<LinkHash>,
}

/// A complete link: body + signature over the canonical body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub body: LinkBody,
    pub signature: SignatureBytes,
}

impl Link {
    /// Create and sign a link.
    pub fn sign(payload: Bytes, parents: Vec<LinkHash>, timestamp: i64, keypair: &Keypair) -> Self {
        let body = LinkBody {
            payload: Some(payload),
            author: keypair.public_key(),
            timestamp,
            parents,
        };
        let signature = keypair.sign(&body_bytes(&body));
        Self { body, signature }
    }

    /// Construct the deterministic merge link for two heads.
    ///
    /// Merge links carry no payload, a zero author, a zero signature and a
    /// zero timestamp, with parents in lexicographic hash order. Every replica
    /// merging the same pair of heads therefore mints the byte-identical link,
    /// which is what keeps `merge` commutative.
    pub fn merge(a: LinkHash, b: LinkHash) -> Self {
        let parents = if a <= b { vec![a, b] } else { vec![b, a] };
        Self {
            body: LinkBody {
                payload: None,
                author: PublicKey::ZERO,
                timestamp: 0,
                parents,
            },
            signature: SignatureBytes::ZERO,
        }
    }

    /// Compute the content address: Blake3 over the canonical link bytes.
    pub fn hash(&self) -> LinkHash {
        LinkHash::digest(&link_bytes(self))
    }

    /// Whether this is a synthetic merge link.
    pub fn is_merge(&self) -> bool {
        self.body.payload.is_none()
    }

    /// Whether this is the root link (no parents).
    pub fn is_root(&self) -> bool {
        self.body.parents.is_empty()
    }

    /// Verify the signature against the author's key.
    ///
    /// Merge links have no signature to check; their structure is checked by
    /// graph validation instead.
    pub fn verify_signature(&self) -> bool {
        if self.is_merge() {
            return self.signature == SignatureBytes::ZERO && self.body.author == PublicKey::ZERO;
        }
        self.body.author.verify(&body_bytes(&self.body), &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_link_verifies() {
        let keypair = Keypair::generate();
        let link = Link::sign(Bytes::from_static(b"add-member"), vec![], 1000, &keypair);
        assert!(link.verify_signature());
        assert!(link.is_root());
        assert!(!link.is_merge());
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let keypair = Keypair::generate();
        let mut link = Link::sign(Bytes::from_static(b"add-member"), vec![], 1000, &keypair);
        link.body.timestamp = 2000;
        assert!(!link.verify_signature());
    }

    #[test]
    fn test_merge_link_is_canonical() {
        let x = LinkHash::from_bytes([3; 32]);
        let y = LinkHash::from_bytes([7; 32]);
        let m1 = Link::merge(x, y);
        let m2 = Link::merge(y, x);
        assert_eq!(m1, m2);
        assert_eq!(m1.hash(), m2.hash());
        assert!(m1.is_merge());
        assert!(m1.verify_signature());
    }

    #[test]
    fn test_hash_changes_with_parents() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let a = Link::sign(Bytes::from_static(b"x"), vec![], 1, &keypair);
        let b = Link::sign(
            Bytes::from_static(b"x"),
            vec![LinkHash::from_bytes([1; 32])],
            1,
            &keypair,
        );
        assert_ne!(a.hash(), b.hash());
    }
}
