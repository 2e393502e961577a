//! Truncated-hash set filter.
//!
//! A compact summary of "which links do I have": the leading `resolution`
//! bytes of every link hash. Membership tests never produce false negatives;
//! false positives occur when two hashes share a prefix, at a rate of roughly
//! `items / 256^resolution`. At the default resolution of 4 that is about one
//! in 4 billion per item, which sync tolerates because a link missed through a
//! false positive is recovered by the explicit need-list path.

use std::collections::BTreeSet;

use coterie_core::LinkHash;

use crate::error::{Result, SyncError};

/// Default prefix width in bytes.
pub const DEFAULT_RESOLUTION: usize = 4;

/// A set of truncated link hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedHashFilter {
    resolution: usize,
    prefixes: BTreeSet<Vec<u8>>,
}

impl TruncatedHashFilter {
    /// Create an empty filter. Resolution is clamped to 1..=32.
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution: resolution.clamp(1, 32),
            prefixes: BTreeSet::new(),
        }
    }

    /// Build a filter over a set of hashes.
    pub fn from_hashes<'a>(
        resolution: usize,
        hashes: impl IntoIterator<Item = &'a LinkHash>,
    ) -> Self {
        let mut filter = Self::new(resolution);
        for hash in hashes {
            filter.add(hash);
        }
        filter
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Number of distinct prefixes stored.
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Record a hash.
    pub fn add(&mut self, hash: &LinkHash) {
        self.prefixes.insert(hash.prefix(self.resolution).to_vec());
    }

    /// Whether the hash may be in the set. `false` is definitive.
    pub fn has(&self, hash: &LinkHash) -> bool {
        self.prefixes.contains(hash.prefix(self.resolution))
    }

    /// Encode as `[resolution: u8][prefix bytes...]`, prefixes in sorted
    /// order. `load(save(f))` re-encodes byte-identically.
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.prefixes.len() * self.resolution);
        out.push(self.resolution as u8);
        for prefix in &self.prefixes {
            out.extend_from_slice(prefix);
        }
        out
    }

    /// Decode from the fixed-width encoding.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let (&resolution, body) = bytes
            .split_first()
            .ok_or_else(|| SyncError::MalformedFilter("empty encoding".into()))?;
        let resolution = resolution as usize;
        if !(1..=32).contains(&resolution) {
            return Err(SyncError::MalformedFilter(format!(
                "resolution {resolution} out of range"
            )));
        }
        if body.len() % resolution != 0 {
            return Err(SyncError::MalformedFilter(format!(
                "body length {} not a multiple of resolution {resolution}",
                body.len()
            )));
        }
        let prefixes = body.chunks(resolution).map(|c| c.to_vec()).collect();
        Ok(Self {
            resolution,
            prefixes,
        })
    }
}

impl Default for TruncatedHashFilter {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(n: u64) -> LinkHash {
        LinkHash::digest(&n.to_le_bytes())
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = TruncatedHashFilter::new(4);
        let hashes: Vec<LinkHash> = (0..1000).map(hash_of).collect();
        for hash in &hashes {
            filter.add(hash);
        }
        for hash in &hashes {
            assert!(filter.has(hash));
        }
    }

    #[test]
    fn test_false_positive_rate_low() {
        let filter = TruncatedHashFilter::from_hashes(4, (0..10_000).map(hash_of).collect::<Vec<_>>().iter());
        let false_positives = (10_000..20_000)
            .map(hash_of)
            .filter(|h| filter.has(h))
            .count();
        // Expected rate ~ 10k / 2^32 per probe; over 10k probes the expected
        // count is far below one.
        assert!(false_positives <= 1, "{false_positives} false positives");
    }

    #[test]
    fn test_save_load_save_identical() {
        let filter = TruncatedHashFilter::from_hashes(4, (0..100).map(hash_of).collect::<Vec<_>>().iter());
        let bytes = filter.save();
        let loaded = TruncatedHashFilter::load(&bytes).unwrap();
        assert_eq!(loaded, filter);
        assert_eq!(loaded.save(), bytes);
    }

    #[test]
    fn test_resolution_one_coarse() {
        let mut filter = TruncatedHashFilter::new(1);
        filter.add(&LinkHash::from_bytes([0xaa; 32]));
        let mut probe = [0u8; 32];
        probe[0] = 0xaa;
        probe[1] = 0x01;
        // Same first byte, different rest: a false positive at resolution 1.
        assert!(filter.has(&LinkHash::from_bytes(probe)));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(TruncatedHashFilter::load(&[]).is_err());
        assert!(TruncatedHashFilter::load(&[0]).is_err());
        assert!(TruncatedHashFilter::load(&[33]).is_err());
        // Resolution 4 with a 3-byte body.
        assert!(TruncatedHashFilter::load(&[4, 1, 2, 3]).is_err());
    }
}
