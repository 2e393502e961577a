//! Canonical CBOR encoding for links and graphs.
//!
//! Follows RFC 8949 Core Deterministic Encoding:
//! - Map keys are small integers, written in sorted order
//! - Integers use the smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! The canonical encoding is load-bearing: a link's hash is computed over
//! these bytes, so every replica must produce identical bytes for the same
//! link, and `save()` → `load()` → `save()` must round-trip byte-identically.

use std::collections::BTreeMap;

use crate::crypto::{PublicKey, SignatureBytes};
use crate::error::GraphError;
use crate::hash::LinkHash;
use crate::link::{Link, LinkBody};

/// Body field keys. Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const PAYLOAD: u64 = 0;
    pub const AUTHOR: u64 = 1;
    pub const TIMESTAMP: u64 = 2;
    pub const PARENTS: u64 = 3;
    pub const SIGNATURE: u64 = 4;
}

/// Graph field keys.
mod graph_keys {
    pub const ROOT: u64 = 0;
    pub const HEAD: u64 = 1;
    pub const LINKS: u64 = 2;
}

// ─────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────

/// Encode an unsigned integer with the given major type.
fn write_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a signed integer (major types 0 and 1).
fn write_int(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        write_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        write_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode a byte string (major type 2).
fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn write_null(buf: &mut Vec<u8>) {
    buf.push(0xf6);
}

/// Encode the body fields (keys 0-3) into `buf`.
///
/// Shared between `body_bytes` (signed message) and `link_bytes`.
fn write_body_fields(buf: &mut Vec<u8>, body: &LinkBody) {
    write_uint(buf, 0, keys::PAYLOAD);
    match &body.payload {
        Some(bytes) => write_bytes(buf, bytes),
        None => write_null(buf),
    }

    write_uint(buf, 0, keys::AUTHOR);
    write_bytes(buf, &body.author.0);

    write_uint(buf, 0, keys::TIMESTAMP);
    write_int(buf, body.timestamp);

    write_uint(buf, 0, keys::PARENTS);
    write_uint(buf, 4, body.parents.len() as u64);
    for parent in &body.parents {
        write_bytes(buf, &parent.0);
    }
}

/// Encode a link body to canonical bytes. This is the signed message.
pub fn body_bytes(body: &LinkBody) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128);
    write_uint(&mut buf, 5, 4);
    write_body_fields(&mut buf, body);
    buf
}

/// Encode a full link (body + signature) to canonical bytes.
///
/// The link's hash is Blake3 over these bytes.
pub fn link_bytes(link: &Link) -> Vec<u8> {
    let mut buf = Vec::with_capacity(192);
    write_uint(&mut buf, 5, 5);
    write_body_fields(&mut buf, &link.body);
    write_uint(&mut buf, 0, keys::SIGNATURE);
    write_bytes(&mut buf, &link.signature.0);
    buf
}

/// Encode a whole graph to canonical bytes.
///
/// The link map is keyed by hash; BTreeMap iteration order equals canonical
/// CBOR key order because all keys are 32-byte strings.
pub fn graph_to_bytes(root: &LinkHash, head: &LinkHash, links: &BTreeMap<LinkHash, Link>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + links.len() * 192);
    write_uint(&mut buf, 5, 3);

    write_uint(&mut buf, 0, graph_keys::ROOT);
    write_bytes(&mut buf, &root.0);

    write_uint(&mut buf, 0, graph_keys::HEAD);
    write_bytes(&mut buf, &head.0);

    write_uint(&mut buf, 0, graph_keys::LINKS);
    write_uint(&mut buf, 5, links.len() as u64);
    for (hash, link) in links {
        write_bytes(&mut buf, &hash.0);
        buf.extend_from_slice(&link_bytes(link));
    }

    buf
}

// ─────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], GraphError> {
        if self.pos + n > self.buf.len() {
            return Err(GraphError::Decoding("unexpected end of input".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a CBOR item header: (major type, argument).
    fn header(&mut self) -> Result<(u8, u64), GraphError> {
        let byte = self.take(1)?[0];
        let major = byte >> 5;
        let info = byte & 0x1f;
        let arg = match info {
            0..=23 => info as u64,
            24 => self.take(1)?[0] as u64,
            25 => u16::from_be_bytes(self.take(2)?.try_into().unwrap()) as u64,
            26 => u32::from_be_bytes(self.take(4)?.try_into().unwrap()) as u64,
            27 => u64::from_be_bytes(self.take(8)?.try_into().unwrap()),
            _ => return Err(GraphError::Decoding("indefinite lengths not allowed".into())),
        };
        Ok((major, arg))
    }

    fn expect(&mut self, major: u8, what: &str) -> Result<u64, GraphError> {
        let (m, arg) = self.header()?;
        if m != major {
            return Err(GraphError::Decoding(format!("expected {what}, got major type {m}")));
        }
        Ok(arg)
    }

    fn uint(&mut self, what: &str) -> Result<u64, GraphError> {
        self.expect(0, what)
    }

    fn int(&mut self) -> Result<i64, GraphError> {
        let (major, arg) = self.header()?;
        match major {
            0 => i64::try_from(arg).map_err(|_| GraphError::Decoding("integer overflow".into())),
            1 => {
                let n = i64::try_from(arg)
                    .map_err(|_| GraphError::Decoding("integer overflow".into()))?;
                Ok(-1 - n)
            }
            _ => Err(GraphError::Decoding("expected integer".into())),
        }
    }

    fn byte_string(&mut self) -> Result<&'a [u8], GraphError> {
        let len = self.expect(2, "byte string")?;
        self.take(len as usize)
    }

    fn fixed<const N: usize>(&mut self, what: &str) -> Result<[u8; N], GraphError> {
        let bytes = self.byte_string()?;
        bytes
            .try_into()
            .map_err(|_| GraphError::Decoding(format!("{what}: expected {N} bytes")))
    }

    fn key(&mut self, expected: u64) -> Result<(), GraphError> {
        let key = self.uint("map key")?;
        if key != expected {
            return Err(GraphError::Decoding(format!("expected key {expected}, got {key}")));
        }
        Ok(())
    }

    fn done(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn read_link(reader: &mut Reader<'_>) -> Result<Link, GraphError> {
    let entries = reader.expect(5, "link map")?;
    if entries != 5 {
        return Err(GraphError::Decoding(format!("link map has {entries} entries, expected 5")));
    }

    reader.key(keys::PAYLOAD)?;
    let payload = {
        let (major, arg) = reader.header()?;
        match (major, arg) {
            (7, 22) => None, // null
            (2, len) => Some(bytes::Bytes::copy_from_slice(reader.take(len as usize)?)),
            _ => return Err(GraphError::Decoding("payload must be bytes or null".into())),
        }
    };

    reader.key(keys::AUTHOR)?;
    let author = PublicKey(reader.fixed::<32>("author")?);

    reader.key(keys::TIMESTAMP)?;
    let timestamp = reader.int()?;

    reader.key(keys::PARENTS)?;
    let parent_count = reader.expect(4, "parents array")?;
    let mut parents = Vec::with_capacity(parent_count as usize);
    for _ in 0..parent_count {
        parents.push(LinkHash(reader.fixed::<32>("parent hash")?));
    }

    reader.key(keys::SIGNATURE)?;
    let signature = SignatureBytes(reader.fixed::<64>("signature")?);

    Ok(Link {
        body: LinkBody {
            payload,
            author,
            timestamp,
            parents,
        },
        signature,
    })
}

/// Decode a graph from canonical bytes.
///
/// Every link's map key must equal the link's recomputed hash; anything else
/// means the encoding was tampered with.
pub fn graph_from_bytes(
    bytes: &[u8],
) -> Result<(LinkHash, LinkHash, BTreeMap<LinkHash, Link>), GraphError> {
    let mut reader = Reader::new(bytes);

    let entries = reader.expect(5, "graph map")?;
    if entries != 3 {
        return Err(GraphError::Decoding(format!("graph map has {entries} entries, expected 3")));
    }

    reader.key(graph_keys::ROOT)?;
    let root = LinkHash(reader.fixed::<32>("root")?);

    reader.key(graph_keys::HEAD)?;
    let head = LinkHash(reader.fixed::<32>("head")?);

    reader.key(graph_keys::LINKS)?;
    let count = reader.expect(5, "links map")?;
    let mut links = BTreeMap::new();
    for _ in 0..count {
        let claimed = LinkHash(reader.fixed::<32>("link key")?);
        let link = read_link(&mut reader)?;
        if link.hash() != claimed {
            return Err(GraphError::Decoding(format!(
                "link key {claimed} does not match content hash"
            )));
        }
        links.insert(claimed, link);
    }

    if !reader.done() {
        return Err(GraphError::Decoding("trailing bytes after graph".into()));
    }

    Ok((root, head, links))
}
