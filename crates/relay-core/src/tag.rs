//! Event tags.
//!
//! A tag is an ordered sequence of byte-strings; the first element is the
//! "key", the second (when present) is the "value" (spec §3). Only tags
//! whose key is a single alphabetic byte (`a..z`/`A..Z`), or a `#x` form
//! reduced to its second byte, and which carry at least a value, are
//! indexable (spec §4.2.1).

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Tag(pub Vec<Vec<u8>>);

impl Tag {
    pub fn new(elements: Vec<Vec<u8>>) -> Self {
        Self(elements)
    }

    pub fn key_bytes(&self) -> Option<&[u8]> {
        self.0.first().map(Vec::as_slice)
    }

    pub fn value_bytes(&self) -> Option<&[u8]> {
        self.0.get(1).map(Vec::as_slice)
    }

    /// The single-byte indexable tag key, if this tag qualifies for
    /// indexing: `key` is `a..z`/`A..Z` (used as-is), or `#x` (reduced to
    /// `x`), and the tag has at least two elements.
    pub fn index_letter(&self) -> Option<u8> {
        if self.0.len() < 2 {
            return None;
        }
        let key = self.key_bytes()?;
        match key {
            [b] if b.is_ascii_alphabetic() => Some(*b),
            [b'#', b] => Some(*b),
            _ => None,
        }
    }
}
