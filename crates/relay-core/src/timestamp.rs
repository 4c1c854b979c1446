//! Event timestamps.
//!
//! The wire/API type is a signed seconds-since-epoch value, but the on-disk
//! key format stores it as unsigned 64-bit so that byte order matches
//! numeric order (spec §4.1). Negative timestamps are clamped to zero at
//! encode time; events predating the epoch are not representable in range
//! indexes (spec §9).

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Clamp to the unsigned range used by the on-disk key encoding.
    pub fn as_storage_u64(self) -> u64 {
        if self.0 < 0 { 0 } else { self.0 as u64 }
    }

    pub fn from_storage_u64(v: u64) -> Self {
        Timestamp(v as i64)
    }
}

impl From<i64> for Timestamp {
    fn from(v: i64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for i64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}
