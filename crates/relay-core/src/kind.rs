//! Event kind classification.
//!
//! `EventKind` is the 16-bit category code from spec §3. Three subclasses
//! matter to the store: replaceable, parameterized-replaceable, and the
//! special deletion kind. Whether a kind is *ephemeral* is left to an
//! injected predicate (spec §9 "Ephemeral kinds") since it is relay
//! configuration, not a property of the core.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct EventKind(pub u16);

/// The deletion event kind (NIP-09 in the wild).
pub const DELETION_KIND: EventKind = EventKind(5);

impl EventKind {
    pub fn is_deletion(self) -> bool {
        self == DELETION_KIND
    }

    /// Replaceable: kind 0, kind 3, or in `10000..20000`.
    pub fn is_replaceable(self) -> bool {
        self.0 == 0 || self.0 == 3 || (10_000..20_000).contains(&self.0)
    }

    /// Parameterized-replaceable: `30000..40000`.
    pub fn is_parameterized_replaceable(self) -> bool {
        (30_000..40_000).contains(&self.0)
    }

    pub fn is_regular(self) -> bool {
        !self.is_replaceable() && !self.is_parameterized_replaceable() && !self.is_deletion()
    }
}

impl From<u16> for EventKind {
    fn from(v: u16) -> Self {
        EventKind(v)
    }
}

impl From<EventKind> for u16 {
    fn from(v: EventKind) -> Self {
        v.0
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
