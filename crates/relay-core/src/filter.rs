//! Query filters (spec §3, §7.1).
//!
//! A `Filter` is a declarative conjunction: every populated field narrows
//! the result set, and an empty/`None` field imposes no constraint. Tag
//! filters are keyed by the single-letter tag name (`e`, `p`, `d`, ...).

use std::collections::BTreeMap;

use crate::ids::{Id, PubKey};
use crate::kind::EventKind;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Vec<Id>,
    pub authors: Vec<PubKey>,
    pub kinds: Vec<EventKind>,
    /// Tag letter -> set of acceptable values, e.g. `#e` -> `[id, ...]`.
    pub tags: BTreeMap<u8, Vec<Vec<u8>>>,
    pub since: Option<Timestamp>,
    /// Exclusive upper bound on `created_at` as given by the caller; the
    /// store treats this as `until + 1` internally (spec §10 Open
    /// Questions: inclusive `until`).
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches_kind(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    pub fn matches_author(&self, pubkey: PubKey) -> bool {
        self.authors.is_empty() || self.authors.contains(&pubkey)
    }

    pub fn matches_id(&self, id: Id) -> bool {
        self.ids.is_empty() || self.ids.contains(&id)
    }

    pub fn matches_time(&self, created_at: Timestamp) -> bool {
        if let Some(since) = self.since {
            if created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if created_at > until {
                return false;
            }
        }
        true
    }

    pub fn matches_tags(&self, tags: &[crate::tag::Tag]) -> bool {
        self.tags.iter().all(|(letter, values)| {
            tags.iter().any(|t| {
                t.index_letter() == Some(*letter)
                    && t.value_bytes().is_some_and(|v| values.iter().any(|w| w == v))
            })
        })
    }
}
