//! Store configuration (ambient, not a persisted concern).
//!
//! Which kinds are ephemeral, and which pubkeys may delete events they
//! don't own, are relay policy rather than properties of the storage
//! engine (spec §9 "Ephemeral kinds"), so both are injected here instead
//! of being hard-coded.

use std::collections::BTreeSet;
use std::sync::Arc;

use relay_core::{EventKind, PubKey};

use crate::clock::{Clock, SystemClock};
use crate::serial::DEFAULT_LEASE_BATCH;

/// Hard cap on rows scanned for a single range before giving up and
/// truncating (spec §4.7 edge cases).
pub const DEFAULT_SCAN_CAP: usize = 5000;

/// Limit used when a filter carries no explicit `limit`.
pub const DEFAULT_QUERY_LIMIT: usize = 500;

#[derive(Clone)]
pub struct StoreConfig {
    /// Batch size for SerialAllocator leases (spec §4.3).
    pub serial_lease_batch: u64,
    /// Maximum rows a single range scan may examine before truncating.
    pub scan_cap: usize,
    /// Default `limit` applied when a filter doesn't specify one.
    pub default_query_limit: usize,
    /// Kinds that are never persisted.
    pub is_ephemeral: Arc<dyn Fn(EventKind) -> bool + Send + Sync>,
    /// Pubkeys allowed to delete events they don't own.
    pub privileged_owners: BTreeSet<PubKey>,
    /// Wall-clock source for tombstone `deleted_at` timestamps (spec §6.4).
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            serial_lease_batch: DEFAULT_LEASE_BATCH,
            scan_cap: DEFAULT_SCAN_CAP,
            default_query_limit: DEFAULT_QUERY_LIMIT,
            is_ephemeral: Arc::new(|kind| (20_000..30_000).contains(&kind.0)),
            privileged_owners: BTreeSet::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreConfig {
    pub fn is_privileged(&self, pubkey: PubKey) -> bool {
        self.privileged_owners.contains(&pubkey)
    }
}
