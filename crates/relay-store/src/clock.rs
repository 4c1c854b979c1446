//! The `Clock` collaborator (spec §6.4): wall-clock seconds for tombstones.
//!
//! Injected through [`crate::config::StoreConfig`] rather than called
//! directly so a deletion's `deleted_at` doesn't have to come from the
//! deletion event's own (client-supplied, potentially stale or forged)
//! `created_at`.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
