//! Error types surfaced by the store (spec §7).
//!
//! `Duplicate`/`Tombstoned`/`BlockedByDeletion` are not modeled as
//! `StoreError` variants: the spec requires they travel as structured
//! results so callers can translate them into protocol-level "ok, but..."
//! envelopes instead of catching exceptions. See [`crate::writer::SaveOutcome`].
//! Likewise cancellation never produces an `Err` — a cancelled scan just
//! returns whatever it had accumulated.

use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        source: redb::TransactionError,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    Compaction {
        source: redb::CompactionError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("serial {serial} exceeds the 40-bit maximum"))]
    InvalidSerial {
        serial: u64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("validation failed: {reason}"))]
    ValidationFailed {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("store is closed"))]
    Closed,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<crate::keycodec::InvalidSerial> for StoreError {
    fn from(e: crate::keycodec::InvalidSerial) -> Self {
        InvalidSerialSnafu { serial: e.serial }.build()
    }
}
