//! Monotonic 40-bit serial allocation (spec §4.3).
//!
//! Serials are leased in batches from a single counter row in the meta
//! table so that a restart never reuses a number: the counter on disk is
//! always >= every serial ever handed out, even if the in-memory lease was
//! only partially consumed before a crash.

use std::sync::Mutex;

use redb::ReadableTable;
use snafu::ResultExt as _;

use crate::error::{CommitSnafu, StorageSnafu, TableSnafu, TransactionSnafu};
use crate::keycodec::SERIAL_MAX;
use crate::tables::META_TABLE;
use crate::StoreError;

pub const DEFAULT_LEASE_BATCH: u64 = 1000;

const SERIAL_COUNTER_KEY: &str = "serial_counter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(pub u64);

impl Serial {
    pub fn checked(value: u64) -> Result<Self, crate::keycodec::InvalidSerial> {
        if value > SERIAL_MAX {
            return Err(crate::keycodec::InvalidSerial { serial: value });
        }
        Ok(Serial(value))
    }
}

struct Lease {
    next: u64,
    /// One past the last serial this process may hand out before refilling.
    end: u64,
}

pub struct SerialAllocator {
    batch: u64,
    lease: Mutex<Lease>,
}

impl SerialAllocator {
    /// Reads (or initializes) the on-disk counter and reserves the first
    /// lease batch.
    pub fn open(db: &redb::Database, batch: u64) -> Result<Self, StoreError> {
        let write_txn = db.begin_write().context(TransactionSnafu)?;
        let next = {
            let mut table = write_txn.open_table(META_TABLE).context(TableSnafu)?;
            let current = table
                .get(SERIAL_COUNTER_KEY)
                .context(StorageSnafu)?
                .map(|g| g.value())
                .unwrap_or(0);
            let end = current.saturating_add(batch);
            table.insert(SERIAL_COUNTER_KEY, end).context(StorageSnafu)?;
            current
        };
        write_txn.commit().context(CommitSnafu)?;

        Ok(Self {
            batch: batch.max(1),
            lease: Mutex::new(Lease {
                next,
                end: next.saturating_add(batch),
            }),
        })
    }

    /// Returns a value strictly greater than every previously returned
    /// value, refilling the on-disk lease when the in-memory batch is
    /// exhausted.
    pub fn next(&self, db: &redb::Database) -> Result<Serial, StoreError> {
        let mut lease = self.lease.lock().expect("serial allocator lease poisoned");
        if lease.next >= lease.end {
            self.refill(db, &mut lease)?;
        }
        let value = lease.next;
        lease.next += 1;
        Ok(Serial::checked(value)?)
    }

    fn refill(&self, db: &redb::Database, lease: &mut Lease) -> Result<(), StoreError> {
        let write_txn = db.begin_write().context(TransactionSnafu)?;
        let new_end = {
            let mut table = write_txn.open_table(META_TABLE).context(TableSnafu)?;
            let current = table
                .get(SERIAL_COUNTER_KEY)
                .context(StorageSnafu)?
                .map(|g| g.value())
                .unwrap_or(lease.end);
            let new_end = current.saturating_add(self.batch);
            table.insert(SERIAL_COUNTER_KEY, new_end).context(StorageSnafu)?;
            new_end
        };
        write_txn.commit().context(CommitSnafu)?;
        lease.next = lease.end;
        lease.end = new_end;
        Ok(())
    }

    /// Releases the unused tail of the current lease back to the on-disk
    /// counter so a future open doesn't skip serials unnecessarily.
    pub fn release_unused(&self, db: &redb::Database) -> Result<(), StoreError> {
        let lease = self.lease.lock().expect("serial allocator lease poisoned");
        if lease.next >= lease.end {
            return Ok(());
        }
        let write_txn = db.begin_write().context(TransactionSnafu)?;
        {
            let mut table = write_txn.open_table(META_TABLE).context(TableSnafu)?;
            let current = table
                .get(SERIAL_COUNTER_KEY)
                .context(StorageSnafu)?
                .map(|g| g.value())
                .unwrap_or(lease.end);
            // Only lower the counter if nothing else has advanced it since.
            if current == lease.end {
                table
                    .insert(SERIAL_COUNTER_KEY, lease.next)
                    .context(StorageSnafu)?;
            }
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }
}
