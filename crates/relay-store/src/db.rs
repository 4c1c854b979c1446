//! The `redb`-backed handle: open/close, the blocking `write_with`/`read_with`
//! helpers, and administrative operations (wipe, compact, table stats).
//!
//! Unlike the async, `tokio::task::block_in_place`-wrapped transactions the
//! teacher crate uses, these are plain synchronous calls — the store's
//! public surface is blocking by design (spec §9 "Coroutines / async").

use std::path::{Path, PathBuf};

use redb::{ReadableTable, ReadableTableMetadata as _};
use snafu::ResultExt as _;
use tracing::debug;

use crate::error::{CommitSnafu, CompactionSnafu, DatabaseSnafu, TableSnafu, TransactionSnafu};
use crate::index_schema;
use crate::serial::SerialAllocator;
use crate::tables::{MAIN_TABLE, META_TABLE};
use crate::StoreError;

const LOG_TARGET: &str = "relay::store";

pub struct Database {
    inner: redb::Database,
    path: PathBuf,
    pub(crate) serials: SerialAllocator,
}

impl Database {
    pub fn open(path: impl Into<PathBuf>, serial_lease_batch: u64) -> Result<Self, StoreError> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "opening store");
        let inner = redb::Database::create(&path).context(DatabaseSnafu)?;
        Self::open_inner(inner, path, serial_lease_batch)
    }

    pub fn open_in_memory(serial_lease_batch: u64) -> Result<Self, StoreError> {
        debug!(target: LOG_TARGET, "opening in-memory store");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::open_inner(inner, PathBuf::new(), serial_lease_batch)
    }

    fn open_inner(
        inner: redb::Database,
        path: PathBuf,
        serial_lease_batch: u64,
    ) -> Result<Self, StoreError> {
        Self::init_tables(&inner)?;
        let serials = SerialAllocator::open(&inner, serial_lease_batch)?;
        Ok(Self {
            inner,
            path,
            serials,
        })
    }

    fn init_tables(inner: &redb::Database) -> Result<(), StoreError> {
        let write_txn = inner.begin_write().context(TransactionSnafu)?;
        write_txn.open_table(MAIN_TABLE).context(TableSnafu)?;
        write_txn.open_table(META_TABLE).context(TableSnafu)?;
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Access to the underlying `redb::Database`, for `SerialAllocator`
    /// calls that must run outside of (never nested inside) a write
    /// transaction opened via [`Self::write_with`].
    pub(crate) fn raw(&self) -> &redb::Database {
        &self.inner
    }

    /// Blocking write transaction. All index rows for one event, or one
    /// deletion's worth of removals, are written inside a single call so
    /// they commit atomically (spec invariant I1).
    pub fn write_with<T>(
        &self,
        f: impl FnOnce(&redb::WriteTransaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let write_txn = self.inner.begin_write().context(TransactionSnafu)?;
        let result = f(&write_txn)?;
        write_txn.commit().context(CommitSnafu)?;
        Ok(result)
    }

    pub fn read_with<T>(
        &self,
        f: impl FnOnce(&redb::ReadTransaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let read_txn = self.inner.begin_read().context(TransactionSnafu)?;
        f(&read_txn)
    }

    /// Drops and recreates both tables, discarding every event, index row,
    /// and the serial counter. Administrative only.
    pub fn wipe(&self) -> Result<(), StoreError> {
        let write_txn = self.inner.begin_write().context(TransactionSnafu)?;
        write_txn.delete_table(MAIN_TABLE).context(TableSnafu)?;
        write_txn.delete_table(META_TABLE).context(TableSnafu)?;
        write_txn.open_table(MAIN_TABLE).context(TableSnafu)?;
        write_txn.open_table(META_TABLE).context(TableSnafu)?;
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        self.serials.release_unused(&self.inner)
    }

    pub fn compact(&mut self) -> Result<bool, StoreError> {
        self.inner.compact().context(CompactionSnafu)
    }

    /// Row counts per index family plus the meta table, for admin
    /// introspection (spec §5.1). All twelve families share one physical
    /// table, so this counts by prefix rather than by `TableDefinition`.
    pub fn dump_table_stats(&self) -> Result<TableStats, StoreError> {
        self.read_with(|tx| {
            let main = tx.open_table(MAIN_TABLE).context(TableSnafu)?;
            let meta = tx.open_table(META_TABLE).context(TableSnafu)?;

            let mut families = Vec::new();
            for (name, prefix) in index_schema::FAMILIES {
                let end = prefix_upper_bound(prefix);
                let count = main
                    .range(prefix.as_slice()..end.as_slice())
                    .context(crate::error::StorageSnafu)?
                    .count() as u64;
                families.push(TableStat {
                    name,
                    entry_count: count,
                });
            }

            Ok(TableStats {
                main_rows: main.len().context(crate::error::StorageSnafu)?,
                meta_rows: meta.len().context(crate::error::StorageSnafu)?,
                families,
            })
        })
    }

    pub fn close(&self) -> Result<(), StoreError> {
        self.sync()
    }
}

#[derive(Debug, Clone)]
pub struct TableStats {
    pub main_rows: u64,
    pub meta_rows: u64,
    pub families: Vec<TableStat>,
}

#[derive(Debug, Clone)]
pub struct TableStat {
    pub name: &'static str,
    pub entry_count: u64,
}

/// One past the last byte string sharing `prefix`, for a `[prefix, end)`
/// range scan over the single shared table.
fn prefix_upper_bound(prefix: &[u8; 3]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    *end.last_mut().expect("prefix is non-empty") += 1;
    end
}
