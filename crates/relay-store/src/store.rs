//! The `Store` trait (spec §6.1) and its `redb`-backed implementation.
//!
//! `RelayStore` is the handle callers actually construct: it owns a
//! [`Database`], a [`StoreConfig`], and nothing else. Every method is a
//! thin dispatch into `writer`/`executor`/`event_table`.

use std::path::{Path, PathBuf};

use snafu::ResultExt as _;
use tracing::instrument;

use relay_core::{Event, Filter, Id};

use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::db::Database;
use crate::event_table;
use crate::executor::{self, IdPkTs};
use crate::serial::Serial;
use crate::tables::MAIN_TABLE;
use crate::writer::{self, SaveOutcome};
use crate::StoreError;

pub trait Store {
    fn path(&self) -> &Path;
    fn close(&self) -> Result<(), StoreError>;
    fn sync(&self) -> Result<(), StoreError>;
    fn wipe(&self) -> Result<(), StoreError>;

    fn save_event(&self, event: &Event) -> Result<SaveOutcome, StoreError>;
    fn delete_event(&self, id: Id, tombstone: bool) -> Result<(), StoreError>;

    fn query_events(&self, filter: &Filter, cancel: &CancelToken) -> Result<Vec<Event>, StoreError>;
    fn query_for_ids(&self, filter: &Filter, cancel: &CancelToken) -> Result<Vec<IdPkTs>, StoreError>;
    fn query_for_serials(&self, filter: &Filter, cancel: &CancelToken) -> Result<Vec<u64>, StoreError>;
    fn fetch_event_by_serial(&self, serial: u64) -> Result<Option<Event>, StoreError>;
}

pub struct RelayStore {
    db: Database,
    config: StoreConfig,
}

impl RelayStore {
    pub fn open(path: impl Into<PathBuf>, config: StoreConfig) -> Result<Self, StoreError> {
        let db = Database::open(path, config.serial_lease_batch)?;
        Ok(Self { db, config })
    }

    pub fn open_in_memory(config: StoreConfig) -> Result<Self, StoreError> {
        let db = Database::open_in_memory(config.serial_lease_batch)?;
        Ok(Self { db, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn compact(&mut self) -> Result<bool, StoreError> {
        self.db.compact()
    }

    pub fn dump_table_stats(&self) -> Result<crate::db::TableStats, StoreError> {
        self.db.dump_table_stats()
    }
}

impl Store for RelayStore {
    fn path(&self) -> &Path {
        self.db.path()
    }

    fn close(&self) -> Result<(), StoreError> {
        self.db.close()
    }

    fn sync(&self) -> Result<(), StoreError> {
        self.db.sync()
    }

    fn wipe(&self) -> Result<(), StoreError> {
        self.db.wipe()
    }

    #[instrument(skip_all, fields(id = %event.id, kind = event.kind.0))]
    fn save_event(&self, event: &Event) -> Result<SaveOutcome, StoreError> {
        writer::save_event(&self.db, &self.config, event)
    }

    fn delete_event(&self, id: Id, tombstone: bool) -> Result<(), StoreError> {
        self.db.write_with(|txn| {
            let table = txn.open_table(MAIN_TABLE).context(crate::error::TableSnafu)?;
            let (start, end) = crate::index_schema::id_prefix_range(id);
            let found = {
                let mut hits = table.range(start.as_slice()..end.as_slice()).context(crate::error::StorageSnafu)?;
                hits.next().transpose().context(crate::error::StorageSnafu)?.map(|(key_guard, _)| {
                    let key = key_guard.value();
                    Serial(crate::keycodec::read_uint40(&key[key.len() - 5..]))
                })
            };
            drop(table);

            let Some(serial) = found else {
                return Ok(());
            };
            let table = txn.open_table(MAIN_TABLE).context(crate::error::TableSnafu)?;
            let Some(event) = event_table::get(&table, serial)? else {
                return Ok(());
            };
            drop(table);

            let mut table = txn.open_table(MAIN_TABLE).context(crate::error::TableSnafu)?;
            for row in crate::index_schema::index_rows_for_event(&event, serial)? {
                table.remove(row.key.as_slice()).context(crate::error::StorageSnafu)?;
            }
            if tombstone {
                use relay_core::Timestamp;
                let key = crate::index_schema::tombstone_key(id, Timestamp(self.config.clock.now()))?;
                table.insert(key.as_slice(), &[][..]).context(crate::error::StorageSnafu)?;
            }
            Ok(())
        })
    }

    #[instrument(skip_all)]
    fn query_events(&self, filter: &Filter, cancel: &CancelToken) -> Result<Vec<Event>, StoreError> {
        executor::query_events(&self.db, &self.config, filter, cancel)
    }

    fn query_for_ids(&self, filter: &Filter, cancel: &CancelToken) -> Result<Vec<IdPkTs>, StoreError> {
        executor::query_for_ids(&self.db, &self.config, filter, cancel)
    }

    fn query_for_serials(&self, filter: &Filter, cancel: &CancelToken) -> Result<Vec<u64>, StoreError> {
        executor::query_for_serials(&self.db, &self.config, filter, cancel)
    }

    fn fetch_event_by_serial(&self, serial: u64) -> Result<Option<Event>, StoreError> {
        self.db.read_with(|txn| event_table::get_by_txn(txn, Serial(serial)))
    }
}
