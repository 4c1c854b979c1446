//! Point-lookup helpers over the primary `evt`-prefixed rows (spec §4.4).
//!
//! The event table is never scanned; every access here is a single key
//! lookup keyed by [`Serial`].

use redb::ReadableTable;
use snafu::ResultExt as _;

use relay_core::Event;

use crate::error::StorageSnafu;
use crate::index_schema;
use crate::serial::Serial;
use crate::tables::MAIN_TABLE;
use crate::StoreError;

/// Length of the external-tier pointer stub value (spec §6.2): a bare
/// SHA-256, reserved for a future out-of-line body store.
pub(crate) const STUB_VALUE_LEN: usize = 32;

pub fn get(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    serial: Serial,
) -> Result<Option<Event>, StoreError> {
    let Some(bytes) = get_raw(table, serial)? else {
        return Ok(None);
    };
    if bytes.len() == STUB_VALUE_LEN {
        return Ok(None);
    }
    let event = index_schema::decode_event(&bytes).map_err(|e| {
        StoreError::ValidationFailed {
            reason: format!("corrupt event binary at serial {}: {e}", serial.0),
            location: snafu::Location::new(file!(), line!(), column!()),
        }
    })?;
    Ok(Some(event))
}

/// Raw `EventTable` value bytes, undecoded: either a full event binary or
/// a 32-byte external-tier stub. `None` if no row exists at `serial`.
pub fn get_raw(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    serial: Serial,
) -> Result<Option<Vec<u8>>, StoreError> {
    let key = index_schema::event_key(serial)?;
    let Some(guard) = table.get(key.as_slice()).context(StorageSnafu)? else {
        return Ok(None);
    };
    Ok(Some(guard.value().to_vec()))
}

pub fn get_by_txn(
    txn: &redb::ReadTransaction,
    serial: Serial,
) -> Result<Option<Event>, StoreError> {
    let table = txn.open_table(MAIN_TABLE).context(crate::error::TableSnafu)?;
    get(&table, serial)
}
