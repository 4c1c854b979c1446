//! Physical redb table definitions.
//!
//! All twelve index families share one flat byte-keyed table — the 3-byte
//! ASCII prefix is what disambiguates a family during a range scan, exactly
//! as a single sorted keyspace in an LSM store would. A second table holds
//! small fixed-value metadata (currently just the serial counter) where a
//! native `u64` value is more convenient than a raw byte blob.

pub const MAIN_TABLE: redb::TableDefinition<'_, &[u8], &[u8]> = redb::TableDefinition::new("store");

pub const META_TABLE: redb::TableDefinition<'_, &str, u64> = redb::TableDefinition::new("meta");
