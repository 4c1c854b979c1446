//! The twelve index families: prefixes, key builders, and the
//! index-bytes-for-event generator (spec family table + §4.2.1).
//!
//! Every family is a 3-byte ASCII prefix followed by an ordered tuple of
//! [`crate::keycodec::Field`]s, always ending in the event's Serial. All
//! twelve share the same underlying table; the prefix alone disambiguates
//! families during a range scan.

use relay_core::{Event, EventKind, Id, PubKey, Tag, Timestamp};

use crate::keycodec::{self, Field, InvalidSerial};
use crate::serial::Serial;

macro_rules! prefix {
    ($name:ident, $bytes:literal) => {
        pub const $name: &[u8; 3] = $bytes;
    };
}

prefix!(EVENT, b"evt");
prefix!(ID, b"eid");
prefix!(FULL_ID_PUBKEY, b"fpc");
prefix!(CREATED_AT, b"c--");
prefix!(KIND, b"kc-");
prefix!(PUBKEY, b"pc-");
prefix!(KIND_PUBKEY, b"kpc");
prefix!(TAG, b"tc-");
prefix!(TAG_KIND, b"tkc");
prefix!(TAG_PUBKEY, b"tpc");
prefix!(TAG_KIND_PUBKEY, b"tkp");
prefix!(TOMBSTONE, b"tmb");

/// All twelve families by name, for administrative per-family row counts.
pub const FAMILIES: [(&str, &[u8; 3]); 12] = [
    ("event", EVENT),
    ("id", ID),
    ("full_id_pubkey", FULL_ID_PUBKEY),
    ("created_at", CREATED_AT),
    ("kind", KIND),
    ("pubkey", PUBKEY),
    ("kind_pubkey", KIND_PUBKEY),
    ("tag", TAG),
    ("tag_kind", TAG_KIND),
    ("tag_pubkey", TAG_PUBKEY),
    ("tag_kind_pubkey", TAG_KIND_PUBKEY),
    ("tombstone", TOMBSTONE),
];

/// One row to write: key bytes and value bytes (empty for every family
/// except [`EVENT`]).
pub struct IndexRow {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

fn row(fields: &[Field<'_>]) -> Result<IndexRow, InvalidSerial> {
    Ok(IndexRow {
        key: keycodec::encode_fields(fields)?,
        value: Vec::new(),
    })
}

pub fn event_key(serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[Field::Prefix(EVENT), Field::Uint40(serial.0)])
}

pub fn id_key(id: Id, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(ID),
        Field::IdHash(keycodec::id_hash(id)),
        Field::Uint40(serial.0),
    ])
}

/// The half-open range covering every `Id` row for a given id, regardless
/// of serial (used to look up "is this id already stored").
pub fn id_prefix_range(id: Id) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::new();
    start.extend_from_slice(ID);
    start.extend_from_slice(&keycodec::id_hash(id));
    let mut end = start.clone();
    end.push(0xff);
    end.push(0xff);
    end.push(0xff);
    end.push(0xff);
    end.push(0xff);
    (start, end)
}

pub fn full_id_pubkey_key(serial: Serial, id: Id, pubkey: PubKey, created_at: Timestamp) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(FULL_ID_PUBKEY),
        Field::Uint40(serial.0),
        Field::Id(id),
        Field::PubKey(pubkey),
        Field::Uint64(created_at.as_storage_u64()),
    ])
}

pub fn full_id_pubkey_prefix(serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[Field::Prefix(FULL_ID_PUBKEY), Field::Uint40(serial.0)])
}

pub fn created_at_key(created_at: Timestamp, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(CREATED_AT),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn kind_key(kind: EventKind, created_at: Timestamp, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(KIND),
        Field::Uint16(kind.0),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn pubkey_key(pubkey: PubKey, created_at: Timestamp, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(PUBKEY),
        Field::PubHash(keycodec::pub_hash(pubkey)),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn kind_pubkey_key(kind: EventKind, pubkey: PubKey, created_at: Timestamp, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(KIND_PUBKEY),
        Field::Uint16(kind.0),
        Field::PubHash(keycodec::pub_hash(pubkey)),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn tag_key(letter: u8, ident: [u8; 8], created_at: Timestamp, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(TAG),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn tag_kind_key(letter: u8, ident: [u8; 8], kind: EventKind, created_at: Timestamp, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(TAG_KIND),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::Uint16(kind.0),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn tag_pubkey_key(letter: u8, ident: [u8; 8], pubkey: PubKey, created_at: Timestamp, serial: Serial) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(TAG_PUBKEY),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::PubHash(keycodec::pub_hash(pubkey)),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn tag_kind_pubkey_key(
    letter: u8,
    ident: [u8; 8],
    kind: EventKind,
    pubkey: PubKey,
    created_at: Timestamp,
    serial: Serial,
) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(TAG_KIND_PUBKEY),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::Uint16(kind.0),
        Field::PubHash(keycodec::pub_hash(pubkey)),
        Field::Uint64(created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])
}

pub fn tombstone_key(id: Id, deleted_at: Timestamp) -> Result<Vec<u8>, InvalidSerial> {
    keycodec::encode_fields(&[
        Field::Prefix(TOMBSTONE),
        Field::Id(id),
        Field::Uint64(deleted_at.as_storage_u64()),
    ])
}

/// Full `[start, end)` span of the `TagKind` family for one `(letter,
/// ident, kind)` bucket, every timestamp included. Used by deletion
/// blocking checks, which need every Deletion event referencing a given
/// tag value regardless of when it was created.
pub fn tag_kind_full_range(letter: u8, ident: [u8; 8], kind: EventKind) -> Result<(Vec<u8>, Vec<u8>), InvalidSerial> {
    let start = keycodec::encode_fields(&[
        Field::Prefix(TAG_KIND),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::Uint16(kind.0),
        Field::Uint64(0),
    ])?;
    let end = keycodec::encode_fields(&[
        Field::Prefix(TAG_KIND),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::Uint16(kind.0),
        Field::Uint64(u64::MAX),
    ])?;
    Ok((start, end))
}

/// Full `[start, end)` span of the `TagKindPubkey` family for one
/// `(letter, ident, kind, pubkey)` bucket. Used to find every physical
/// copy of a parameterized-replaceable event for `a`-tag deletion.
pub fn tag_kind_pubkey_full_range(
    letter: u8,
    ident: [u8; 8],
    kind: EventKind,
    pubkey: PubKey,
) -> Result<(Vec<u8>, Vec<u8>), InvalidSerial> {
    let start = keycodec::encode_fields(&[
        Field::Prefix(TAG_KIND_PUBKEY),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::Uint16(kind.0),
        Field::PubHash(keycodec::pub_hash(pubkey)),
        Field::Uint64(0),
    ])?;
    let end = keycodec::encode_fields(&[
        Field::Prefix(TAG_KIND_PUBKEY),
        Field::Letter(letter),
        Field::Ident(ident),
        Field::Uint16(kind.0),
        Field::PubHash(keycodec::pub_hash(pubkey)),
        Field::Uint64(u64::MAX),
    ])?;
    Ok((start, end))
}

pub fn tombstone_prefix_range(id: Id) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::new();
    start.extend_from_slice(TOMBSTONE);
    start.extend_from_slice(id.as_slice());
    let mut end = start.clone();
    end.extend_from_slice(&[0xff; UINT64_END_PAD]);
    (start, end)
}

const UINT64_END_PAD: usize = 8;

/// A tag qualifies for indexing per §4.2.1: single alphabetic-byte key (or
/// `#x` reduced to `x`) and at least a value element.
pub fn indexable_tags(tags: &[Tag]) -> impl Iterator<Item = (u8, &[u8])> {
    tags.iter()
        .filter_map(|t| t.index_letter().zip(t.value_bytes()))
}

/// Every index row (including the primary [`EVENT`] row) for a stored
/// event, per the deterministic emission rules in §4.2.1.
pub fn index_rows_for_event(event: &Event, serial: Serial) -> Result<Vec<IndexRow>, InvalidSerial> {
    let mut rows = Vec::new();

    rows.push(IndexRow {
        key: event_key(serial)?,
        value: event_binary(event),
    });
    rows.push(row(&[
        Field::Prefix(ID),
        Field::IdHash(keycodec::id_hash(event.id)),
        Field::Uint40(serial.0),
    ])?);
    rows.push(row(&[
        Field::Prefix(FULL_ID_PUBKEY),
        Field::Uint40(serial.0),
        Field::Id(event.id),
        Field::PubKey(event.pubkey),
        Field::Uint64(event.created_at.as_storage_u64()),
    ])?);
    rows.push(row(&[
        Field::Prefix(CREATED_AT),
        Field::Uint64(event.created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])?);
    rows.push(row(&[
        Field::Prefix(PUBKEY),
        Field::PubHash(keycodec::pub_hash(event.pubkey)),
        Field::Uint64(event.created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])?);
    rows.push(row(&[
        Field::Prefix(KIND),
        Field::Uint16(event.kind.0),
        Field::Uint64(event.created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])?);
    rows.push(row(&[
        Field::Prefix(KIND_PUBKEY),
        Field::Uint16(event.kind.0),
        Field::PubHash(keycodec::pub_hash(event.pubkey)),
        Field::Uint64(event.created_at.as_storage_u64()),
        Field::Uint40(serial.0),
    ])?);

    for (letter, value) in indexable_tags(&event.tags) {
        let ident = keycodec::ident_hash(value);
        rows.push(row(&[
            Field::Prefix(TAG),
            Field::Letter(letter),
            Field::Ident(ident),
            Field::Uint64(event.created_at.as_storage_u64()),
            Field::Uint40(serial.0),
        ])?);
        rows.push(row(&[
            Field::Prefix(TAG_KIND),
            Field::Letter(letter),
            Field::Ident(ident),
            Field::Uint16(event.kind.0),
            Field::Uint64(event.created_at.as_storage_u64()),
            Field::Uint40(serial.0),
        ])?);
        rows.push(row(&[
            Field::Prefix(TAG_PUBKEY),
            Field::Letter(letter),
            Field::Ident(ident),
            Field::PubHash(keycodec::pub_hash(event.pubkey)),
            Field::Uint64(event.created_at.as_storage_u64()),
            Field::Uint40(serial.0),
        ])?);
        rows.push(row(&[
            Field::Prefix(TAG_KIND_PUBKEY),
            Field::Letter(letter),
            Field::Ident(ident),
            Field::Uint16(event.kind.0),
            Field::PubHash(keycodec::pub_hash(event.pubkey)),
            Field::Uint64(event.created_at.as_storage_u64()),
            Field::Uint40(serial.0),
        ])?);
    }

    Ok(rows)
}

/// Index rows to remove for a deletion-event-triggered physical delete
/// (spec §4.6): every row that feeds range/tag discovery, but *not* the
/// primary [`EVENT`] row or the [`ID`]/[`FULL_ID_PUBKEY`] rows an id-only
/// lookup depends on. Scenarios S4/P8 require a deleted event to stay
/// reachable by direct id query even though it vanishes from range scans;
/// [`RelayStore::delete_event`](crate::store::RelayStore::delete_event)
/// (the administrative API) removes the full row set instead.
pub fn visibility_index_rows_for_event(event: &Event, serial: Serial) -> Result<Vec<IndexRow>, InvalidSerial> {
    Ok(index_rows_for_event(event, serial)?
        .into_iter()
        .filter(|r| !(r.key.starts_with(EVENT) || r.key.starts_with(ID) || r.key.starts_with(FULL_ID_PUBKEY)))
        .collect())
}

pub fn event_binary(event: &Event) -> Vec<u8> {
    bincode::encode_to_vec(event, relay_core::STD_BINCODE_CONFIG).expect("event always encodes")
}

pub fn decode_event(bytes: &[u8]) -> Result<Event, bincode::error::DecodeError> {
    bincode::decode_from_slice(bytes, relay_core::STD_BINCODE_CONFIG).map(|(ev, _)| ev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{PubKey, Sig};

    fn sample_event() -> Event {
        Event {
            id: Id::ZERO,
            pubkey: PubKey::from_bytes([1u8; 32]),
            created_at: Timestamp(1000),
            kind: EventKind(1),
            tags: vec![Tag::new(vec![b"e".to_vec(), b"deadbeef".to_vec()])],
            content: b"hello".to_vec(),
            sig: Sig::ZERO,
        }
    }

    #[test]
    fn emits_six_base_rows_plus_event_plus_one_tag_quad() {
        let rows = index_rows_for_event(&sample_event(), Serial(1)).unwrap();
        // event + id + full_id_pubkey + created_at + pubkey + kind + kind_pubkey = 7
        // + tag + tag_kind + tag_pubkey + tag_kind_pubkey = 4
        assert_eq!(rows.len(), 11);
    }

    #[test]
    fn untagged_event_skips_tag_families() {
        let mut event = sample_event();
        event.tags.clear();
        let rows = index_rows_for_event(&event, Serial(1)).unwrap();
        assert_eq!(rows.len(), 7);
    }

    #[test]
    fn non_indexable_tag_is_skipped() {
        let mut event = sample_event();
        event.tags = vec![Tag::new(vec![b"nope".to_vec(), b"x".to_vec()])];
        let rows = index_rows_for_event(&event, Serial(1)).unwrap();
        assert_eq!(rows.len(), 7);
    }
}
