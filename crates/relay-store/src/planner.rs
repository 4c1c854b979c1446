//! Filter-to-range planner (spec §4.2.2).
//!
//! Picks the single most selective index family for a filter and produces
//! one half-open `[start, end)` byte range per concrete combination of its
//! leading fields. The trailing Serial is never part of a bound: a key
//! built from the leading fields plus the timestamp is always a strict
//! prefix of every real row at that timestamp, so leaving it off gives
//! exactly the "zero-width tail" the spec calls for.

use itertools::Itertools as _;
use relay_core::{Filter, Id};

use crate::index_schema::{self, CREATED_AT, KIND, KIND_PUBKEY, PUBKEY, TAG, TAG_KIND, TAG_KIND_PUBKEY, TAG_PUBKEY};
use crate::keycodec::{self, Field};
use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// One target id's bucket in the `Id` family; the caller must re-check
    /// the full id after dereferencing (IdHash is only an 8-byte prefix).
    IdLookup(Id),
    /// A time-ordered range in one of the other ten index families.
    TimeRange,
}

#[derive(Debug, Clone)]
pub struct ScanRange {
    pub kind: ScanKind,
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

pub struct Plan {
    pub ranges: Vec<ScanRange>,
}

fn time_bounds(filter: &Filter) -> (u64, u64) {
    let start = filter.since.map(|t| t.as_storage_u64()).unwrap_or(0);
    let end = filter
        .until
        .map(|t| t.as_storage_u64().saturating_add(1))
        .unwrap_or(u64::MAX);
    (start, end)
}

fn time_range(
    mut leading: Vec<Field<'_>>,
    start_ts: u64,
    end_ts: u64,
) -> Result<ScanRange, StoreError> {
    let mut end_fields = leading.clone();
    leading.push(Field::Uint64(start_ts));
    end_fields.push(Field::Uint64(end_ts));
    Ok(ScanRange {
        kind: ScanKind::TimeRange,
        start: keycodec::encode_fields(&leading)?,
        end: keycodec::encode_fields(&end_fields)?,
    })
}

pub fn plan(filter: &Filter) -> Result<Plan, StoreError> {
    if !filter.ids.is_empty() {
        let ranges = filter
            .ids
            .iter()
            .map(|&id| {
                let (start, end) = index_schema::id_prefix_range(id);
                ScanRange {
                    kind: ScanKind::IdLookup(id),
                    start,
                    end,
                }
            })
            .collect();
        return Ok(Plan { ranges });
    }

    let (start_ts, end_ts) = time_bounds(filter);
    let has_kinds = !filter.kinds.is_empty();
    let has_authors = !filter.authors.is_empty();
    let has_tags = !filter.tags.is_empty();

    // Tag entries sorted by tag-key descending to stabilize cross-product
    // output order, per spec §4.2.2.
    let tag_entries: Vec<(u8, &[u8])> = filter
        .tags
        .iter()
        .rev()
        .flat_map(|(&letter, values)| values.iter().map(move |v| (letter, v.as_slice())))
        .collect();

    let mut ranges = Vec::new();

    if has_kinds && has_authors && has_tags {
        for ((letter, value), kind, author) in tag_entries
            .iter()
            .copied()
            .cartesian_product(filter.kinds.iter().copied())
            .cartesian_product(filter.authors.iter().copied())
            .map(|((tag, kind), author)| (tag, kind, author))
        {
            let ident = keycodec::ident_hash(value);
            ranges.push(time_range(
                vec![
                    Field::Prefix(TAG_KIND_PUBKEY),
                    Field::Letter(letter),
                    Field::Ident(ident),
                    Field::Uint16(kind.0),
                    Field::PubHash(keycodec::pub_hash(author)),
                ],
                start_ts,
                end_ts,
            )?);
        }
    } else if has_kinds && has_tags {
        for &(letter, value) in &tag_entries {
            let ident = keycodec::ident_hash(value);
            for &kind in &filter.kinds {
                ranges.push(time_range(
                    vec![
                        Field::Prefix(TAG_KIND),
                        Field::Letter(letter),
                        Field::Ident(ident),
                        Field::Uint16(kind.0),
                    ],
                    start_ts,
                    end_ts,
                )?);
            }
        }
    } else if has_authors && has_tags {
        for &(letter, value) in &tag_entries {
            let ident = keycodec::ident_hash(value);
            for &author in &filter.authors {
                ranges.push(time_range(
                    vec![
                        Field::Prefix(TAG_PUBKEY),
                        Field::Letter(letter),
                        Field::Ident(ident),
                        Field::PubHash(keycodec::pub_hash(author)),
                    ],
                    start_ts,
                    end_ts,
                )?);
            }
        }
    } else if has_tags {
        for &(letter, value) in &tag_entries {
            let ident = keycodec::ident_hash(value);
            ranges.push(time_range(
                vec![Field::Prefix(TAG), Field::Letter(letter), Field::Ident(ident)],
                start_ts,
                end_ts,
            )?);
        }
    } else if has_kinds && has_authors {
        for &kind in &filter.kinds {
            for &author in &filter.authors {
                ranges.push(time_range(
                    vec![
                        Field::Prefix(KIND_PUBKEY),
                        Field::Uint16(kind.0),
                        Field::PubHash(keycodec::pub_hash(author)),
                    ],
                    start_ts,
                    end_ts,
                )?);
            }
        }
    } else if has_kinds {
        for &kind in &filter.kinds {
            ranges.push(time_range(
                vec![Field::Prefix(KIND), Field::Uint16(kind.0)],
                start_ts,
                end_ts,
            )?);
        }
    } else if has_authors {
        for &author in &filter.authors {
            ranges.push(time_range(
                vec![Field::Prefix(PUBKEY), Field::PubHash(keycodec::pub_hash(author))],
                start_ts,
                end_ts,
            )?);
        }
    } else {
        ranges.push(time_range(vec![Field::Prefix(CREATED_AT)], start_ts, end_ts)?);
    }

    Ok(Plan { ranges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{EventKind, PubKey};

    #[test]
    fn empty_filter_scans_created_at() {
        let plan = plan(&Filter::new()).unwrap();
        assert_eq!(plan.ranges.len(), 1);
        assert_eq!(plan.ranges[0].start[..3], *CREATED_AT);
    }

    #[test]
    fn ids_present_ignores_everything_else() {
        let mut filter = Filter::new();
        filter.ids = vec![Id::ZERO];
        filter.kinds = vec![EventKind(1)];
        let plan = plan(&filter).unwrap();
        assert_eq!(plan.ranges.len(), 1);
        assert!(matches!(plan.ranges[0].kind, ScanKind::IdLookup(_)));
    }

    #[test]
    fn kind_author_tag_selects_tag_kind_pubkey() {
        let mut filter = Filter::new();
        filter.kinds = vec![EventKind(1)];
        filter.authors = vec![PubKey::ZERO];
        filter.tags.insert(b'e', vec![b"x".to_vec()]);
        let plan = plan(&filter).unwrap();
        assert_eq!(plan.ranges.len(), 1);
        assert_eq!(&plan.ranges[0].start[..3], TAG_KIND_PUBKEY);
    }

    #[test]
    fn start_is_shorter_prefix_of_real_rows_at_start_ts() {
        let filter = Filter::new();
        let plan = plan(&filter).unwrap();
        let range = &plan.ranges[0];
        assert!(range.start.len() < range.end.len() || range.start < range.end);
    }
}
