//! Literal end-to-end scenarios S1-S6 and the cross-scenario properties
//! from spec.md §8, run against an in-memory store.

use rand::seq::SliceRandom as _;
use rand::Rng as _;

use relay_core::{EventKind, Filter, Id, PubKey, Sig, Tag, Timestamp};
use relay_store::{CancelToken, RelayStore, SaveOutcome, Store, StoreConfig};

fn pubkey(byte: u8) -> PubKey {
    PubKey::from_bytes([byte; 32])
}

fn id(byte: u8) -> Id {
    Id::from_bytes([byte; 32])
}

fn event(id: Id, pubkey: PubKey, created_at: i64, kind: u16, tags: Vec<Tag>, content: &str) -> relay_core::Event {
    relay_core::Event {
        id,
        pubkey,
        created_at: Timestamp(created_at),
        kind: EventKind(kind),
        tags,
        content: content.as_bytes().to_vec(),
        sig: Sig::ZERO,
    }
}

fn tag(letter: &str, value: &str) -> Tag {
    Tag::new(vec![letter.as_bytes().to_vec(), value.as_bytes().to_vec()])
}

fn store() -> RelayStore {
    RelayStore::open_in_memory(StoreConfig::default()).expect("open in-memory store")
}

#[test_log::test]
fn s1_insert_and_find_by_id() {
    let store = store();
    let e = event(id(0x00), pubkey(0x01), 1000, 1, Vec::new(), "a");

    let outcome = store.save_event(&e).expect("save");
    match outcome {
        SaveOutcome::Saved { bytes_k, bytes_v } => {
            assert!(bytes_k > 0);
            assert!(bytes_v > 0);
        }
        other => panic!("expected Saved, got {other:?}"),
    }

    let found = store
        .query_events(&Filter { ids: vec![e.id], ..Filter::new() }, &CancelToken::new())
        .expect("query");
    assert_eq!(found, vec![e]);
}

#[test_log::test]
fn s2_replaceable_supersession() {
    let store = store();
    let p = pubkey(0xaa);
    let a = event(id(0x01), p, 100, 0, Vec::new(), "old");
    let b = event(id(0x02), p, 200, 0, Vec::new(), "new");
    store.save_event(&a).expect("save a");
    store.save_event(&b).expect("save b");

    let range = store
        .query_events(
            &Filter { authors: vec![p], kinds: vec![EventKind(0)], ..Filter::new() },
            &CancelToken::new(),
        )
        .expect("range query");
    assert_eq!(range, vec![b.clone()]);

    let by_id = store
        .query_events(&Filter { ids: vec![a.id], ..Filter::new() }, &CancelToken::new())
        .expect("id query");
    assert_eq!(by_id, vec![a]);
}

#[test_log::test]
fn s3_parameterized_replaceable_with_d_tag() {
    let store = store();
    let p = pubkey(0xbb);
    let x = event(id(0x10), p, 100, 30000, vec![tag("d", "profile")], "x");
    let y = event(id(0x11), p, 200, 30000, vec![tag("d", "profile")], "y");
    let z = event(id(0x12), p, 150, 30000, vec![tag("d", "other")], "z");
    store.save_event(&x).expect("save x");
    store.save_event(&y).expect("save y");
    store.save_event(&z).expect("save z");

    let results = store
        .query_events(
            &Filter { authors: vec![p], kinds: vec![EventKind(30000)], ..Filter::new() },
            &CancelToken::new(),
        )
        .expect("query");
    assert_eq!(results, vec![y, z]);
}

#[test_log::test]
fn s4_deletion_by_a_tag() {
    let store = store();
    let p = pubkey(0xcc);
    let y = event(id(0x20), p, 200, 30000, vec![tag("d", "profile")], "y");
    store.save_event(&y).expect("save y");

    let a_value = format!("30000:{p}:profile");
    let d = event(id(0x21), p, 300, 5, vec![tag("a", &a_value)], "");
    store.save_event(&d).expect("save deletion");

    let range = store
        .query_events(
            &Filter { authors: vec![p], kinds: vec![EventKind(30000)], ..Filter::new() },
            &CancelToken::new(),
        )
        .expect("range query");
    assert!(range.is_empty());

    let by_id = store
        .query_events(&Filter { ids: vec![y.id], ..Filter::new() }, &CancelToken::new())
        .expect("id query");
    assert_eq!(by_id, vec![y]);
}

#[test_log::test]
fn s5_time_range() {
    let store = store();
    let p = pubkey(0xdd);
    for (i, t) in [100, 200, 300, 400, 500].into_iter().enumerate() {
        let e = event(id(0x30 + i as u8), p, t, 1, Vec::new(), "note");
        store.save_event(&e).expect("save");
    }

    let results = store
        .query_events(
            &Filter {
                authors: vec![p],
                since: Some(Timestamp(200)),
                until: Some(Timestamp(400)),
                ..Filter::new()
            },
            &CancelToken::new(),
        )
        .expect("query");

    let created_ats: Vec<i64> = results.iter().map(|e| e.created_at.0).collect();
    assert_eq!(created_ats, vec![400, 300, 200]);
}

#[test_log::test]
fn s6_tag_filter_cross_product() {
    let store = store();
    let p = pubkey(0xee);
    let x = id(0x40);
    let q = id(0x41);
    let e = event(
        id(0x42),
        p,
        1000,
        1,
        vec![tag("e", &x.to_string()), tag("p", &q.to_string())],
        "",
    );
    store.save_event(&e).expect("save");

    let mut tags = std::collections::BTreeMap::new();
    tags.insert(b'e', vec![x.to_string().into_bytes()]);

    let results = store
        .query_events(
            &Filter {
                kinds: vec![EventKind(1)],
                authors: vec![p],
                tags,
                ..Filter::new()
            },
            &CancelToken::new(),
        )
        .expect("query");
    assert_eq!(results, vec![e]);
}

#[test_log::test]
fn p3_monotone_serials_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.redb");

    let s1 = {
        let store = RelayStore::open(&path, StoreConfig::default()).expect("open");
        let a = event(id(0x50), pubkey(0x01), 100, 1, Vec::new(), "a");
        store.save_event(&a).expect("save a");
        let serials = store
            .query_for_serials(&Filter { ids: vec![a.id], ..Filter::new() }, &CancelToken::new())
            .expect("query");
        store.close().expect("close");
        serials[0]
    };

    let store = RelayStore::open(&path, StoreConfig::default()).expect("reopen");
    let b = event(id(0x51), pubkey(0x01), 200, 1, Vec::new(), "b");
    store.save_event(&b).expect("save b");
    let serials = store
        .query_for_serials(&Filter { ids: vec![b.id], ..Filter::new() }, &CancelToken::new())
        .expect("query");
    assert!(serials[0] > s1);
}

#[test_log::test]
fn p5_tombstone_idempotence() {
    let store = store();
    let e = event(id(0x60), pubkey(0x02), 100, 1, Vec::new(), "x");
    store.save_event(&e).expect("save");
    store.delete_event(e.id, true).expect("delete with tombstone");

    let outcome = store.save_event(&e).expect("re-save attempt");
    assert_eq!(outcome, SaveOutcome::Tombstoned);

    let found = store
        .query_events(&Filter { ids: vec![e.id], ..Filter::new() }, &CancelToken::new())
        .expect("query");
    assert!(found.is_empty());
}

#[test_log::test]
fn p8_deletion_ordering() {
    let store = store();
    let p = pubkey(0x03);
    let e = event(id(0x70), p, 100, 1, Vec::new(), "e");
    store.save_event(&e).expect("save e");

    let early_delete = event(id(0x71), p, 50, 5, vec![tag("e", &e.id.to_string())], "");
    store.save_event(&early_delete).expect("save early deletion");

    let still_visible = store
        .query_events(
            &Filter { authors: vec![p], kinds: vec![EventKind(1)], ..Filter::new() },
            &CancelToken::new(),
        )
        .expect("query");
    assert_eq!(still_visible, vec![e.clone()]);

    let late_delete = event(id(0x72), p, 200, 5, vec![tag("e", &e.id.to_string())], "");
    store.save_event(&late_delete).expect("save late deletion");

    let gone = store
        .query_events(
            &Filter { authors: vec![p], kinds: vec![EventKind(1)], ..Filter::new() },
            &CancelToken::new(),
        )
        .expect("query");
    assert!(gone.is_empty());

    let by_id = store
        .query_events(&Filter { ids: vec![e.id], ..Filter::new() }, &CancelToken::new())
        .expect("id query");
    assert_eq!(by_id, vec![e]);
}

#[test_log::test]
fn deletion_of_a_deletion_is_rejected() {
    let store = store();
    let p = pubkey(0x04);
    let d1 = event(id(0x80), p, 100, 5, vec![tag("e", &id(0x81).to_string())], "");
    store.save_event(&d1).expect("save d1");

    let d2 = event(id(0x82), p, 200, 5, vec![tag("e", &d1.id.to_string())], "");
    store.save_event(&d2).expect("save d2");

    let still_there = store
        .query_events(&Filter { ids: vec![d1.id], ..Filter::new() }, &CancelToken::new())
        .expect("id query");
    assert_eq!(still_there, vec![d1]);
}

#[test_log::test]
fn duplicate_save_is_reported_not_errored() {
    let store = store();
    let e = event(id(0x90), pubkey(0x05), 100, 1, Vec::new(), "x");
    assert!(matches!(store.save_event(&e).expect("first save"), SaveOutcome::Saved { .. }));
    assert_eq!(store.save_event(&e).expect("second save"), SaveOutcome::Duplicate);
}

/// P1/P10 stress: a randomized batch of events, saved in random order,
/// must all round-trip by id and come back ordered by descending
/// `created_at` (ties by descending serial) from an unfiltered scan.
#[test_log::test]
fn p1_p10_randomized_round_trip_and_ordering() {
    let mut rng = rand::rng();
    let store = store();
    let author = pubkey(0x07);

    let mut events: Vec<relay_core::Event> = (0..200u32)
        .map(|i| {
            let mut id_bytes = [0u8; 32];
            rng.fill(&mut id_bytes);
            let created_at = rng.random_range(1..1_000_000);
            event(Id::from_bytes(id_bytes), author, created_at, 1, Vec::new(), &format!("note-{i}"))
        })
        .collect();

    let mut save_order = events.clone();
    save_order.shuffle(&mut rng);
    for e in &save_order {
        let outcome = store.save_event(e).expect("save");
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));
    }

    for e in &events {
        let found = store
            .query_events(&Filter { ids: vec![e.id], ..Filter::new() }, &CancelToken::new())
            .expect("id query");
        assert_eq!(found, vec![e.clone()]);
    }

    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let results = store
        .query_events(
            &Filter { authors: vec![author], kinds: vec![EventKind(1)], limit: Some(events.len()), ..Filter::new() },
            &CancelToken::new(),
        )
        .expect("range query");
    let result_ts: Vec<i64> = results.iter().map(|e| e.created_at.0).collect();
    let expected_ts: Vec<i64> = events.iter().map(|e| e.created_at.0).collect();
    assert_eq!(result_ts, expected_ts);
}
