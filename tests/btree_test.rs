mod common;

use minirel::tuple::Value;
use minirel::{FilePointer, Flow, StorageResult};
use rand::prelude::*;
use tempfile::TempDir;

use crate::common::{collect_index_keys, open_engine, people_schema, row, setup};

fn ids_of(keys: &[Vec<Value>]) -> Vec<i32> {
    keys.iter()
        .map(|k| match k[0] {
            Value::Int(v) => v,
            _ => unreachable!(),
        })
        .collect()
}

#[test]
fn index_grows_and_splits_on_ascending_inserts() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    engine
        .create_index(&mut session, "t", "t_id", &["id"], true)
        .unwrap();

    let n = 1000;
    for i in 1..=n {
        engine
            .add_tuple(&mut session, "t", row(i, Some("name")))
            .unwrap();
    }

    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[]);
    assert_eq!(ids_of(&keys), (1..=n).collect::<Vec<_>>());

    let summary = engine.verify_index(&mut session, "t", "t_id.idx").unwrap();
    assert_eq!(summary.num_entries, n as usize);
    assert!(summary.height >= 2, "height was {}", summary.height);
    assert!(summary.num_leaves > 1);

    engine.close().unwrap();
}

#[test]
fn descending_and_random_insert_orders_sort() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    engine
        .create_index(&mut session, "t", "t_id", &["id"], false)
        .unwrap();

    let mut ids: Vec<i32> = (0..600).collect();
    let mut rng = rand::thread_rng();
    ids.shuffle(&mut rng);
    for &i in &ids {
        engine
            .add_tuple(&mut session, "t", row(i, Some("x")))
            .unwrap();
    }

    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[]);
    assert_eq!(ids_of(&keys), (0..600).collect::<Vec<_>>());
    engine.verify_index(&mut session, "t", "t_id.idx").unwrap();

    engine.close().unwrap();
}

#[test]
fn duplicate_logical_keys_need_distinct_rows() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    engine
        .create_index(&mut session, "t", "t_id", &["id"], false)
        .unwrap();

    // A non-unique index absorbs repeated logical keys; the uniquifier
    // keeps the entries distinct.
    for _ in 0..50 {
        engine.add_tuple(&mut session, "t", row(7, None)).unwrap();
    }
    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[]);
    assert_eq!(keys.len(), 50);
    engine.verify_index(&mut session, "t", "t_id.idx").unwrap();

    engine.close().unwrap();
}

#[test]
fn range_scan_starts_at_prefix() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    engine
        .create_index(&mut session, "t", "t_id", &["id"], true)
        .unwrap();
    for i in (0..200).step_by(2) {
        engine.add_tuple(&mut session, "t", row(i, None)).unwrap();
    }

    // From an existing key.
    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[Value::Int(100)]);
    assert_eq!(ids_of(&keys), (100..200).step_by(2).collect::<Vec<_>>());

    // From a missing key: the scan starts at the next larger one.
    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[Value::Int(101)]);
    assert_eq!(ids_of(&keys), (102..200).step_by(2).collect::<Vec<_>>());

    // Early stop.
    let mut seen = 0;
    let mut sink = |_: FilePointer, _: &[Value]| -> StorageResult<Flow> {
        seen += 1;
        Ok(if seen == 3 { Flow::Stop } else { Flow::Continue })
    };
    engine
        .scan_index(&mut session, "t", "t_id.idx", &[Value::Int(0)], &mut sink)
        .unwrap();
    assert_eq!(seen, 3);

    engine.close().unwrap();
}

#[test]
fn index_follows_updates_and_deletes() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    engine
        .create_index(&mut session, "t", "t_id", &["id"], true)
        .unwrap();

    let ptrs: Vec<FilePointer> = (0..100)
        .map(|i| engine.add_tuple(&mut session, "t", row(i, None)).unwrap())
        .collect();

    // Delete every third row; the entries disappear.
    for ptr in ptrs.iter().step_by(3) {
        engine.delete_tuple(&mut session, "t", *ptr).unwrap();
    }
    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[]);
    let expect: Vec<i32> = (0..100).filter(|i| i % 3 != 0).collect();
    assert_eq!(ids_of(&keys), expect);

    // Update a key column; the old entry is replaced by the new one.
    engine
        .update_tuple(&mut session, "t", ptrs[1], &[("id".to_string(), Value::Int(5000))])
        .unwrap();
    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[]);
    assert_eq!(*ids_of(&keys).last().unwrap(), 5000);
    assert_eq!(keys.len(), expect.len());

    engine.verify_index(&mut session, "t", "t_id.idx").unwrap();
    engine.close().unwrap();
}

#[test]
fn nulls_sort_first_in_index_order() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    engine
        .create_index(&mut session, "t", "t_name", &["name"], false)
        .unwrap();

    engine.add_tuple(&mut session, "t", row(1, Some("bob"))).unwrap();
    engine.add_tuple(&mut session, "t", row(2, None)).unwrap();
    engine.add_tuple(&mut session, "t", row(3, Some("ada"))).unwrap();

    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_name.idx", &[]);
    assert_eq!(
        keys,
        vec![
            vec![Value::Null],
            vec![Value::Str("ada".into())],
            vec![Value::Str("bob".into())],
        ]
    );

    engine.close().unwrap();
}

#[test]
fn index_survives_reopen_and_backfill_matches() {
    setup();
    let dir = TempDir::new().unwrap();

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();
        for i in 0..300 {
            engine.add_tuple(&mut session, "t", row(i, None)).unwrap();
        }
        // Created after the fact: backfilled from the heap.
        engine
            .create_index(&mut session, "t", "t_id", &["id"], true)
            .unwrap();
        let summary = engine.verify_index(&mut session, "t", "t_id.idx").unwrap();
        assert_eq!(summary.num_entries, 300);
        engine.close().unwrap();
    }

    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();
    engine.open_index(&mut session, "t", "t_id.idx").unwrap();

    let keys = collect_index_keys(&mut engine, &mut session, "t", "t_id.idx", &[]);
    assert_eq!(ids_of(&keys), (0..300).collect::<Vec<_>>());

    // New inserts keep maintaining the reopened index.
    engine.add_tuple(&mut session, "t", row(300, None)).unwrap();
    let summary = engine.verify_index(&mut session, "t", "t_id.idx").unwrap();
    assert_eq!(summary.num_entries, 301);

    engine.close().unwrap();
}
