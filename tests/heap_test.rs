mod common;

use minirel::schema::{ColumnInfo, ColumnType, Schema};
use minirel::tuple::Value;
use minirel::{FilePointer, Flow, StorageError, StorageResult};
use tempfile::TempDir;

use crate::common::{collect_rows, open_engine, people_schema, row, setup};

#[test]
fn heap_round_trip() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();

    let p1 = engine.add_tuple(&mut session, "t", row(1, Some("ada"))).unwrap();
    let p2 = engine.add_tuple(&mut session, "t", row(2, Some("bob"))).unwrap();
    engine.add_tuple(&mut session, "t", row(3, None)).unwrap();

    assert_eq!(
        collect_rows(&mut engine, &mut session, "t"),
        vec![row(1, Some("ada")), row(2, Some("bob")), row(3, None)]
    );

    // Update in place, growing the VARCHAR.
    engine
        .update_tuple(
            &mut session,
            "t",
            p2,
            &[("name".to_string(), Value::Str("beatrix".into()))],
        )
        .unwrap();
    assert_eq!(
        collect_rows(&mut engine, &mut session, "t"),
        vec![row(1, Some("ada")), row(2, Some("beatrix")), row(3, None)]
    );

    engine.delete_tuple(&mut session, "t", p1).unwrap();
    assert_eq!(
        collect_rows(&mut engine, &mut session, "t"),
        vec![row(2, Some("beatrix")), row(3, None)]
    );

    engine.close().unwrap();
}

#[test]
fn table_survives_reopen() {
    setup();
    let dir = TempDir::new().unwrap();

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();
        for i in 0..10 {
            engine
                .add_tuple(&mut session, "t", row(i, Some("x")))
                .unwrap();
        }
        engine.close().unwrap();
    }

    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();
    assert_eq!(collect_rows(&mut engine, &mut session, "t").len(), 10);
    assert_eq!(engine.table_schema("t").unwrap(), &people_schema());
    engine.close().unwrap();
}

#[test]
fn updates_grow_and_shrink_neighbors_intact() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    let ptrs: Vec<FilePointer> = (0..5)
        .map(|i| {
            engine
                .add_tuple(&mut session, "t", row(i, Some("aaaa")))
                .unwrap()
        })
        .collect();

    // Grow the middle tuple, shrink another, null a third.
    engine
        .update_tuple(
            &mut session,
            "t",
            ptrs[2],
            &[("name".to_string(), Value::Str("a much longer value here".into()))],
        )
        .unwrap();
    engine
        .update_tuple(
            &mut session,
            "t",
            ptrs[1],
            &[("name".to_string(), Value::Str("a".into()))],
        )
        .unwrap();
    engine
        .update_tuple(&mut session, "t", ptrs[4], &[("name".to_string(), Value::Null)])
        .unwrap();

    // External references are stable: re-read every tuple through its
    // pointer.
    assert_eq!(
        engine.get_tuple(&mut session, "t", ptrs[0]).unwrap(),
        row(0, Some("aaaa"))
    );
    assert_eq!(
        engine.get_tuple(&mut session, "t", ptrs[1]).unwrap(),
        row(1, Some("a"))
    );
    assert_eq!(
        engine.get_tuple(&mut session, "t", ptrs[2]).unwrap(),
        row(2, Some("a much longer value here"))
    );
    assert_eq!(
        engine.get_tuple(&mut session, "t", ptrs[3]).unwrap(),
        row(3, Some("aaaa"))
    );
    assert_eq!(engine.get_tuple(&mut session, "t", ptrs[4]).unwrap(), row(4, None));

    engine.close().unwrap();
}

#[test]
fn deleted_pointer_is_invalid() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    let ptr = engine.add_tuple(&mut session, "t", row(1, None)).unwrap();
    engine.delete_tuple(&mut session, "t", ptr).unwrap();

    assert!(matches!(
        engine.get_tuple(&mut session, "t", ptr),
        Err(StorageError::InvalidFilePointer { .. })
    ));
    assert!(matches!(
        engine.get_tuple(&mut session, "t", FilePointer::new(99, 4)),
        Err(StorageError::InvalidFilePointer { .. })
    ));

    engine.close().unwrap();
}

#[test]
fn inserts_spill_across_pages() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();

    // Each row is ~40 bytes; hundreds of them need many 512-byte pages.
    let n = 400;
    for i in 0..n {
        engine
            .add_tuple(&mut session, "t", row(i, Some("abcdefghijklmnopqrstuvwxyz")))
            .unwrap();
    }

    let rows = collect_rows(&mut engine, &mut session, "t");
    assert_eq!(rows.len(), n as usize);
    let ids: Vec<i32> = rows
        .iter()
        .map(|r| match r[0] {
            Value::Int(v) => v,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(ids, (0..n).collect::<Vec<_>>());

    engine.analyze_table(&mut session, "t").unwrap();
    let stats = engine.table_stats("t").unwrap();
    assert_eq!(stats.num_tuples, n as u32);
    assert!(stats.num_data_pages > 1);
    assert!(stats.avg_tuple_size > 0.0);
    assert_eq!(stats.columns[0].num_distinct, Some(n as u32));
    assert_eq!(stats.columns[0].num_nulls, Some(0));
    assert_eq!(stats.columns[0].min, Some(Value::Int(0)));
    assert_eq!(stats.columns[0].max, Some(Value::Int(n - 1)));

    engine.close().unwrap();
}

#[test]
fn analyze_survives_reopen() {
    setup();
    let dir = TempDir::new().unwrap();

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();
        engine.add_tuple(&mut session, "t", row(7, None)).unwrap();
        engine
            .add_tuple(&mut session, "t", row(9, Some("zoe")))
            .unwrap();
        engine.analyze_table(&mut session, "t").unwrap();
        engine.close().unwrap();
    }

    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();
    let stats = engine.table_stats("t").unwrap();
    assert_eq!(stats.num_tuples, 2);
    assert_eq!(stats.columns[1].num_nulls, Some(1));
    assert_eq!(stats.columns[1].max, Some(Value::Str("zoe".into())));
    engine.close().unwrap();
}

#[test]
fn oversize_tuple_is_a_schema_violation() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    let schema = Schema::new(vec![
        ColumnInfo::new("id", ColumnType::Integer),
        ColumnInfo::new("blob", ColumnType::Varchar(2000)),
    ])
    .unwrap();
    engine.create_table(&mut session, "t", schema).unwrap();

    // A 2000-byte VARCHAR cannot fit a 512-byte page.
    let result = engine.add_tuple(
        &mut session,
        "t",
        vec![Value::Int(1), Value::Str("x".repeat(2000))],
    );
    assert!(matches!(result, Err(StorageError::SchemaViolation(_))));

    engine.close().unwrap();
}

#[test]
fn scan_can_stop_early() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    for i in 0..20 {
        engine.add_tuple(&mut session, "t", row(i, None)).unwrap();
    }

    let mut seen = 0;
    let mut sink = |_: FilePointer, _: &[Value]| -> StorageResult<Flow> {
        seen += 1;
        Ok(if seen == 5 { Flow::Stop } else { Flow::Continue })
    };
    engine.scan_table(&mut session, "t", &mut sink).unwrap();
    assert_eq!(seen, 5);

    engine.close().unwrap();
}

#[test]
fn primary_key_null_is_rejected() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    let schema = Schema::with_constraints(
        vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("name", ColumnType::Varchar(32)),
        ],
        vec![minirel::schema::KeyConstraint::PrimaryKey {
            name: None,
            columns: vec![0],
            index_name: "t_pk.idx".to_string(),
        }],
    )
    .unwrap();
    engine.create_table(&mut session, "t", schema).unwrap();

    assert!(matches!(
        engine.add_tuple(&mut session, "t", row(1, None)).and_then(|_| {
            engine.add_tuple(
                &mut session,
                "t",
                vec![Value::Null, Value::Str("x".into())],
            )
        }),
        Err(StorageError::SchemaViolation(_))
    ));

    // The enforcing index rejects duplicate ids.
    assert!(matches!(
        engine.add_tuple(&mut session, "t", row(1, Some("again"))),
        Err(StorageError::SchemaViolation(_))
    ));
    assert_eq!(collect_rows(&mut engine, &mut session, "t").len(), 1);

    engine.close().unwrap();
}

#[test]
fn transactions_off_still_stores_tuples() {
    setup();
    let dir = TempDir::new().unwrap();

    let mut config = common::small_config(dir.path());
    config.transactions = false;
    {
        let mut engine = minirel::Engine::open(config.clone()).unwrap();
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();
        engine
            .add_tuple(&mut session, "t", row(1, Some("ada")))
            .unwrap();
        assert!(matches!(
            engine.begin_transaction(&mut session),
            Err(StorageError::TransactionsDisabled)
        ));
        engine.close().unwrap();
    }

    // No log or transaction-state files appear in the base directory.
    assert!(!dir.path().join("txnstate.dat").exists());
    assert!(!dir.path().join("wal-00000.log").exists());

    let mut engine = minirel::Engine::open(config).unwrap();
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();
    assert_eq!(
        collect_rows(&mut engine, &mut session, "t"),
        vec![row(1, Some("ada"))]
    );
    engine.close().unwrap();
}
