mod common;

use minirel::tuple::Value;
use minirel::StorageError;
use tempfile::TempDir;

use crate::common::{collect_rows, open_engine, people_schema, row, setup};

/// Losing the engine without `close()` stands in for a crash: nothing
/// buffered survives, only what the WAL discipline already made durable.
#[test]
fn crash_before_commit_loses_the_transaction() {
    setup();
    let dir = TempDir::new().unwrap();

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();
        engine.close().unwrap();
    }

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine.open_table(&mut session, "t").unwrap();

        engine.begin_transaction(&mut session).unwrap();
        for i in 0..100 {
            engine
                .add_tuple(&mut session, "t", row(i, Some("ghost")))
                .unwrap();
        }
        // Make the uncommitted records durable, then crash: recovery has
        // real undo work to do.
        engine.force_wal().unwrap();
        drop(engine);
    }

    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();
    assert_eq!(collect_rows(&mut engine, &mut session, "t").len(), 0);
    engine.close().unwrap();
}

#[test]
fn crash_after_commit_keeps_the_transaction() {
    setup();
    let dir = TempDir::new().unwrap();

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();
        engine.close().unwrap();
    }

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine.open_table(&mut session, "t").unwrap();

        engine.begin_transaction(&mut session).unwrap();
        for i in 0..100 {
            engine
                .add_tuple(&mut session, "t", row(i, Some("durable")))
                .unwrap();
        }
        // Commit forces the WAL; the dirty data pages are never flushed
        // because the engine "crashes" right after.
        engine.commit_transaction(&mut session).unwrap();
        drop(engine);
    }

    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();

    let rows = collect_rows(&mut engine, &mut session, "t");
    assert_eq!(rows.len(), 100);
    assert_eq!(rows[0], row(0, Some("durable")));
    assert_eq!(rows[99], row(99, Some("durable")));
    engine.close().unwrap();
}

#[test]
fn rollback_undoes_partial_work() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    let ptrs: Vec<_> = (0..50)
        .map(|i| {
            engine
                .add_tuple(&mut session, "t", row(i, Some("base")))
                .unwrap()
        })
        .collect();
    let baseline = collect_rows(&mut engine, &mut session, "t");

    engine.begin_transaction(&mut session).unwrap();
    for ptr in ptrs.iter().take(20) {
        engine
            .update_tuple(
                &mut session,
                "t",
                *ptr,
                &[("name".to_string(), Value::Str("scribbled over".into()))],
            )
            .unwrap();
    }
    for ptr in ptrs.iter().skip(40).take(5) {
        engine.delete_tuple(&mut session, "t", *ptr).unwrap();
    }
    engine.rollback_transaction(&mut session).unwrap();

    assert_eq!(collect_rows(&mut engine, &mut session, "t"), baseline);
    engine.close().unwrap();
}

#[test]
fn rollback_then_new_work_coexist() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();

    engine.begin_transaction(&mut session).unwrap();
    engine
        .add_tuple(&mut session, "t", row(1, Some("gone")))
        .unwrap();
    engine.rollback_transaction(&mut session).unwrap();

    engine
        .add_tuple(&mut session, "t", row(2, Some("kept")))
        .unwrap();

    assert_eq!(
        collect_rows(&mut engine, &mut session, "t"),
        vec![row(2, Some("kept"))]
    );
    engine.close().unwrap();
}

#[test]
fn recovery_replays_after_crash_mid_history() {
    setup();
    let dir = TempDir::new().unwrap();

    // A committed transaction, an aborted one, then a loser at crash time.
    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();

        engine.begin_transaction(&mut session).unwrap();
        engine
            .add_tuple(&mut session, "t", row(1, Some("committed")))
            .unwrap();
        engine.commit_transaction(&mut session).unwrap();

        engine.begin_transaction(&mut session).unwrap();
        engine
            .add_tuple(&mut session, "t", row(2, Some("aborted")))
            .unwrap();
        engine.rollback_transaction(&mut session).unwrap();

        engine.begin_transaction(&mut session).unwrap();
        engine
            .add_tuple(&mut session, "t", row(3, Some("loser")))
            .unwrap();
        engine.force_wal().unwrap();
        drop(engine);
    }

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine.open_table(&mut session, "t").unwrap();
        assert_eq!(
            collect_rows(&mut engine, &mut session, "t"),
            vec![row(1, Some("committed"))]
        );
        engine.close().unwrap();
    }

    // Recovering again finds a collapsed redo window and changes nothing.
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();
    assert_eq!(
        collect_rows(&mut engine, &mut session, "t"),
        vec![row(1, Some("committed"))]
    );
    engine.close().unwrap();
}

#[test]
fn commit_without_transaction_reports_no_transaction() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    assert!(matches!(
        engine.commit_transaction(&mut session),
        Err(StorageError::NoTransaction)
    ));
    assert!(matches!(
        engine.rollback_transaction(&mut session),
        Err(StorageError::NoTransaction)
    ));

    // Double begin is rejected, state is untouched by the failure.
    engine.begin_transaction(&mut session).unwrap();
    assert!(matches!(
        engine.begin_transaction(&mut session),
        Err(StorageError::TransactionInProgress)
    ));
    engine.commit_transaction(&mut session).unwrap();
    assert!(!session.in_transaction());

    engine.close().unwrap();
}

#[test]
fn force_wal_is_idempotent() {
    setup();
    let dir = TempDir::new().unwrap();
    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();

    engine
        .create_table(&mut session, "t", people_schema())
        .unwrap();
    engine.add_tuple(&mut session, "t", row(1, None)).unwrap();

    engine.force_wal().unwrap();
    engine.force_wal().unwrap();
    engine.dump_wal().unwrap();

    assert_eq!(
        collect_rows(&mut engine, &mut session, "t"),
        vec![row(1, None)]
    );
    engine.close().unwrap();
}

#[test]
fn indexes_recover_with_their_table() {
    setup();
    let dir = TempDir::new().unwrap();

    {
        let mut engine = open_engine(dir.path());
        let mut session = engine.create_session();
        engine
            .create_table(&mut session, "t", people_schema())
            .unwrap();
        engine
            .create_index(&mut session, "t", "t_id", &["id"], true)
            .unwrap();

        engine.begin_transaction(&mut session).unwrap();
        for i in 0..200 {
            engine.add_tuple(&mut session, "t", row(i, None)).unwrap();
        }
        engine.commit_transaction(&mut session).unwrap();
        drop(engine);
    }

    let mut engine = open_engine(dir.path());
    let mut session = engine.create_session();
    engine.open_table(&mut session, "t").unwrap();
    engine.open_index(&mut session, "t", "t_id.idx").unwrap();

    let summary = engine.verify_index(&mut session, "t", "t_id.idx").unwrap();
    assert_eq!(summary.num_entries, 200);
    engine.close().unwrap();
}
