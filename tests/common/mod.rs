#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;

use minirel::config::{CachePolicy, StorageConfig};
use minirel::engine::{Engine, Session};
use minirel::schema::{ColumnInfo, ColumnType, Schema};
use minirel::tuple::Value;
use minirel::{FilePointer, Flow, StorageResult};

static INIT: Once = Once::new();

/// Install the test log subscriber once per process.
pub fn setup() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).try_init().ok();
    });
}

/// A small engine: 512-byte pages, a 16-page cache, transactions on.
pub fn small_config<P: AsRef<Path>>(base_dir: P) -> StorageConfig {
    let mut config = StorageConfig::with_base_dir(base_dir.as_ref());
    config.page_size = 512;
    config.cache_size = 16 * 512;
    config.cache_policy = CachePolicy::Lru;
    config.transactions = true;
    config
}

pub fn open_engine<P: AsRef<Path>>(base_dir: P) -> Engine {
    Engine::open(small_config(base_dir)).unwrap()
}

pub fn people_schema() -> Schema {
    Schema::new(vec![
        ColumnInfo::new("id", ColumnType::Integer),
        ColumnInfo::new("name", ColumnType::Varchar(32)),
    ])
    .unwrap()
}

pub fn row(id: i32, name: Option<&str>) -> Vec<Value> {
    vec![
        Value::Int(id),
        match name {
            Some(n) => Value::Str(n.to_string()),
            None => Value::Null,
        },
    ]
}

/// Scan a table into memory, in physical order.
pub fn collect_rows(engine: &mut Engine, session: &mut Session, table: &str) -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    let mut sink = |_: FilePointer, values: &[Value]| -> StorageResult<Flow> {
        rows.push(values.to_vec());
        Ok(Flow::Continue)
    };
    engine.scan_table(session, table, &mut sink).unwrap();
    rows
}

/// Scan an index into memory, in key order, returning the key values.
pub fn collect_index_keys(
    engine: &mut Engine,
    session: &mut Session,
    table: &str,
    index: &str,
    prefix: &[Value],
) -> Vec<Vec<Value>> {
    let mut keys = Vec::new();
    let mut sink = |_: FilePointer, values: &[Value]| -> StorageResult<Flow> {
        keys.push(values.to_vec());
        Ok(Flow::Continue)
    };
    engine
        .scan_index(session, table, index, prefix, &mut sink)
        .unwrap();
    keys
}
