//! minirel: the storage core of a small relational database.
//!
//! A paged file manager, a pinning buffer manager with LRU/FIFO eviction,
//! write-ahead logging with ARIES-style redo/undo recovery, slotted-page
//! heap tables with variable-length nullable tuples, and a B+Tree secondary
//! index whose keys carry tuple back-references.
//!
//! The [`engine::Engine`] owns every manager; [`engine::Session`] values
//! carry per-session transaction state. A minimal round trip:
//!
//! ```no_run
//! use minirel::config::StorageConfig;
//! use minirel::engine::Engine;
//! use minirel::schema::{ColumnInfo, ColumnType, Schema};
//! use minirel::tuple::Value;
//!
//! let mut engine = Engine::open(StorageConfig::with_base_dir("./datafiles")).unwrap();
//! let mut session = engine.create_session();
//!
//! let schema = Schema::new(vec![
//!     ColumnInfo::new("id", ColumnType::Integer),
//!     ColumnInfo::new("name", ColumnType::Varchar(32)),
//! ])
//! .unwrap();
//! engine.create_table(&mut session, "t", schema).unwrap();
//! engine
//!     .add_tuple(&mut session, "t", vec![Value::Int(1), Value::Str("ada".into())])
//!     .unwrap();
//! engine.close().unwrap();
//! ```

pub mod btree;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod heap;
pub mod io;
pub mod schema;
pub mod storage;
pub mod transaction;
pub mod tuple;
pub mod util;
pub mod wal;

pub use config::StorageConfig;
pub use engine::{Engine, Session};
pub use error::{StorageError, StorageResult};
pub use event::{Flow, TupleProcessor};
pub use heap::FilePointer;
pub use tuple::Value;
