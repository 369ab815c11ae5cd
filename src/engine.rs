//! The engine: one context object owning the file manager, buffer manager,
//! transaction manager, event dispatcher and open-table registry.
//!
//! Sessions are first-class values handed out by the engine; each carries
//! its own transaction state, and its pinned pages are released at the end
//! of every statement regardless of how the statement exits. Collaborators
//! reach each other through explicit [`Exec`] borrows rather than global
//! state.

use std::collections::HashMap;

use log::{debug, info};

use crate::btree::header_page::IndexMeta;
use crate::btree::{verify, BTreeIndexFile, IndexKey};
use crate::buffer::BufferManager;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::event::{EventDispatcher, Flow, IndexUpdater, TupleProcessor};
use crate::heap::{FilePointer, HeapTableFile};
use crate::schema::stats::TableStats;
use crate::schema::{KeyConstraint, Schema};
use crate::storage::file::DbFile;
use crate::storage::file_manager::FileManager;
use crate::storage::page::PagePod;
use crate::transaction::recovery;
use crate::transaction::{TransactionManager, TransactionState};
use crate::tuple::Value;
use crate::util::HandyRwLock;

/// A client session: an id plus per-session transaction state.
pub struct Session {
    id: u32,
    pub(crate) txn: TransactionState,
}

impl Session {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.in_progress()
    }
}

/// An open table: its heap file plus every open index over it.
pub struct TableEntry {
    pub(crate) heap: HeapTableFile,
    pub(crate) indexes: Vec<BTreeIndexFile>,
}

impl TableEntry {
    pub fn schema(&self) -> &Schema {
        self.heap.schema()
    }

    pub fn stats(&self) -> &TableStats {
        self.heap.stats()
    }
}

/// Statement-scoped view of the engine's collaborators, threaded through
/// the storage layers instead of process-wide singletons.
pub struct Exec<'a> {
    pub(crate) fm: &'a FileManager,
    pub(crate) buffer: &'a mut BufferManager,
    pub(crate) txn: Option<&'a mut TransactionManager>,
    pub(crate) txn_state: &'a mut TransactionState,
    pub(crate) session_id: u32,
}

impl<'a> Exec<'a> {
    /// Fetch-and-pin a page for this session.
    pub(crate) fn fetch(
        &mut self,
        file: &DbFile,
        page_no: u32,
        create: bool,
    ) -> StorageResult<PagePod> {
        self.buffer.fetch_page(
            self.fm,
            self.txn.as_deref_mut(),
            file,
            page_no,
            create,
            self.session_id,
        )
    }

    /// Write a dirty page's delta into the WAL and stamp its LSN. With
    /// transactions off, just resets the page's diff base.
    pub(crate) fn log_page(&mut self, page: &PagePod) -> StorageResult<()> {
        match self.txn.as_deref_mut() {
            Some(t) => t.record_page_update(self.fm, self.buffer, self.txn_state, page),
            None => {
                page.wl().sync_old_data();
                Ok(())
            }
        }
    }

    pub(crate) fn unpin(&mut self, page: &PagePod) {
        self.buffer.unpin_page(page, self.session_id);
    }
}

pub struct Engine {
    config: StorageConfig,
    fm: FileManager,
    buffer: BufferManager,
    txn: Option<TransactionManager>,
    dispatcher: EventDispatcher,
    tables: HashMap<String, TableEntry>,
    next_session_id: u32,
}

impl Engine {
    /// Bring the storage core up: create the base directory, open or create
    /// the transaction state, and run crash recovery before anything else
    /// touches the files.
    pub fn open(config: StorageConfig) -> StorageResult<Engine> {
        let fm = FileManager::new(&config.base_dir)?;
        let mut buffer =
            BufferManager::new(config.cache_size, config.cache_policy, config.transactions);

        let txn = if config.transactions {
            let mut t = TransactionManager::open(&fm, &mut buffer, config.page_size)?;
            recovery::recover(&mut t, &fm, &mut buffer)?;
            Some(t)
        } else {
            None
        };

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(Box::new(IndexUpdater));

        info!(
            "engine open at {:?} (transactions {})",
            config.base_dir,
            if txn.is_some() { "on" } else { "off" }
        );
        Ok(Engine {
            config,
            fm,
            buffer,
            txn,
            dispatcher,
            tables: HashMap::new(),
            next_session_id: 1,
        })
    }

    /// Flush everything, force the log, collapse the redo window, and sync.
    pub fn close(mut self) -> StorageResult<()> {
        self.buffer.flush_all(&self.fm, self.txn.as_mut())?;
        if let Some(t) = &mut self.txn {
            t.shutdown(&self.fm, &mut self.buffer)?;
        }
        for name in self.fm.open_file_names() {
            let file = self.fm.open_file(&name)?;
            self.fm.sync_file(&file)?;
        }
        info!("engine closed");
        Ok(())
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn create_session(&mut self) -> Session {
        let id = self.next_session_id;
        self.next_session_id += 1;
        Session {
            id,
            txn: TransactionState::default(),
        }
    }

    fn table_file_name(table: &str) -> String {
        format!("{}.tbl", table)
    }

    fn index_file_name(index: &str) -> String {
        format!("{}.idx", index)
    }

    // ---- transactions ----------------------------------------------------

    /// Explicit BEGIN from the user.
    pub fn begin_transaction(&mut self, session: &mut Session) -> StorageResult<()> {
        let t = self.txn.as_mut().ok_or(StorageError::TransactionsDisabled)?;
        t.begin(&mut session.txn, true)
    }

    pub fn commit_transaction(&mut self, session: &mut Session) -> StorageResult<()> {
        let t = self.txn.as_mut().ok_or(StorageError::TransactionsDisabled)?;
        let result = t.commit(&self.fm, &mut self.buffer, &mut session.txn);
        self.buffer.unpin_all_for_session(session.id);
        result
    }

    pub fn rollback_transaction(&mut self, session: &mut Session) -> StorageResult<()> {
        let t = self.txn.as_mut().ok_or(StorageError::TransactionsDisabled)?;
        let result = t.rollback(&self.fm, &mut self.buffer, &mut session.txn);
        self.buffer.unpin_all_for_session(session.id);
        result
    }

    /// Force the whole write-ahead log to disk.
    pub fn force_wal(&mut self) -> StorageResult<()> {
        match &mut self.txn {
            Some(t) => t.force_wal(&self.fm, &mut self.buffer),
            None => Ok(()),
        }
    }

    /// Statement prologue: auto-start a transaction when none is running.
    fn stmt_begin(&mut self, session: &mut Session) -> StorageResult<bool> {
        if let Some(t) = &mut self.txn {
            if !session.txn.in_progress() {
                t.begin(&mut session.txn, false)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Statement epilogue: auto-commit (or roll back on failure) statements
    /// that auto-started their transaction, and release every pin the
    /// session holds.
    fn stmt_end(&mut self, session: &mut Session, auto: bool, succeeded: bool) -> StorageResult<()> {
        let result = if auto {
            match &mut self.txn {
                Some(t) if succeeded => t.commit(&self.fm, &mut self.buffer, &mut session.txn),
                Some(t) => t.rollback(&self.fm, &mut self.buffer, &mut session.txn),
                None => Ok(()),
            }
        } else {
            Ok(())
        };
        self.buffer.unpin_all_for_session(session.id);
        result
    }

    // ---- tables ----------------------------------------------------------

    /// Create a table file; primary and candidate key constraints get their
    /// enforcing (unique) indexes created alongside.
    pub fn create_table(
        &mut self,
        session: &mut Session,
        name: &str,
        schema: Schema,
    ) -> StorageResult<()> {
        if self.tables.contains_key(name) {
            return Err(StorageError::FileExists(Self::table_file_name(name)));
        }

        let auto = self.stmt_begin(session)?;
        let result = self.do_create_table(session, name, schema);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_create_table(
        &mut self,
        session: &mut Session,
        name: &str,
        schema: Schema,
    ) -> StorageResult<()> {
        let page_size = self.config.page_size;
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        let heap = HeapTableFile::create(&mut ctx, &Self::table_file_name(name), schema, page_size)?;

        let mut indexes = Vec::new();
        for constraint in heap.schema().constraints().to_vec() {
            let (columns, index_name) = match constraint {
                KeyConstraint::PrimaryKey {
                    columns,
                    index_name,
                    ..
                }
                | KeyConstraint::CandidateKey {
                    columns,
                    index_name,
                    ..
                } => (columns, index_name),
                KeyConstraint::ForeignKey { .. } => continue,
            };
            let meta = IndexMeta {
                unique: true,
                table_name: name.to_string(),
                column_indices: columns,
            };
            indexes.push(BTreeIndexFile::create(
                &mut ctx,
                &index_name,
                heap.schema(),
                meta,
                page_size,
            )?);
        }

        tables.insert(name.to_string(), TableEntry { heap, indexes });
        debug!("created table {}", name);
        Ok(())
    }

    /// Open an existing table and the enforcing indexes its constraints
    /// name. Further indexes are attached with [`Engine::open_index`].
    pub fn open_table(&mut self, session: &mut Session, name: &str) -> StorageResult<()> {
        if self.tables.contains_key(name) {
            return Ok(());
        }

        let auto = self.stmt_begin(session)?;
        let result = self.do_open_table(session, name);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_open_table(&mut self, session: &mut Session, name: &str) -> StorageResult<()> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        let heap = HeapTableFile::open(&mut ctx, &Self::table_file_name(name))?;

        let mut indexes = Vec::new();
        for constraint in heap.schema().constraints() {
            let index_name = match constraint {
                KeyConstraint::PrimaryKey { index_name, .. }
                | KeyConstraint::CandidateKey { index_name, .. } => index_name.clone(),
                KeyConstraint::ForeignKey { .. } => continue,
            };
            if ctx.fm.file_exists(&index_name) {
                indexes.push(BTreeIndexFile::open(&mut ctx, &index_name, heap.schema())?);
            }
        }

        tables.insert(name.to_string(), TableEntry { heap, indexes });
        Ok(())
    }

    /// Drop a table, its indexes, and every cached page of theirs.
    pub fn drop_table(&mut self, session: &mut Session, name: &str) -> StorageResult<()> {
        let entry = self
            .tables
            .remove(name)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", name)))?;

        self.buffer.unpin_all_for_session(session.id);
        self.buffer.discard_file(entry.heap.file());
        self.fm.delete_file(entry.heap.file().name())?;
        for index in &entry.indexes {
            self.buffer.discard_file(index.file());
            self.fm.delete_file(index.file().name())?;
        }
        debug!("dropped table {}", name);
        Ok(())
    }

    fn entry(&self, table: &str) -> StorageResult<&TableEntry> {
        self.tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))
    }

    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.get(name)
    }

    pub fn table_schema(&self, table: &str) -> StorageResult<&Schema> {
        Ok(self.entry(table)?.heap.schema())
    }

    pub fn table_stats(&self, table: &str) -> StorageResult<&TableStats> {
        Ok(self.entry(table)?.heap.stats())
    }

    // ---- indexes ---------------------------------------------------------

    /// Create a secondary index over named columns and backfill it from the
    /// table's current contents.
    pub fn create_index(
        &mut self,
        session: &mut Session,
        table: &str,
        index: &str,
        columns: &[&str],
        unique: bool,
    ) -> StorageResult<()> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_create_index(session, table, index, columns, unique);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_create_index(
        &mut self,
        session: &mut Session,
        table: &str,
        index: &str,
        columns: &[&str],
        unique: bool,
    ) -> StorageResult<()> {
        let page_size = self.config.page_size;
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        let column_indices = columns
            .iter()
            .map(|c| entry.heap.schema().column_index(c).map(|i| i as u8))
            .collect::<StorageResult<Vec<u8>>>()?;
        let meta = IndexMeta {
            unique,
            table_name: table.to_string(),
            column_indices,
        };
        let index_file = BTreeIndexFile::create(
            &mut ctx,
            &Self::index_file_name(index),
            entry.heap.schema(),
            meta,
            page_size,
        )?;

        // Backfill from the heap's current contents.
        let mut current = entry.heap.get_first_tuple(&mut ctx)?;
        while let Some(tuple) = current {
            index_file.add_entry(&mut ctx, &index_file.make_key(tuple.values(), tuple.file_pointer()))?;
            let next = entry.heap.get_next_tuple(&mut ctx, &tuple)?;
            ctx.unpin(tuple.page());
            current = next;
        }

        entry.indexes.push(index_file);
        debug!("created index {} on {}", index, table);
        Ok(())
    }

    /// Attach an already-existing index file to an open table.
    pub fn open_index(
        &mut self,
        session: &mut Session,
        table: &str,
        index_file_name: &str,
    ) -> StorageResult<()> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };
        let index = BTreeIndexFile::open(&mut ctx, index_file_name, entry.heap.schema())?;
        entry.indexes.push(index);
        self.buffer.unpin_all_for_session(session.id);
        Ok(())
    }

    /// Run the structural verifier over one index, returning what it saw.
    pub fn verify_index(
        &mut self,
        session: &mut Session,
        table: &str,
        index_file_name: &str,
    ) -> StorageResult<verify::IndexSummary> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let entry = tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let index = entry
            .indexes
            .iter()
            .find(|i| i.name() == index_file_name)
            .ok_or_else(|| StorageError::schema(format!("no such index {}", index_file_name)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };
        let result = verify::verify(index, &mut ctx);
        self.buffer.unpin_all_for_session(session.id);
        result
    }

    // ---- tuples ----------------------------------------------------------

    /// Insert one row, firing row events so indexes stay consistent.
    /// Returns the new tuple's external reference.
    pub fn add_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        values: Vec<Value>,
    ) -> StorageResult<FilePointer> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_add_tuple(session, table, values);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_add_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        values: Vec<Value>,
    ) -> StorageResult<FilePointer> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            dispatcher,
            ..
        } = self;
        let entry = tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        for listener in dispatcher.listeners() {
            listener.before_row_inserted(&mut ctx, entry, &values)?;
        }
        let tuple = entry.heap.add_tuple(&mut ctx, values)?;
        for listener in dispatcher.listeners() {
            listener.after_row_inserted(&mut ctx, entry, &tuple)?;
        }
        Ok(tuple.file_pointer())
    }

    /// Read one row by external reference.
    pub fn get_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        ptr: FilePointer,
    ) -> StorageResult<Vec<Value>> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_get_tuple(session, table, ptr);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_get_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        ptr: FilePointer,
    ) -> StorageResult<Vec<Value>> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let entry = tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };
        let tuple = entry.heap.get_tuple(&mut ctx, ptr)?;
        Ok(tuple.values().to_vec())
    }

    /// Update named columns of one row.
    pub fn update_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        ptr: FilePointer,
        changes: &[(String, Value)],
    ) -> StorageResult<()> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_update_tuple(session, table, ptr, changes);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_update_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        ptr: FilePointer,
        changes: &[(String, Value)],
    ) -> StorageResult<()> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            dispatcher,
            ..
        } = self;
        let entry = tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        let mut tuple = entry.heap.get_tuple(&mut ctx, ptr)?;
        let old_values = tuple.values().to_vec();

        for listener in dispatcher.listeners() {
            listener.before_row_updated(&mut ctx, entry, &tuple, changes)?;
        }
        entry.heap.update_tuple(&mut ctx, &mut tuple, changes)?;
        for listener in dispatcher.listeners() {
            listener.after_row_updated(&mut ctx, entry, &old_values, &tuple)?;
        }
        Ok(())
    }

    /// Delete one row by external reference.
    pub fn delete_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        ptr: FilePointer,
    ) -> StorageResult<()> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_delete_tuple(session, table, ptr);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_delete_tuple(
        &mut self,
        session: &mut Session,
        table: &str,
        ptr: FilePointer,
    ) -> StorageResult<()> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            dispatcher,
            ..
        } = self;
        let entry = tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        let tuple = entry.heap.get_tuple(&mut ctx, ptr)?;
        for listener in dispatcher.listeners() {
            listener.before_row_deleted(&mut ctx, entry, &tuple)?;
        }
        let old_values = tuple.values().to_vec();
        entry.heap.delete_tuple(&mut ctx, &tuple)?;
        for listener in dispatcher.listeners() {
            listener.after_row_deleted(&mut ctx, entry, &old_values, ptr)?;
        }
        Ok(())
    }

    /// Full-table scan in physical order, feeding each tuple to the
    /// processor until it stops the scan.
    pub fn scan_table(
        &mut self,
        session: &mut Session,
        table: &str,
        processor: &mut dyn TupleProcessor,
    ) -> StorageResult<()> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_scan_table(session, table, processor);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_scan_table(
        &mut self,
        session: &mut Session,
        table: &str,
        processor: &mut dyn TupleProcessor,
    ) -> StorageResult<()> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let entry = tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        let mut current = entry.heap.get_first_tuple(&mut ctx)?;
        while let Some(tuple) = current {
            let flow = processor.process(tuple.file_pointer(), tuple.values())?;
            if flow == Flow::Stop {
                ctx.unpin(tuple.page());
                return Ok(());
            }
            let next = entry.heap.get_next_tuple(&mut ctx, &tuple)?;
            ctx.unpin(tuple.page());
            current = next;
        }
        Ok(())
    }

    /// Ordered scan over an index from the first key at-or-after `prefix`
    /// (the whole index when `prefix` is empty). The processor receives each
    /// entry's heap reference and its key values.
    pub fn scan_index(
        &mut self,
        session: &mut Session,
        table: &str,
        index_file_name: &str,
        prefix: &[Value],
        processor: &mut dyn TupleProcessor,
    ) -> StorageResult<()> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_scan_index(session, table, index_file_name, prefix, processor);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_scan_index(
        &mut self,
        session: &mut Session,
        table: &str,
        index_file_name: &str,
        prefix: &[Value],
        processor: &mut dyn TupleProcessor,
    ) -> StorageResult<()> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let entry = tables
            .get(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let index = entry
            .indexes
            .iter()
            .find(|i| i.name() == index_file_name)
            .ok_or_else(|| StorageError::schema(format!("no such index {}", index_file_name)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };

        let consume = |key: &IndexKey| processor.process(key.ptr, &key.values);
        if prefix.is_empty() {
            index.scan_all(&mut ctx, consume)
        } else {
            index.scan_from(&mut ctx, prefix, consume)
        }
    }

    /// Refresh the table's statistics with one full scan.
    pub fn analyze_table(&mut self, session: &mut Session, table: &str) -> StorageResult<()> {
        let auto = self.stmt_begin(session)?;
        let result = self.do_analyze_table(session, table);
        let ok = result.is_ok();
        self.stmt_end(session, auto, ok)?;
        result
    }

    fn do_analyze_table(&mut self, session: &mut Session, table: &str) -> StorageResult<()> {
        let Engine {
            fm,
            buffer,
            txn,
            tables,
            ..
        } = self;
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::schema(format!("no such table {}", table)))?;
        let mut ctx = Exec {
            fm,
            buffer,
            txn: txn.as_mut(),
            txn_state: &mut session.txn,
            session_id: session.id,
        };
        entry.heap.analyze(&mut ctx)
    }

    /// Dump the WAL through the `log` facade; debugging aid.
    pub fn dump_wal(&mut self) -> StorageResult<()> {
        match &mut self.txn {
            Some(t) => t.dump_log(&self.fm, &mut self.buffer),
            None => Ok(()),
        }
    }

    /// Bytes currently held by the page cache.
    pub fn cached_bytes(&self) -> usize {
        self.buffer.total_bytes_cached()
    }
}
