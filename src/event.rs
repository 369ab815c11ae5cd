//! Row-change events and tuple consumers.
//!
//! The heap manager's mutations fire before/after events to registered
//! listeners; the index updater is the listener that keeps every index of a
//! table consistent with its heap file. Scans push tuples into a
//! [`TupleProcessor`], which can short-circuit.

use crate::engine::{Exec, TableEntry};
use crate::error::{StorageError, StorageResult};
use crate::heap::{FilePointer, PageTuple};
use crate::tuple::Value;

/// Whether a consumer wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A pull-free tuple consumer; scans feed it until it stops them.
pub trait TupleProcessor {
    fn process(&mut self, ptr: FilePointer, values: &[Value]) -> StorageResult<Flow>;
}

impl<F> TupleProcessor for F
where
    F: FnMut(FilePointer, &[Value]) -> StorageResult<Flow>,
{
    fn process(&mut self, ptr: FilePointer, values: &[Value]) -> StorageResult<Flow> {
        self(ptr, values)
    }
}

/// Hooks around row mutations. `before_` hooks run before the heap is
/// touched, so a constraint violation surfaces before anything is made
/// durable.
pub trait RowEventListener {
    fn before_row_inserted(
        &self,
        _ctx: &mut Exec,
        _table: &TableEntry,
        _values: &[Value],
    ) -> StorageResult<()> {
        Ok(())
    }

    fn after_row_inserted(
        &self,
        _ctx: &mut Exec,
        _table: &TableEntry,
        _tuple: &PageTuple,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn before_row_updated(
        &self,
        _ctx: &mut Exec,
        _table: &TableEntry,
        _tuple: &PageTuple,
        _changes: &[(String, Value)],
    ) -> StorageResult<()> {
        Ok(())
    }

    fn after_row_updated(
        &self,
        _ctx: &mut Exec,
        _table: &TableEntry,
        _old_values: &[Value],
        _tuple: &PageTuple,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn before_row_deleted(
        &self,
        _ctx: &mut Exec,
        _table: &TableEntry,
        _tuple: &PageTuple,
    ) -> StorageResult<()> {
        Ok(())
    }

    fn after_row_deleted(
        &self,
        _ctx: &mut Exec,
        _table: &TableEntry,
        _old_values: &[Value],
        _ptr: FilePointer,
    ) -> StorageResult<()> {
        Ok(())
    }
}

/// Listener registry owned by the engine.
pub struct EventDispatcher {
    listeners: Vec<Box<dyn RowEventListener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn register(&mut self, listener: Box<dyn RowEventListener>) {
        self.listeners.push(listener);
    }

    pub fn listeners(&self) -> &[Box<dyn RowEventListener>] {
        &self.listeners
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a table's indexes in step with its heap file.
pub struct IndexUpdater;

impl IndexUpdater {
    /// New projected key values for the indexes affected by `changes`, or
    /// `None` when the index's columns are untouched.
    fn projected_after_changes(
        table: &TableEntry,
        index_columns: &[u8],
        old_values: &[Value],
        changes: &[(String, Value)],
    ) -> StorageResult<Option<Vec<Value>>> {
        let schema = table.heap.schema();
        let mut touched = false;
        let mut projected = Vec::with_capacity(index_columns.len());
        for &ci in index_columns {
            let name = &schema.column(ci as usize).name;
            match changes.iter().rev().find(|(n, _)| n == name) {
                Some((_, v)) => {
                    touched = true;
                    projected.push(v.clone());
                }
                None => projected.push(old_values[ci as usize].clone()),
            }
        }
        Ok(if touched { Some(projected) } else { None })
    }
}

impl RowEventListener for IndexUpdater {
    /// Unique-index probe; runs before the heap mutation so the row never
    /// lands when the key already exists.
    fn before_row_inserted(
        &self,
        ctx: &mut Exec,
        table: &TableEntry,
        values: &[Value],
    ) -> StorageResult<()> {
        for index in &table.indexes {
            if !index.unique() {
                continue;
            }
            let prefix: Vec<Value> = index
                .meta()
                .column_indices
                .iter()
                .map(|&i| values[i as usize].clone())
                .collect();
            if prefix.iter().any(|v| v.is_null()) {
                continue;
            }
            if index.contains_logical_key(ctx, &prefix)? {
                return Err(StorageError::schema(format!(
                    "duplicate key in unique index {}",
                    index.name()
                )));
            }
        }
        Ok(())
    }

    fn after_row_inserted(
        &self,
        ctx: &mut Exec,
        table: &TableEntry,
        tuple: &PageTuple,
    ) -> StorageResult<()> {
        let ptr = tuple.file_pointer();
        for index in &table.indexes {
            index.add_entry(ctx, &index.make_key(tuple.values(), ptr))?;
        }
        Ok(())
    }

    fn before_row_updated(
        &self,
        ctx: &mut Exec,
        table: &TableEntry,
        tuple: &PageTuple,
        changes: &[(String, Value)],
    ) -> StorageResult<()> {
        for index in &table.indexes {
            if !index.unique() {
                continue;
            }
            let new_prefix = Self::projected_after_changes(
                table,
                &index.meta().column_indices,
                tuple.values(),
                changes,
            )?;
            let new_prefix = match new_prefix {
                Some(p) => p,
                None => continue,
            };
            let old_prefix: Vec<Value> = index
                .meta()
                .column_indices
                .iter()
                .map(|&i| tuple.values()[i as usize].clone())
                .collect();
            let unchanged = new_prefix
                .iter()
                .zip(&old_prefix)
                .all(|(a, b)| a.compare(b) == std::cmp::Ordering::Equal);
            if unchanged || new_prefix.iter().any(|v| v.is_null()) {
                continue;
            }
            if index.contains_logical_key(ctx, &new_prefix)? {
                return Err(StorageError::schema(format!(
                    "duplicate key in unique index {}",
                    index.name()
                )));
            }
        }
        Ok(())
    }

    fn after_row_updated(
        &self,
        ctx: &mut Exec,
        table: &TableEntry,
        old_values: &[Value],
        tuple: &PageTuple,
    ) -> StorageResult<()> {
        let ptr = tuple.file_pointer();
        for index in &table.indexes {
            let old_key = index.make_key(old_values, ptr);
            let new_key = index.make_key(tuple.values(), ptr);
            if old_key.compare(&new_key) == std::cmp::Ordering::Equal {
                continue;
            }
            index.delete_entry(ctx, &old_key)?;
            index.add_entry(ctx, &new_key)?;
        }
        Ok(())
    }

    fn after_row_deleted(
        &self,
        ctx: &mut Exec,
        table: &TableEntry,
        old_values: &[Value],
        ptr: FilePointer,
    ) -> StorageResult<()> {
        for index in &table.indexes {
            index.delete_entry(ctx, &index.make_key(old_values, ptr))?;
        }
        Ok(())
    }
}
