//! The heap table file manager: tuple storage, scans, and statistics.

use std::collections::HashSet;

use log::debug;

use crate::engine::Exec;
use crate::error::{StorageError, StorageResult};
use crate::heap::data_page;
use crate::heap::header_page;
use crate::heap::page_tuple::PageTuple;
use crate::heap::FilePointer;
use crate::io::ByteWriter;
use crate::schema::stats::{ColumnStats, TableStats};
use crate::schema::Schema;
use crate::storage::file::{DbFile, DbFileType};
use crate::tuple::codec::{self, encode_value, tuple_storage_size};
use crate::tuple::Value;
use crate::util::HandyRwLock;

pub struct HeapTableFile {
    file: DbFile,
    schema: Schema,
    stats: TableStats,
}

impl HeapTableFile {
    /// Create the table file and write its header page.
    pub fn create(
        ctx: &mut Exec,
        name: &str,
        schema: Schema,
        page_size: usize,
    ) -> StorageResult<Self> {
        let file = ctx.fm.create_file(name, DbFileType::HeapData, page_size)?;
        ctx.buffer.register_file(&file);

        let stats = TableStats::empty(schema.num_columns());
        let page = ctx.fetch(&file, 0, false)?;
        {
            let mut p = page.wl();
            header_page::write_header(&mut p, &schema, &stats)?;
        }
        ctx.log_page(&page)?;
        ctx.unpin(&page);

        debug!("created table file {}", name);
        Ok(Self {
            file,
            schema,
            stats,
        })
    }

    /// Open an existing table file, decoding schema and statistics from the
    /// header page.
    pub fn open(ctx: &mut Exec, name: &str) -> StorageResult<Self> {
        let file = ctx.fm.open_file(name)?;
        if file.file_type() != DbFileType::HeapData {
            return Err(StorageError::schema(format!(
                "{} is not a heap table file",
                name
            )));
        }
        ctx.buffer.register_file(&file);

        let page = ctx.fetch(&file, 0, false)?;
        let (schema, stats) = header_page::read_header(&page.rl())?;
        ctx.unpin(&page);

        Ok(Self {
            file,
            schema,
            stats,
        })
    }

    pub fn file(&self) -> &DbFile {
        &self.file
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    /// Largest tuple that fits an empty data page, slot entry included.
    fn page_capacity(page_size: usize) -> usize {
        page_size - 4 - 2
    }

    /// First tuple in scan order (page 1, slot 0 onward).
    pub fn get_first_tuple(&self, ctx: &mut Exec) -> StorageResult<Option<PageTuple>> {
        self.next_tuple_from(ctx, 1, 0)
    }

    /// Tuple after `current` in scan order.
    pub fn get_next_tuple(
        &self,
        ctx: &mut Exec,
        current: &PageTuple,
    ) -> StorageResult<Option<PageTuple>> {
        let page_no = current.page().rl().page_no();
        self.next_tuple_from(ctx, page_no, current.slot() + 1)
    }

    fn next_tuple_from(
        &self,
        ctx: &mut Exec,
        mut page_no: u32,
        mut slot: usize,
    ) -> StorageResult<Option<PageTuple>> {
        loop {
            let page = match ctx.fetch(&self.file, page_no, false) {
                Ok(p) => p,
                // Past the last page: the scan is over.
                Err(StorageError::PageNotFound { .. }) => return Ok(None),
                Err(e) => return Err(e),
            };

            let n = data_page::num_slots(&page.rl());
            while slot < n {
                if data_page::slot_value(&page.rl(), slot) != data_page::EMPTY_SLOT {
                    return PageTuple::read(page, slot, &self.schema).map(Some);
                }
                slot += 1;
            }

            ctx.unpin(&page);
            page_no += 1;
            slot = 0;
        }
    }

    /// Resolve an external reference to its tuple.
    pub fn get_tuple(&self, ctx: &mut Exec, ptr: FilePointer) -> StorageResult<PageTuple> {
        let invalid = StorageError::InvalidFilePointer {
            page_no: ptr.page_no,
            offset: ptr.offset,
        };
        let slot = match data_page::slot_from_entry_offset(ptr.offset) {
            Some(s) => s,
            None => return Err(invalid),
        };
        let page = match ctx.fetch(&self.file, ptr.page_no as u32, false) {
            Ok(p) => p,
            Err(StorageError::PageNotFound { .. }) => return Err(invalid),
            Err(e) => return Err(e),
        };
        PageTuple::read(page, slot, &self.schema)
    }

    /// Store a new tuple in the first page with room, extending the file
    /// when every page is full.
    pub fn add_tuple(&self, ctx: &mut Exec, values: Vec<Value>) -> StorageResult<PageTuple> {
        self.check_primary_key_nulls_in(&values)?;

        let size = tuple_storage_size(&values, self.schema.columns())?;
        if size + 2 > Self::page_capacity(self.file.page_size()) {
            return Err(StorageError::schema(format!(
                "tuple of {} bytes cannot fit a {}-byte page",
                size,
                self.file.page_size()
            )));
        }

        let page_count = ctx.fm.page_count(&self.file)?.max(1);
        let mut found = None;
        for page_no in 1..page_count {
            let page = ctx.fetch(&self.file, page_no, false)?;
            if data_page::free_space(&page.rl()) >= size + 2 {
                found = Some(page);
                break;
            }
            ctx.unpin(&page);
        }

        let page = match found {
            Some(p) => p,
            None => {
                if page_count > u16::MAX as u32 {
                    return Err(StorageError::schema(format!(
                        "table {} is full",
                        self.file.name()
                    )));
                }
                debug!("extending {} with data page {}", self.file.name(), page_count);
                let page = ctx.fetch(&self.file, page_count, true)?;
                data_page::init_new_page(&mut page.wl());
                page
            }
        };

        let slot = {
            let mut p = page.wl();
            let slot = data_page::alloc_new_tuple(&mut p, size)?;
            let off = data_page::slot_value(&p, slot) as usize;
            let bytes = codec::encode_tuple(&values, self.schema.columns())?;
            p.write_bytes(off, &bytes);
            slot
        };
        ctx.log_page(&page)?;

        Ok(PageTuple::from_parts(page, slot, values))
    }

    /// Apply named-column changes to a stored tuple.
    pub fn update_tuple(
        &self,
        ctx: &mut Exec,
        tuple: &mut PageTuple,
        changes: &[(String, Value)],
    ) -> StorageResult<()> {
        for (name, value) in changes {
            let idx = self.schema.column_index(name)?;
            self.check_primary_key_null(idx, value)?;
            tuple.set_column(&self.schema, idx, value.clone())?;
        }
        ctx.log_page(tuple.page())
    }

    /// Remove a stored tuple, compacting its page.
    pub fn delete_tuple(&self, ctx: &mut Exec, tuple: &PageTuple) -> StorageResult<()> {
        {
            let mut p = tuple.page().wl();
            data_page::delete_tuple(&mut p, tuple.slot())?;
        }
        ctx.log_page(tuple.page())
    }

    fn check_primary_key_nulls_in(&self, values: &[Value]) -> StorageResult<()> {
        if let Some(pk) = self.schema.primary_key_columns() {
            for &c in pk {
                if values
                    .get(c as usize)
                    .map(|v| v.is_null())
                    .unwrap_or(false)
                {
                    return Err(StorageError::schema(format!(
                        "primary key column {} cannot be NULL",
                        self.schema.column(c as usize).name
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_primary_key_null(&self, idx: usize, value: &Value) -> StorageResult<()> {
        if value.is_null() {
            if let Some(pk) = self.schema.primary_key_columns() {
                if pk.contains(&(idx as u8)) {
                    return Err(StorageError::schema(format!(
                        "primary key column {} cannot be NULL",
                        self.schema.column(idx).name
                    )));
                }
            }
        }
        Ok(())
    }

    /// One full scan refreshing table and per-column statistics, persisted
    /// into the header page.
    pub fn analyze(&mut self, ctx: &mut Exec) -> StorageResult<()> {
        let num_columns = self.schema.num_columns();
        let mut num_pages = 0u32;
        let mut num_tuples = 0u32;
        let mut total_bytes = 0u64;
        let mut nulls = vec![0u32; num_columns];
        let mut distinct: Vec<HashSet<Vec<u8>>> = vec![HashSet::new(); num_columns];
        let mut minima: Vec<Option<Value>> = vec![None; num_columns];
        let mut maxima: Vec<Option<Value>> = vec![None; num_columns];

        let mut page_no = 1u32;
        loop {
            let page = match ctx.fetch(&self.file, page_no, false) {
                Ok(p) => p,
                Err(StorageError::PageNotFound { .. }) => break,
                Err(e) => return Err(e),
            };
            num_pages += 1;

            let n = data_page::num_slots(&page.rl());
            for slot in 0..n {
                if data_page::slot_value(&page.rl(), slot) == data_page::EMPTY_SLOT {
                    continue;
                }
                total_bytes += data_page::tuple_length(&page.rl(), slot)? as u64;
                num_tuples += 1;

                let tuple = PageTuple::read(page.clone(), slot, &self.schema)?;
                for (i, value) in tuple.values().iter().enumerate() {
                    if value.is_null() {
                        nulls[i] += 1;
                        continue;
                    }
                    let mut w = ByteWriter::new();
                    encode_value(&mut w, value, self.schema.column(i).col_type)?;
                    distinct[i].insert(w.into_bytes());

                    match &minima[i] {
                        Some(m) if m.compare(value).is_le() => {}
                        _ => minima[i] = Some(value.clone()),
                    }
                    match &maxima[i] {
                        Some(m) if m.compare(value).is_ge() => {}
                        _ => maxima[i] = Some(value.clone()),
                    }
                }
            }

            ctx.unpin(&page);
            page_no += 1;
        }

        let columns = (0..num_columns)
            .map(|i| ColumnStats {
                num_distinct: Some(distinct[i].len() as u32),
                num_nulls: Some(nulls[i]),
                min: minima[i].take(),
                max: maxima[i].take(),
            })
            .collect();

        self.stats = TableStats {
            num_data_pages: num_pages,
            num_tuples,
            avg_tuple_size: if num_tuples == 0 {
                0.0
            } else {
                total_bytes as f32 / num_tuples as f32
            },
            columns,
        };

        let header = ctx.fetch(&self.file, 0, false)?;
        {
            let mut p = header.wl();
            header_page::write_header(&mut p, &self.schema, &self.stats)?;
        }
        ctx.log_page(&header)?;
        ctx.unpin(&header);

        debug!(
            "analyzed {}: {} pages, {} tuples, {:.1} bytes/tuple",
            self.file.name(),
            self.stats.num_data_pages,
            self.stats.num_tuples,
            self.stats.avg_tuple_size
        );
        Ok(())
    }
}
