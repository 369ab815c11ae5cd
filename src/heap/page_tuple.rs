//! A tuple living on a slotted page, with in-place column updates.

use std::io::Cursor;

use crate::error::{StorageError, StorageResult};
use crate::heap::data_page;
use crate::heap::FilePointer;
use crate::io::ByteWriter;
use crate::schema::Schema;
use crate::storage::page::PagePod;
use crate::tuple::codec::{self, value_storage_size};
use crate::tuple::Value;
use crate::util::HandyRwLock;

/// A decoded tuple together with its on-page location. Column setters edit
/// the page bytes directly, growing or shrinking the tuple in place.
pub struct PageTuple {
    page: PagePod,
    slot: usize,
    values: Vec<Value>,
}

impl PageTuple {
    /// Decode the tuple stored in `slot`.
    pub fn read(page: PagePod, slot: usize, schema: &Schema) -> StorageResult<Self> {
        let values = {
            let p = page.rl();
            if slot >= data_page::num_slots(&p)
                || data_page::slot_value(&p, slot) == data_page::EMPTY_SLOT
            {
                return Err(StorageError::InvalidFilePointer {
                    page_no: p.page_no() as u16,
                    offset: data_page::slot_entry_offset(slot),
                });
            }
            let off = data_page::slot_value(&p, slot) as usize;
            let len = data_page::tuple_length(&p, slot)?;
            let mut r = Cursor::new(p.read_bytes(off, len));
            codec::decode_tuple(&mut r, schema.columns())?
        };
        Ok(Self { page, slot, values })
    }

    pub(crate) fn from_parts(page: PagePod, slot: usize, values: Vec<Value>) -> Self {
        Self { page, slot, values }
    }

    pub fn page(&self) -> &PagePod {
        &self.page
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn file_pointer(&self) -> FilePointer {
        let p = self.page.rl();
        FilePointer::new(
            p.page_no() as u16,
            data_page::slot_entry_offset(self.slot),
        )
    }

    /// Byte offset of column `idx`'s value, given the current tuple start.
    fn value_offset(&self, schema: &Schema, tuple_start: usize, idx: usize) -> StorageResult<usize> {
        let mut off = tuple_start + codec::null_bitmap_size(schema.num_columns());
        for j in 0..idx {
            if !self.values[j].is_null() {
                off += value_storage_size(&self.values[j], schema.column(j).col_type)?;
            }
        }
        Ok(off)
    }

    /// Store a new value into column `idx`, expanding or shrinking the tuple
    /// in place. Value offsets of earlier columns and slot offsets of every
    /// tuple packed below this one are adjusted by the size delta.
    pub fn set_column(&mut self, schema: &Schema, idx: usize, new: Value) -> StorageResult<()> {
        let col_type = schema.column(idx).col_type;
        if !new.fits_column(col_type) {
            return Err(StorageError::schema(format!(
                "value {} does not fit column {} ({:?})",
                new,
                schema.column(idx).name,
                col_type
            )));
        }

        let mut p = self.page.wl();

        let tuple_start = data_page::slot_value(&p, self.slot) as usize;
        let value_off = self.value_offset(schema, tuple_start, idx)?;

        let old_size = if self.values[idx].is_null() {
            0
        } else {
            value_storage_size(&self.values[idx], col_type)?
        };
        let new_size = if new.is_null() {
            0
        } else {
            value_storage_size(&new, col_type)?
        };

        if new_size > old_size {
            let grow = new_size - old_size;
            let available = data_page::free_space(&p);
            if available < grow {
                return Err(StorageError::OutOfSpaceInPage {
                    page_no: p.page_no(),
                    needed: grow,
                    available,
                });
            }
            data_page::insert_tuple_data_range(&mut p, value_off, grow);
        } else if old_size > new_size {
            data_page::delete_tuple_data_range(&mut p, value_off, old_size - new_size);
        }

        // The tuple start (and with it the bitmap and every earlier value)
        // moved by the delta; recompute positions from the updated slot.
        let tuple_start = data_page::slot_value(&p, self.slot) as usize;
        let value_off = self.value_offset(schema, tuple_start, idx)?;

        // NULL bitmap bit, most-significant bit first within each byte.
        let flag_byte = tuple_start + idx / 8;
        let mask = 0x80u8 >> (idx % 8);
        let mut flags = p.read_u8(flag_byte);
        if new.is_null() {
            flags |= mask;
        } else {
            flags &= !mask;
        }
        p.write_u8(flag_byte, flags);

        if !new.is_null() {
            let mut w = ByteWriter::new();
            codec::encode_value(&mut w, &new, col_type)?;
            p.write_bytes(value_off, &w.into_bytes());
        }

        drop(p);
        self.values[idx] = new;
        Ok(())
    }
}
