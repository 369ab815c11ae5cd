//! Slotted data pages.
//!
//! Layout: a four-byte slot count, then the slot table growing upward (one
//! two-byte tuple offset per slot, zero meaning empty), tuple bytes packed
//! from the page end downward. Free space is the gap between the two.

use crate::error::{StorageError, StorageResult};
use crate::storage::page::DbPage;

/// Offset of the slot count field.
const SLOT_COUNT_OFFSET: usize = 0;
/// First slot entry.
const SLOTS_START: usize = 4;
/// Slot value meaning "empty"; no tuple can start below the slot count
/// field, so zero is unambiguous.
pub const EMPTY_SLOT: u16 = 0;

pub fn init_new_page(page: &mut DbPage) {
    page.zero_range(0, page.page_size());
}

pub fn num_slots(page: &DbPage) -> usize {
    page.read_u32(SLOT_COUNT_OFFSET) as usize
}

fn set_num_slots(page: &mut DbPage, n: usize) {
    page.write_u32(SLOT_COUNT_OFFSET, n as u32);
}

pub fn slot_value(page: &DbPage, slot: usize) -> u16 {
    page.read_u16(SLOTS_START + 2 * slot)
}

fn set_slot_value(page: &mut DbPage, slot: usize, value: u16) {
    page.write_u16(SLOTS_START + 2 * slot, value);
}

/// Byte offset of a slot's entry in the slot table; the stable half of an
/// external tuple reference.
pub fn slot_entry_offset(slot: usize) -> u16 {
    (SLOTS_START + 2 * slot) as u16
}

pub fn slot_from_entry_offset(offset: u16) -> Option<usize> {
    let offset = offset as usize;
    if offset < SLOTS_START || (offset - SLOTS_START) % 2 != 0 {
        return None;
    }
    Some((offset - SLOTS_START) / 2)
}

/// End of the slot table.
pub fn slot_table_end(page: &DbPage) -> usize {
    SLOTS_START + 2 * num_slots(page)
}

/// Lowest tuple byte on the page; the page end when there are no tuples.
pub fn tuple_data_start(page: &DbPage) -> usize {
    let mut start = page.page_size();
    for slot in 0..num_slots(page) {
        let v = slot_value(page, slot);
        if v != EMPTY_SLOT && (v as usize) < start {
            start = v as usize;
        }
    }
    start
}

pub fn free_space(page: &DbPage) -> usize {
    tuple_data_start(page) - slot_table_end(page)
}

/// Byte length of the tuple in `slot`, bounded by the next tuple start
/// above it (tuples are packed contiguously).
pub fn tuple_length(page: &DbPage, slot: usize) -> StorageResult<usize> {
    let off = slot_value(page, slot);
    if off == EMPTY_SLOT {
        return Err(StorageError::InvalidFilePointer {
            page_no: page.page_no() as u16,
            offset: slot_entry_offset(slot),
        });
    }

    let mut end = page.page_size();
    for other in 0..num_slots(page) {
        let v = slot_value(page, other);
        if v != EMPTY_SLOT && v > off && (v as usize) < end {
            end = v as usize;
        }
    }
    Ok(end - off as usize)
}

/// Reserve `len` tuple bytes, reusing an empty slot or growing the slot
/// table. Returns the slot index; its value points at the reserved bytes.
pub fn alloc_new_tuple(page: &mut DbPage, len: usize) -> StorageResult<usize> {
    let n = num_slots(page);
    let reuse = (0..n).find(|&s| slot_value(page, s) == EMPTY_SLOT);

    let required = len + if reuse.is_none() { 2 } else { 0 };
    let available = free_space(page);
    if available < required {
        return Err(StorageError::OutOfSpaceInPage {
            page_no: page.page_no(),
            needed: required,
            available,
        });
    }

    let slot = match reuse {
        Some(s) => s,
        None => {
            set_num_slots(page, n + 1);
            set_slot_value(page, n, EMPTY_SLOT);
            n
        }
    };

    let new_offset = tuple_data_start(page) - len;
    set_slot_value(page, slot, new_offset as u16);
    Ok(slot)
}

/// Open `len` bytes of space ending at `off`: everything below `off` in the
/// tuple data area slides down, and every slot pointing below `off` follows.
pub fn insert_tuple_data_range(page: &mut DbPage, off: usize, len: usize) {
    let start = tuple_data_start(page);
    debug_assert!(off >= start && off <= page.page_size());
    debug_assert!(free_space(page) >= len);

    page.move_data_range(start, start - len, off - start);

    for slot in 0..num_slots(page) {
        let v = slot_value(page, slot);
        if v != EMPTY_SLOT && (v as usize) < off {
            set_slot_value(page, slot, v - len as u16);
        }
    }
}

/// Remove the byte range `[off, off+len)` from the tuple data area:
/// everything below it slides up, and every slot pointing below `off`
/// follows.
pub fn delete_tuple_data_range(page: &mut DbPage, off: usize, len: usize) {
    let start = tuple_data_start(page);
    debug_assert!(off >= start && off + len <= page.page_size());

    page.move_data_range(start, start + len, off - start);

    for slot in 0..num_slots(page) {
        let v = slot_value(page, slot);
        if v != EMPTY_SLOT && (v as usize) < off {
            set_slot_value(page, slot, v + len as u16);
        }
    }
}

/// Clear a slot, compact the data area, and trim trailing empty slots.
pub fn delete_tuple(page: &mut DbPage, slot: usize) -> StorageResult<()> {
    if slot >= num_slots(page) {
        return Err(StorageError::InvalidFilePointer {
            page_no: page.page_no() as u16,
            offset: slot_entry_offset(slot),
        });
    }
    let off = slot_value(page, slot);
    let len = tuple_length(page, slot)?;

    set_slot_value(page, slot, EMPTY_SLOT);
    delete_tuple_data_range(page, off as usize, len);

    let mut n = num_slots(page);
    while n > 0 && slot_value(page, n - 1) == EMPTY_SLOT {
        n -= 1;
    }
    set_num_slots(page, n);
    Ok(())
}
