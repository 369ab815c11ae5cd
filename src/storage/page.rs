use std::convert::TryInto;

use crate::storage::file::{DbFile, PageId};
use crate::util::Pod;
use crate::wal::lsn::Lsn;

/// A page frame: the in-memory image of one fixed-size block of a file.
///
/// The buffer manager owns the backing storage; everyone else reaches a page
/// through a [`PagePod`] and a pin. All typed accessors use the big-endian
/// on-disk byte order, and every mutator raises the dirty flag.
pub struct DbPage {
    file: DbFile,
    page_no: u32,
    data: Vec<u8>,
    /// Snapshot of `data` as of the last WAL record (or load); the source of
    /// the before-image in UPDATE_PAGE records.
    old_data: Vec<u8>,
    dirty: bool,
    pin_count: u32,
    lsn: Lsn,
}

impl DbPage {
    pub fn new(file: DbFile, page_no: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), file.page_size());
        Self {
            file,
            page_no,
            old_data: data.clone(),
            data,
            dirty: false,
            pin_count: 0,
            lsn: Lsn::ZERO,
        }
    }

    pub fn file(&self) -> &DbFile {
        &self.file
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn page_id(&self) -> PageId {
        self.file.page_id(self.page_no)
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) {
        debug_assert!(self.pin_count > 0, "unpin of unpinned page {}", self.page_id());
        self.pin_count = self.pin_count.saturating_sub(1);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw image including the current dirty bytes, for write-back.
    pub fn bytes_for_write(&self) -> &[u8] {
        &self.data
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes(self.data[offset..offset + 2].try_into().unwrap())
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_be_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
        self.dirty = true;
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        self.dirty = true;
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        self.dirty = true;
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
    }

    /// Move `len` bytes from `src` to `dst` within the page; the ranges may
    /// overlap.
    pub fn move_data_range(&mut self, src: usize, dst: usize, len: usize) {
        if len == 0 || src == dst {
            return;
        }
        self.data.copy_within(src..src + len, dst);
        self.dirty = true;
    }

    pub fn zero_range(&mut self, offset: usize, len: usize) {
        for b in &mut self.data[offset..offset + len] {
            *b = 0;
        }
        self.dirty = true;
    }

    /// Replace the whole page image (recovery, undo).
    pub fn overwrite(&mut self, offset: usize, bytes: &[u8]) {
        self.write_bytes(offset, bytes);
    }

    /// The smallest byte range `[start, end)` in which the page differs from
    /// its before-image, or `None` if nothing changed.
    pub fn changed_range(&self) -> Option<(usize, usize)> {
        let start = self
            .data
            .iter()
            .zip(self.old_data.iter())
            .position(|(a, b)| a != b)?;
        let tail = self
            .data
            .iter()
            .zip(self.old_data.iter())
            .rposition(|(a, b)| a != b)
            .unwrap();
        Some((start, tail + 1))
    }

    pub fn old_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.old_data[offset..offset + len]
    }

    /// Make the current image the new before-image, after its delta has been
    /// logged (or when logging is disabled).
    pub fn sync_old_data(&mut self) {
        self.old_data.copy_from_slice(&self.data);
    }
}

/// Shared handle to a cached page.
pub type PagePod = Pod<DbPage>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::DbFileType;

    fn scratch_page(size: usize) -> DbPage {
        let file = tempfile::tempfile().unwrap();
        let db_file = DbFile::new("scratch.tbl", DbFileType::HeapData, size, file);
        DbPage::new(db_file, 1, vec![0u8; size])
    }

    #[test]
    fn typed_accessors_round_trip() {
        let mut page = scratch_page(512);
        page.write_u16(10, 0xBEEF);
        page.write_u32(20, 0xDEAD_F00D);
        assert_eq!(page.read_u16(10), 0xBEEF);
        assert_eq!(page.read_u32(20), 0xDEAD_F00D);
        assert!(page.is_dirty());
    }

    #[test]
    fn changed_range_tracks_smallest_span() {
        let mut page = scratch_page(512);
        assert_eq!(page.changed_range(), None);

        page.write_u8(100, 7);
        page.write_u8(130, 9);
        assert_eq!(page.changed_range(), Some((100, 131)));

        page.sync_old_data();
        assert_eq!(page.changed_range(), None);
    }

    #[test]
    fn move_data_range_handles_overlap() {
        let mut page = scratch_page(512);
        page.write_bytes(0, &[1, 2, 3, 4, 5]);
        page.move_data_range(0, 2, 5);
        assert_eq!(page.read_bytes(2, 5), &[1, 2, 3, 4, 5]);
    }
}
