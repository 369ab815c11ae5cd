//! Inner pages: `{page-type, pointer-count(2)}` then the alternating
//! sequence `ptr_0, key_0, ptr_1, key_1, …, ptr_{n-1}`.
//!
//! Key `i` separates the subtrees under pointers `i` and `i+1`: everything
//! under pointer `i` sorts strictly below the key, everything under pointer
//! `i+1` at or above it.

use std::cmp::Ordering;
use std::io::Cursor;

use crate::btree::key::IndexKey;
use crate::btree::BTREE_INNER_PAGE;
use crate::error::{StorageError, StorageResult};
use crate::schema::ColumnInfo;
use crate::storage::page::{DbPage, PagePod};
use crate::util::HandyRwLock;

pub const INNER_HEADER_SIZE: usize = 3;

const POINTER_COUNT_OFFSET: usize = 1;

pub struct InnerPage {
    page: PagePod,
    key_columns: Vec<ColumnInfo>,
    pointers: Vec<u16>,
    /// `(offset, len)` of key `i`, which sits between pointers `i` and
    /// `i+1`.
    key_spans: Vec<(usize, usize)>,
    end_offset: usize,
}

impl InnerPage {
    /// Format a fresh inner page holding exactly two pointers around one
    /// separator key.
    pub fn init(page: &mut DbPage, left: u16, key_bytes: &[u8], right: u16) {
        page.write_u8(0, BTREE_INNER_PAGE);
        page.write_u16(POINTER_COUNT_OFFSET, 2);
        let mut off = INNER_HEADER_SIZE;
        page.write_u16(off, left);
        off += 2;
        page.write_bytes(off, key_bytes);
        off += key_bytes.len();
        page.write_u16(off, right);
    }

    /// Serialize a whole inner page from its logical parts.
    pub fn rebuild(page: &mut DbPage, pointers: &[u16], keys: &[Vec<u8>]) {
        debug_assert_eq!(pointers.len(), keys.len() + 1);
        page.write_u8(0, BTREE_INNER_PAGE);
        page.write_u16(POINTER_COUNT_OFFSET, pointers.len() as u16);
        let mut off = INNER_HEADER_SIZE;
        for (i, ptr) in pointers.iter().enumerate() {
            page.write_u16(off, *ptr);
            off += 2;
            if i < keys.len() {
                page.write_bytes(off, &keys[i]);
                off += keys[i].len();
            }
        }
        // Stale bytes past the new end would confuse nobody (the pointer
        // count bounds parsing), but zeroing keeps page dumps readable.
        let page_size = page.page_size();
        if off < page_size {
            page.zero_range(off, page_size - off);
        }
    }

    pub fn wrap(page: PagePod, key_columns: &[ColumnInfo]) -> StorageResult<Self> {
        let mut inner = Self {
            page,
            key_columns: key_columns.to_vec(),
            pointers: Vec::new(),
            key_spans: Vec::new(),
            end_offset: INNER_HEADER_SIZE,
        };
        inner.reparse()?;
        Ok(inner)
    }

    fn reparse(&mut self) -> StorageResult<()> {
        let p = self.page.rl();
        if p.read_u8(0) != BTREE_INNER_PAGE {
            return Err(StorageError::corrupt_index(
                p.file().name(),
                format!("page {} is not an inner node", p.page_no()),
            ));
        }
        let n = p.read_u16(POINTER_COUNT_OFFSET) as usize;
        if n < 2 {
            return Err(StorageError::corrupt_index(
                p.file().name(),
                format!("inner page {} holds {} pointers", p.page_no(), n),
            ));
        }

        let mut pointers = Vec::with_capacity(n);
        let mut key_spans = Vec::with_capacity(n - 1);
        let mut off = INNER_HEADER_SIZE;
        for i in 0..n {
            pointers.push(p.read_u16(off));
            off += 2;
            if i < n - 1 {
                let mut cursor = Cursor::new(&p.bytes()[off..]);
                IndexKey::decode_from(&mut cursor, &self.key_columns)?;
                let len = cursor.position() as usize;
                key_spans.push((off, len));
                off += len;
            }
        }
        drop(p);

        self.pointers = pointers;
        self.key_spans = key_spans;
        self.end_offset = off;
        Ok(())
    }

    pub fn page(&self) -> &PagePod {
        &self.page
    }

    pub fn page_no(&self) -> u32 {
        self.page.rl().page_no()
    }

    pub fn num_pointers(&self) -> usize {
        self.pointers.len()
    }

    pub fn pointer_at(&self, i: usize) -> u16 {
        self.pointers[i]
    }

    pub fn pointers(&self) -> &[u16] {
        &self.pointers
    }

    pub fn free_space(&self) -> usize {
        self.page.rl().page_size() - self.end_offset
    }

    pub fn key_at(&self, i: usize) -> StorageResult<IndexKey> {
        let p = self.page.rl();
        let (off, _) = self.key_spans[i];
        IndexKey::decode_from(&mut Cursor::new(&p.bytes()[off..]), &self.key_columns)
    }

    pub fn key_bytes(&self, i: usize) -> Vec<u8> {
        let (off, len) = self.key_spans[i];
        self.page.rl().read_bytes(off, len).to_vec()
    }

    pub fn key_size(&self, i: usize) -> usize {
        self.key_spans[i].1
    }

    /// Extract the page's logical content for rebuild-style surgery.
    pub fn to_parts(&self) -> (Vec<u16>, Vec<Vec<u8>>) {
        let keys = (0..self.key_spans.len())
            .map(|i| self.key_bytes(i))
            .collect();
        (self.pointers.clone(), keys)
    }

    pub fn pointer_index(&self, page_no: u16) -> Option<usize> {
        self.pointers.iter().position(|&p| p == page_no)
    }

    /// Pointer to descend for a search: the first pointer whose separator
    /// sorts above the key (per `cmp`), else the last pointer.
    pub fn find_child(&self, mut cmp: impl FnMut(&IndexKey) -> StorageResult<Ordering>) -> StorageResult<u16> {
        for i in 0..self.key_spans.len() {
            let key = self.key_at(i)?;
            if cmp(&key)? == Ordering::Less {
                return Ok(self.pointers[i]);
            }
        }
        Ok(*self.pointers.last().unwrap())
    }

    /// Splice `key_bytes, new_ptr` in right after the existing pointer to
    /// `after_ptr`; the standard move after a child split.
    pub fn add_entry(
        &mut self,
        after_ptr: u16,
        key_bytes: &[u8],
        new_ptr: u16,
    ) -> StorageResult<()> {
        let idx = self.pointer_index(after_ptr).ok_or_else(|| {
            StorageError::corrupt_index(
                self.page.rl().file().name(),
                format!("pointer {} not found in inner page", after_ptr),
            )
        })?;

        let need = key_bytes.len() + 2;
        if self.free_space() < need {
            let p = self.page.rl();
            return Err(StorageError::OutOfSpaceInPage {
                page_no: p.page_no(),
                needed: need,
                available: p.page_size() - self.end_offset,
            });
        }

        let at = if idx < self.key_spans.len() {
            self.key_spans[idx].0
        } else {
            self.end_offset
        };
        {
            let mut p = self.page.wl();
            p.move_data_range(at, at + need, self.end_offset - at);
            p.write_bytes(at, key_bytes);
            p.write_u16(at + key_bytes.len(), new_ptr);
            let count = self.pointers.len() as u16 + 1;
            p.write_u16(POINTER_COUNT_OFFSET, count);
        }
        self.reparse()
    }

    /// Swap the separator at key index `i` for new bytes, shifting the tail
    /// by the size difference. The caller checks the page can absorb growth.
    pub fn replace_key_at(&mut self, i: usize, new_bytes: &[u8]) -> StorageResult<()> {
        let (off, old_len) = self.key_spans[i];
        let delta = new_bytes.len() as isize - old_len as isize;
        if delta > 0 && (self.free_space() as isize) < delta {
            let p = self.page.rl();
            return Err(StorageError::OutOfSpaceInPage {
                page_no: p.page_no(),
                needed: delta as usize,
                available: p.page_size() - self.end_offset,
            });
        }

        {
            let mut p = self.page.wl();
            let tail = self.end_offset - (off + old_len);
            p.move_data_range(off + old_len, off + new_bytes.len(), tail);
            p.write_bytes(off, new_bytes);
        }
        self.reparse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::FilePointer;
    use crate::schema::{ColumnInfo, ColumnType};
    use crate::tuple::Value;
    use crate::util::pod;

    const PAGE_SIZE: usize = 512;

    fn cols() -> Vec<ColumnInfo> {
        vec![ColumnInfo::new("id", ColumnType::Integer)]
    }

    fn key_bytes(id: i32) -> Vec<u8> {
        IndexKey::new(vec![Value::Int(id)], FilePointer::new(1, id as u16))
            .encode(&cols())
            .unwrap()
    }

    fn inner_with(left: u16, id: i32, right: u16) -> InnerPage {
        let file = tempfile::tempfile().unwrap();
        let db_file = crate::storage::file::DbFile::new(
            "i.idx",
            crate::storage::file::DbFileType::BTreeIndex,
            PAGE_SIZE,
            file,
        );
        let mut page = DbPage::new(db_file, 3, vec![0u8; PAGE_SIZE]);
        InnerPage::init(&mut page, left, &key_bytes(id), right);
        InnerPage::wrap(pod(page), &cols()).unwrap()
    }

    fn search_key(id: i32) -> IndexKey {
        IndexKey::new(vec![Value::Int(id)], FilePointer::new(0, 0))
    }

    #[test]
    fn navigation_descends_left_below_the_separator() {
        let inner = inner_with(10, 50, 20);
        let left = inner
            .find_child(|k| Ok(search_key(49).compare(k)))
            .unwrap();
        assert_eq!(left, 10);
        let right = inner
            .find_child(|k| Ok(search_key(51).compare(k)))
            .unwrap();
        assert_eq!(right, 20);
    }

    #[test]
    fn add_entry_splices_after_the_child() {
        let mut inner = inner_with(10, 50, 20);
        inner.add_entry(20, &key_bytes(70), 30).unwrap();

        assert_eq!(inner.pointers(), &[10, 20, 30]);
        assert_eq!(inner.key_at(0).unwrap().values[0], Value::Int(50));
        assert_eq!(inner.key_at(1).unwrap().values[0], Value::Int(70));

        // Splice in the middle as well.
        inner.add_entry(10, &key_bytes(30), 15).unwrap();
        assert_eq!(inner.pointers(), &[10, 15, 20, 30]);
        assert_eq!(inner.key_at(0).unwrap().values[0], Value::Int(30));
        assert_eq!(inner.key_at(1).unwrap().values[0], Value::Int(50));
    }

    #[test]
    fn rebuild_round_trips_parts() {
        let mut inner = inner_with(10, 50, 20);
        inner.add_entry(20, &key_bytes(70), 30).unwrap();
        let (ptrs, keys) = inner.to_parts();

        {
            let mut p = inner.page().wl();
            InnerPage::rebuild(&mut p, &ptrs, &keys);
        }
        let back = InnerPage::wrap(inner.page().clone(), &cols()).unwrap();
        assert_eq!(back.pointers(), &ptrs[..]);
        assert_eq!(back.key_at(1).unwrap().values[0], Value::Int(70));
    }

    #[test]
    fn replace_key_with_wider_bytes() {
        let mut inner = inner_with(10, 50, 20);
        let wide = IndexKey::new(vec![Value::Int(55)], FilePointer::new(2, 9))
            .encode(&cols())
            .unwrap();
        inner.replace_key_at(0, &wide).unwrap();
        assert_eq!(inner.key_at(0).unwrap().values[0], Value::Int(55));
        assert_eq!(inner.pointers(), &[10, 20]);
    }
}
