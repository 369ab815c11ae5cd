//! Leaf pages: `{page-type, next-leaf(2), entry-count(2)}` then the entries
//! packed contiguously, each a full index key in ascending order.

use std::io::Cursor;

use crate::btree::key::IndexKey;
use crate::btree::BTREE_LEAF_PAGE;
use crate::error::{StorageError, StorageResult};
use crate::schema::ColumnInfo;
use crate::storage::page::{DbPage, PagePod};
use crate::util::HandyRwLock;

pub const LEAF_HEADER_SIZE: usize = 5;

const NEXT_LEAF_OFFSET: usize = 1;
const ENTRY_COUNT_OFFSET: usize = 3;

/// A leaf page wrapper caching the entry layout (start offset of each
/// entry). Mutators keep the cache in step with the bytes.
pub struct LeafPage {
    page: PagePod,
    key_columns: Vec<ColumnInfo>,
    entry_offsets: Vec<usize>,
    end_offset: usize,
}

impl LeafPage {
    /// Format a fresh leaf in `page`.
    pub fn init(page: &mut DbPage, next_leaf: u16) {
        page.write_u8(0, BTREE_LEAF_PAGE);
        page.write_u16(NEXT_LEAF_OFFSET, next_leaf);
        page.write_u16(ENTRY_COUNT_OFFSET, 0);
    }

    pub fn wrap(page: PagePod, key_columns: &[ColumnInfo]) -> StorageResult<Self> {
        let mut leaf = Self {
            page,
            key_columns: key_columns.to_vec(),
            entry_offsets: Vec::new(),
            end_offset: LEAF_HEADER_SIZE,
        };
        leaf.reparse()?;
        Ok(leaf)
    }

    fn reparse(&mut self) -> StorageResult<()> {
        let p = self.page.rl();
        if p.read_u8(0) != BTREE_LEAF_PAGE {
            return Err(StorageError::corrupt_index(
                p.file().name(),
                format!("page {} is not a leaf", p.page_no()),
            ));
        }
        let n = p.read_u16(ENTRY_COUNT_OFFSET) as usize;

        let mut offsets = Vec::with_capacity(n);
        let mut cursor = Cursor::new(&p.bytes()[LEAF_HEADER_SIZE..]);
        for _ in 0..n {
            offsets.push(LEAF_HEADER_SIZE + cursor.position() as usize);
            IndexKey::decode_from(&mut cursor, &self.key_columns)?;
        }
        self.end_offset = LEAF_HEADER_SIZE + cursor.position() as usize;
        drop(p);
        self.entry_offsets = offsets;
        Ok(())
    }

    pub fn page(&self) -> &PagePod {
        &self.page
    }

    pub fn page_no(&self) -> u32 {
        self.page.rl().page_no()
    }

    pub fn num_entries(&self) -> usize {
        self.entry_offsets.len()
    }

    pub fn end_offset(&self) -> usize {
        self.end_offset
    }

    pub fn free_space(&self) -> usize {
        self.page.rl().page_size() - self.end_offset
    }

    pub fn next_leaf(&self) -> u16 {
        self.page.rl().read_u16(NEXT_LEAF_OFFSET)
    }

    pub fn set_next_leaf(&mut self, no: u16) {
        self.page.wl().write_u16(NEXT_LEAF_OFFSET, no);
    }

    fn set_num_entries(&mut self, n: usize) {
        self.page.wl().write_u16(ENTRY_COUNT_OFFSET, n as u16);
    }

    pub fn entry_size(&self, i: usize) -> usize {
        let end = if i + 1 < self.entry_offsets.len() {
            self.entry_offsets[i + 1]
        } else {
            self.end_offset
        };
        end - self.entry_offsets[i]
    }

    /// Total bytes of entries `[from, to)`.
    pub fn entries_byte_size(&self, from: usize, to: usize) -> usize {
        if from >= to {
            return 0;
        }
        let end = if to < self.entry_offsets.len() {
            self.entry_offsets[to]
        } else {
            self.end_offset
        };
        end - self.entry_offsets[from]
    }

    pub fn key_at(&self, i: usize) -> StorageResult<IndexKey> {
        let p = self.page.rl();
        let mut cursor = Cursor::new(&p.bytes()[self.entry_offsets[i]..]);
        IndexKey::decode_from(&mut cursor, &self.key_columns)
    }

    pub fn entry_bytes(&self, i: usize) -> Vec<u8> {
        self.page
            .rl()
            .read_bytes(self.entry_offsets[i], self.entry_size(i))
            .to_vec()
    }

    /// Position of the first entry not less than `key`, and whether it is an
    /// exact duplicate.
    pub fn find_position(&self, key: &IndexKey) -> StorageResult<(usize, bool)> {
        let mut lo = 0usize;
        let mut hi = self.num_entries();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid)?.compare(key) == std::cmp::Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let exact = lo < self.num_entries()
            && self.key_at(lo)?.compare(key) == std::cmp::Ordering::Equal;
        Ok((lo, exact))
    }

    /// Position of the first entry at-or-after a logical-key prefix.
    pub fn find_prefix_position(&self, prefix: &[crate::tuple::Value]) -> StorageResult<usize> {
        let mut lo = 0usize;
        let mut hi = self.num_entries();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let mid_key = self.key_at(mid)?;
            if IndexKey::compare_prefix(prefix, &mid_key) == std::cmp::Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Insert an encoded entry at position `i`, shifting the tail up.
    pub fn insert_entry_at(&mut self, i: usize, bytes: &[u8]) -> StorageResult<()> {
        let len = bytes.len();
        if self.free_space() < len {
            let p = self.page.rl();
            return Err(StorageError::OutOfSpaceInPage {
                page_no: p.page_no(),
                needed: len,
                available: p.page_size() - self.end_offset,
            });
        }

        let off = if i < self.entry_offsets.len() {
            self.entry_offsets[i]
        } else {
            self.end_offset
        };
        {
            let mut p = self.page.wl();
            p.move_data_range(off, off + len, self.end_offset - off);
            p.write_bytes(off, bytes);
        }

        self.entry_offsets.insert(i, off);
        for o in &mut self.entry_offsets[i + 1..] {
            *o += len;
        }
        self.end_offset += len;
        let n = self.entry_offsets.len();
        self.set_num_entries(n);
        Ok(())
    }

    /// Remove the entry at position `i`, shifting the tail down.
    pub fn remove_entry(&mut self, i: usize) {
        let len = self.entry_size(i);
        let off = self.entry_offsets[i];
        {
            let mut p = self.page.wl();
            p.move_data_range(off + len, off, self.end_offset - off - len);
        }
        self.entry_offsets.remove(i);
        for o in &mut self.entry_offsets[i..] {
            *o -= len;
        }
        self.end_offset -= len;
        let n = self.entry_offsets.len();
        self.set_num_entries(n);
    }

    /// Block-move the first `count` entries onto the end of `left`.
    pub fn move_prefix_to(&mut self, left: &mut LeafPage, count: usize) -> StorageResult<()> {
        if count == 0 {
            return Ok(());
        }
        let moved_len = self.entries_byte_size(0, count);
        let moved = self
            .page
            .rl()
            .read_bytes(LEAF_HEADER_SIZE, moved_len)
            .to_vec();

        // Append to left.
        {
            let mut p = left.page.wl();
            p.write_bytes(left.end_offset, &moved);
        }
        for off in &self.entry_offsets[..count] {
            left.entry_offsets
                .push(left.end_offset + (off - LEAF_HEADER_SIZE));
        }
        left.end_offset += moved_len;
        let left_n = left.entry_offsets.len();
        left.set_num_entries(left_n);

        // Compact self.
        {
            let mut p = self.page.wl();
            p.move_data_range(
                LEAF_HEADER_SIZE + moved_len,
                LEAF_HEADER_SIZE,
                self.end_offset - LEAF_HEADER_SIZE - moved_len,
            );
        }
        self.entry_offsets.drain(..count);
        for o in &mut self.entry_offsets {
            *o -= moved_len;
        }
        self.end_offset -= moved_len;
        let n = self.entry_offsets.len();
        self.set_num_entries(n);
        Ok(())
    }

    /// Block-move the last `count` entries onto the front of `right`.
    pub fn move_suffix_to(&mut self, right: &mut LeafPage, count: usize) -> StorageResult<()> {
        if count == 0 {
            return Ok(());
        }
        let n = self.num_entries();
        let first_moved = n - count;
        let start = self.entry_offsets[first_moved];
        let moved_len = self.end_offset - start;
        let moved = self.page.rl().read_bytes(start, moved_len).to_vec();

        // Prepend to right.
        {
            let mut p = right.page.wl();
            p.move_data_range(
                LEAF_HEADER_SIZE,
                LEAF_HEADER_SIZE + moved_len,
                right.end_offset - LEAF_HEADER_SIZE,
            );
            p.write_bytes(LEAF_HEADER_SIZE, &moved);
        }
        let mut new_offsets = Vec::with_capacity(right.entry_offsets.len() + count);
        for off in &self.entry_offsets[first_moved..] {
            new_offsets.push(LEAF_HEADER_SIZE + (off - start));
        }
        for off in &right.entry_offsets {
            new_offsets.push(off + moved_len);
        }
        right.entry_offsets = new_offsets;
        right.end_offset += moved_len;
        let right_n = right.entry_offsets.len();
        right.set_num_entries(right_n);

        // Truncate self.
        self.entry_offsets.truncate(first_moved);
        self.end_offset = start;
        self.set_num_entries(first_moved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::NO_PAGE;
    use crate::heap::FilePointer;
    use crate::schema::{ColumnInfo, ColumnType};
    use crate::tuple::Value;
    use crate::util::pod;

    const PAGE_SIZE: usize = 512;

    fn cols() -> Vec<ColumnInfo> {
        vec![ColumnInfo::new("id", ColumnType::Integer)]
    }

    fn key(id: i32) -> IndexKey {
        IndexKey::new(vec![Value::Int(id)], FilePointer::new(1, id as u16))
    }

    fn empty_leaf(page_no: u32) -> LeafPage {
        let file = tempfile::tempfile().unwrap();
        let db_file = crate::storage::file::DbFile::new(
            "i.idx",
            crate::storage::file::DbFileType::BTreeIndex,
            PAGE_SIZE,
            file,
        );
        let mut page = DbPage::new(db_file, page_no, vec![0u8; PAGE_SIZE]);
        LeafPage::init(&mut page, NO_PAGE);
        LeafPage::wrap(pod(page), &cols()).unwrap()
    }

    fn insert_key(leaf: &mut LeafPage, k: &IndexKey) {
        let bytes = k.encode(&cols()).unwrap();
        let (pos, exact) = leaf.find_position(k).unwrap();
        assert!(!exact);
        leaf.insert_entry_at(pos, &bytes).unwrap();
    }

    #[test]
    fn insertion_keeps_sorted_order() {
        let mut leaf = empty_leaf(1);
        for id in [5, 1, 9, 3, 7] {
            insert_key(&mut leaf, &key(id));
        }
        let got: Vec<i32> = (0..leaf.num_entries())
            .map(|i| match leaf.key_at(i).unwrap().values[0] {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn remove_entry_compacts() {
        let mut leaf = empty_leaf(1);
        for id in [1, 2, 3] {
            insert_key(&mut leaf, &key(id));
        }
        leaf.remove_entry(1);
        assert_eq!(leaf.num_entries(), 2);
        assert_eq!(leaf.key_at(0).unwrap(), key(1));
        assert_eq!(leaf.key_at(1).unwrap(), key(3));
    }

    #[test]
    fn block_moves_between_siblings() {
        let mut a = empty_leaf(1);
        let mut b = empty_leaf(2);
        for id in [1, 2, 3, 4] {
            insert_key(&mut a, &key(id));
        }
        for id in [5, 6] {
            insert_key(&mut b, &key(id));
        }

        // a:[1,2,3,4] b:[5,6] -> move suffix [3,4] to b's front.
        a.move_suffix_to(&mut b, 2).unwrap();
        assert_eq!(a.num_entries(), 2);
        assert_eq!(b.num_entries(), 4);
        assert_eq!(b.key_at(0).unwrap(), key(3));
        assert_eq!(b.key_at(3).unwrap(), key(6));

        // Move prefix [3] of b back onto a's end.
        b.move_prefix_to(&mut a, 1).unwrap();
        assert_eq!(a.num_entries(), 3);
        assert_eq!(a.key_at(2).unwrap(), key(3));
        assert_eq!(b.key_at(0).unwrap(), key(4));

        // The wrapped state matches a fresh parse after all the moves.
        let reparsed = LeafPage::wrap(a.page().clone(), &cols()).unwrap();
        assert_eq!(reparsed.num_entries(), 3);
        assert_eq!(reparsed.end_offset(), a.end_offset());
    }
}
