//! The index file's header page.
//!
//! After the two-byte type/page-size prefix: two reserved bytes, the root
//! page number, the first-leaf page number, and the head of the empty-page
//! list (all two bytes). Index metadata follows: the unique flag, the owning
//! table's name, and the indexed column positions.

use crate::error::{StorageError, StorageResult};
use crate::storage::page::DbPage;

const ROOT_OFFSET: usize = 4;
const FIRST_LEAF_OFFSET: usize = 6;
const FIRST_EMPTY_OFFSET: usize = 8;
const META_OFFSET: usize = 10;

pub fn root_page_no(page: &DbPage) -> u16 {
    page.read_u16(ROOT_OFFSET)
}

pub fn set_root_page_no(page: &mut DbPage, no: u16) {
    page.write_u16(ROOT_OFFSET, no);
}

pub fn first_leaf_page_no(page: &DbPage) -> u16 {
    page.read_u16(FIRST_LEAF_OFFSET)
}

pub fn set_first_leaf_page_no(page: &mut DbPage, no: u16) {
    page.write_u16(FIRST_LEAF_OFFSET, no);
}

pub fn first_empty_page_no(page: &DbPage) -> u16 {
    page.read_u16(FIRST_EMPTY_OFFSET)
}

pub fn set_first_empty_page_no(page: &mut DbPage, no: u16) {
    page.write_u16(FIRST_EMPTY_OFFSET, no);
}

/// Index metadata stored behind the fixed header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub unique: bool,
    pub table_name: String,
    pub column_indices: Vec<u8>,
}

pub fn write_meta(page: &mut DbPage, meta: &IndexMeta) -> StorageResult<()> {
    let name = meta.table_name.as_bytes();
    if name.len() > u8::MAX as usize || meta.column_indices.len() > u8::MAX as usize {
        return Err(StorageError::schema("index metadata too large"));
    }

    let mut off = META_OFFSET;
    page.write_u8(off, meta.unique as u8);
    off += 1;
    page.write_u8(off, name.len() as u8);
    off += 1;
    page.write_bytes(off, name);
    off += name.len();
    page.write_u8(off, meta.column_indices.len() as u8);
    off += 1;
    page.write_bytes(off, &meta.column_indices);
    Ok(())
}

pub fn read_meta(page: &DbPage) -> StorageResult<IndexMeta> {
    let mut off = META_OFFSET;
    let unique = page.read_u8(off) != 0;
    off += 1;
    let name_len = page.read_u8(off) as usize;
    off += 1;
    let table_name = String::from_utf8(page.read_bytes(off, name_len).to_vec())
        .map_err(|e| StorageError::schema(format!("bad index metadata: {}", e)))?;
    off += name_len;
    let n_cols = page.read_u8(off) as usize;
    off += 1;
    let column_indices = page.read_bytes(off, n_cols).to_vec();
    Ok(IndexMeta {
        unique,
        table_name,
        column_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::{DbFile, DbFileType};

    #[test]
    fn header_fields_and_meta_round_trip() {
        let file = tempfile::tempfile().unwrap();
        let db_file = DbFile::new("i.idx", DbFileType::BTreeIndex, 512, file);
        let mut page = DbPage::new(db_file, 0, vec![0u8; 512]);

        set_root_page_no(&mut page, 7);
        set_first_leaf_page_no(&mut page, 3);
        set_first_empty_page_no(&mut page, 12);

        let meta = IndexMeta {
            unique: true,
            table_name: "emp".to_string(),
            column_indices: vec![0, 2],
        };
        write_meta(&mut page, &meta).unwrap();

        assert_eq!(root_page_no(&page), 7);
        assert_eq!(first_leaf_page_no(&page), 3);
        assert_eq!(first_empty_page_no(&page), 12);
        assert_eq!(read_meta(&page).unwrap(), meta);
    }
}
