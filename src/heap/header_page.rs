//! The heap file's header page: schema and statistics behind the two-byte
//! type/page-size prefix.
//!
//! Layout: `schemaSize(2), statsSize(2), schema bytes, stats bytes` starting
//! at offset 2.

use std::io::Cursor;

use crate::error::{StorageError, StorageResult};
use crate::io::{Decodeable, Encodeable};
use crate::schema::stats::TableStats;
use crate::schema::Schema;
use crate::storage::page::DbPage;

const SCHEMA_SIZE_OFFSET: usize = 2;
const STATS_SIZE_OFFSET: usize = 4;
const CONTENT_OFFSET: usize = 6;

pub fn write_header(page: &mut DbPage, schema: &Schema, stats: &TableStats) -> StorageResult<()> {
    let schema_bytes = schema.encode();
    let stats_bytes = stats.encode(schema)?;

    let total = CONTENT_OFFSET + schema_bytes.len() + stats_bytes.len();
    if total > page.page_size() {
        return Err(StorageError::schema(format!(
            "schema and statistics need {} bytes, header page holds {}",
            total,
            page.page_size()
        )));
    }

    page.write_u16(SCHEMA_SIZE_OFFSET, schema_bytes.len() as u16);
    page.write_u16(STATS_SIZE_OFFSET, stats_bytes.len() as u16);
    page.write_bytes(CONTENT_OFFSET, &schema_bytes);
    page.write_bytes(CONTENT_OFFSET + schema_bytes.len(), &stats_bytes);
    Ok(())
}

pub fn read_header(page: &DbPage) -> StorageResult<(Schema, TableStats)> {
    let schema_size = page.read_u16(SCHEMA_SIZE_OFFSET) as usize;
    let stats_size = page.read_u16(STATS_SIZE_OFFSET) as usize;

    let mut r = Cursor::new(page.read_bytes(CONTENT_OFFSET, schema_size));
    let schema = Schema::decode_from(&mut r)?;

    let stats = if stats_size == 0 {
        TableStats::empty(schema.num_columns())
    } else {
        let mut r = Cursor::new(page.read_bytes(CONTENT_OFFSET + schema_size, stats_size));
        TableStats::decode(&mut r, &schema)?
    };

    Ok((schema, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, ColumnType};
    use crate::storage::file::{DbFile, DbFileType};

    #[test]
    fn header_round_trips() {
        let file = tempfile::tempfile().unwrap();
        let db_file = DbFile::new("t.tbl", DbFileType::HeapData, 1024, file);
        let mut page = DbPage::new(db_file, 0, vec![0u8; 1024]);

        let schema = Schema::new(vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("name", ColumnType::Varchar(32)),
        ])
        .unwrap();
        let mut stats = TableStats::empty(2);
        stats.num_tuples = 99;

        write_header(&mut page, &schema, &stats).unwrap();
        let (schema2, stats2) = read_header(&page).unwrap();
        assert_eq!(schema2, schema);
        assert_eq!(stats2, stats);
    }
}
