//! Table statistics persisted in the heap header page.
//!
//! Column statistics are optional piecemeal; a presence mask of four bits
//! per column (distinct, nulls, min, max) prefixes the encoded values.

use std::io::Read;

use bit_vec::BitVec;

use crate::error::StorageResult;
use crate::io::{read_exact, ByteWriter, Decodeable};
use crate::schema::Schema;
use crate::tuple::codec::{decode_value, encode_value};
use crate::tuple::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnStats {
    pub num_distinct: Option<u32>,
    pub num_nulls: Option<u32>,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub num_data_pages: u32,
    pub num_tuples: u32,
    pub avg_tuple_size: f32,
    pub columns: Vec<ColumnStats>,
}

impl TableStats {
    pub fn empty(num_columns: usize) -> Self {
        Self {
            num_data_pages: 0,
            num_tuples: 0,
            avg_tuple_size: 0.0,
            columns: vec![ColumnStats::default(); num_columns],
        }
    }

    pub fn encode(&self, schema: &Schema) -> StorageResult<Vec<u8>> {
        let mut mask = BitVec::from_elem(4 * self.columns.len(), false);
        for (i, col) in self.columns.iter().enumerate() {
            mask.set(4 * i, col.num_distinct.is_some());
            mask.set(4 * i + 1, col.num_nulls.is_some());
            mask.set(4 * i + 2, col.min.is_some());
            mask.set(4 * i + 3, col.max.is_some());
        }

        let mut w = ByteWriter::new();
        w.write(&self.num_data_pages);
        w.write(&self.num_tuples);
        w.write(&self.avg_tuple_size);
        w.write_bytes(&mask.to_bytes());
        for (i, col) in self.columns.iter().enumerate() {
            let col_type = schema.column(i).col_type;
            if let Some(d) = col.num_distinct {
                w.write(&d);
            }
            if let Some(n) = col.num_nulls {
                w.write(&n);
            }
            if let Some(min) = &col.min {
                encode_value(&mut w, min, col_type)?;
            }
            if let Some(max) = &col.max {
                encode_value(&mut w, max, col_type)?;
            }
        }
        Ok(w.into_bytes())
    }

    pub fn decode<R: Read>(reader: &mut R, schema: &Schema) -> StorageResult<Self> {
        let num_data_pages = u32::decode_from(reader)?;
        let num_tuples = u32::decode_from(reader)?;
        let avg_tuple_size = f32::decode_from(reader)?;

        let num_columns = schema.num_columns();
        let mask_bytes = (4 * num_columns + 7) / 8;
        let mask = BitVec::from_bytes(&read_exact(reader, mask_bytes)?);

        let mut columns = Vec::with_capacity(num_columns);
        for i in 0..num_columns {
            let col_type = schema.column(i).col_type;
            let mut stats = ColumnStats::default();
            if mask.get(4 * i).unwrap_or(false) {
                stats.num_distinct = Some(u32::decode_from(reader)?);
            }
            if mask.get(4 * i + 1).unwrap_or(false) {
                stats.num_nulls = Some(u32::decode_from(reader)?);
            }
            if mask.get(4 * i + 2).unwrap_or(false) {
                stats.min = Some(decode_value(reader, col_type)?);
            }
            if mask.get(4 * i + 3).unwrap_or(false) {
                stats.max = Some(decode_value(reader, col_type)?);
            }
            columns.push(stats);
        }

        Ok(Self {
            num_data_pages,
            num_tuples,
            avg_tuple_size,
            columns,
        })
    }
}
