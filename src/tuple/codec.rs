//! The on-page tuple format.
//!
//! A tuple is a NULL bitmap of ceil(n/8) bytes (bit i set means column i is
//! NULL) followed by the non-null column values in column order:
//! fixed-width numerics big-endian, CHAR(n) space-padded to n bytes, VARCHAR
//! behind a two-byte length prefix.

use std::io::Read;

use bit_vec::BitVec;

use crate::error::{StorageError, StorageResult};
use crate::io::{read_exact, ByteWriter, Decodeable};
use crate::schema::{ColumnInfo, ColumnType};
use crate::tuple::value::Value;

pub fn null_bitmap_size(num_columns: usize) -> usize {
    (num_columns + 7) / 8
}

/// Encoded size of one non-null value in a column of `col_type`.
pub fn value_storage_size(value: &Value, col_type: ColumnType) -> StorageResult<usize> {
    if !value.fits_column(col_type) {
        return Err(StorageError::schema(format!(
            "value {} does not fit column type {:?}",
            value, col_type
        )));
    }
    Ok(match col_type {
        ColumnType::Varchar(_) => match value {
            Value::Str(s) => 2 + s.len(),
            _ => unreachable!(),
        },
        other => other.fixed_size().unwrap(),
    })
}

pub fn encode_value(w: &mut ByteWriter, value: &Value, col_type: ColumnType) -> StorageResult<()> {
    if !value.fits_column(col_type) {
        return Err(StorageError::schema(format!(
            "value {} does not fit column type {:?}",
            value, col_type
        )));
    }
    match (value, col_type) {
        (Value::TinyInt(v), ColumnType::TinyInt) => w.write(v),
        (Value::SmallInt(v), ColumnType::SmallInt) => w.write(v),
        (Value::Int(v), ColumnType::Integer) => w.write(v),
        (Value::BigInt(v), ColumnType::BigInt) => w.write(v),
        (Value::Float(v), ColumnType::Float) => w.write(v),
        (Value::Double(v), ColumnType::Double) => w.write(v),
        (Value::Str(s), ColumnType::Char(n)) => {
            let mut bytes = s.as_bytes().to_vec();
            bytes.resize(n as usize, b' ');
            w.write_bytes(&bytes);
        }
        (Value::Str(s), ColumnType::Varchar(_)) => {
            w.write(&(s.len() as u16));
            w.write_bytes(s.as_bytes());
        }
        _ => {
            return Err(StorageError::schema(format!(
                "cannot encode {} as {:?}",
                value, col_type
            )))
        }
    }
    Ok(())
}

pub fn decode_value<R: Read>(reader: &mut R, col_type: ColumnType) -> StorageResult<Value> {
    Ok(match col_type {
        ColumnType::TinyInt => Value::TinyInt(i8::decode_from(reader)?),
        ColumnType::SmallInt => Value::SmallInt(i16::decode_from(reader)?),
        ColumnType::Integer => Value::Int(i32::decode_from(reader)?),
        ColumnType::BigInt => Value::BigInt(i64::decode_from(reader)?),
        ColumnType::Float => Value::Float(f32::decode_from(reader)?),
        ColumnType::Double => Value::Double(f64::decode_from(reader)?),
        ColumnType::Char(n) => {
            let bytes = read_exact(reader, n as usize)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| StorageError::schema(format!("non-utf8 CHAR value: {}", e)))?;
            Value::Str(s.trim_end_matches(' ').to_string())
        }
        ColumnType::Varchar(_) => {
            let len = u16::decode_from(reader)?;
            let bytes = read_exact(reader, len as usize)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| StorageError::schema(format!("non-utf8 VARCHAR value: {}", e)))?;
            Value::Str(s)
        }
    })
}

/// Total on-page size of a tuple: bitmap plus the non-null values.
pub fn tuple_storage_size(values: &[Value], columns: &[ColumnInfo]) -> StorageResult<usize> {
    check_arity(values, columns)?;
    let mut size = null_bitmap_size(columns.len());
    for (value, col) in values.iter().zip(columns) {
        if !value.is_null() {
            size += value_storage_size(value, col.col_type)?;
        }
    }
    Ok(size)
}

pub fn encode_tuple(values: &[Value], columns: &[ColumnInfo]) -> StorageResult<Vec<u8>> {
    check_arity(values, columns)?;

    let mut bitmap = BitVec::from_elem(columns.len(), false);
    for (i, value) in values.iter().enumerate() {
        if value.is_null() {
            bitmap.set(i, true);
        }
    }

    let mut w = ByteWriter::new();
    w.write_bytes(&bitmap.to_bytes());
    for (value, col) in values.iter().zip(columns) {
        if !value.is_null() {
            encode_value(&mut w, value, col.col_type)?;
        }
    }
    Ok(w.into_bytes())
}

pub fn decode_tuple<R: Read>(reader: &mut R, columns: &[ColumnInfo]) -> StorageResult<Vec<Value>> {
    let bitmap = BitVec::from_bytes(&read_exact(reader, null_bitmap_size(columns.len()))?);

    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        if bitmap.get(i).unwrap_or(false) {
            values.push(Value::Null);
        } else {
            values.push(decode_value(reader, col.col_type)?);
        }
    }
    Ok(values)
}

fn check_arity(values: &[Value], columns: &[ColumnInfo]) -> StorageResult<()> {
    if values.len() != columns.len() {
        return Err(StorageError::schema(format!(
            "tuple has {} values for {} columns",
            values.len(),
            columns.len()
        )));
    }
    Ok(())
}
