//! Index keys: the indexed column values extended by the tuple's external
//! reference, which makes every key unique even when the logical prefix
//! repeats.

use std::cmp::Ordering;
use std::fmt;
use std::io::Read;

use crate::error::StorageResult;
use crate::heap::FilePointer;
use crate::io::{Decodeable, Encodeable};
use crate::schema::ColumnInfo;
use crate::tuple::codec;
use crate::tuple::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexKey {
    pub values: Vec<Value>,
    pub ptr: FilePointer,
}

impl IndexKey {
    pub fn new(values: Vec<Value>, ptr: FilePointer) -> Self {
        Self { values, ptr }
    }

    /// Stored form: the values in tuple encoding, then the four-byte
    /// external reference.
    pub fn encode(&self, columns: &[ColumnInfo]) -> StorageResult<Vec<u8>> {
        let mut bytes = codec::encode_tuple(&self.values, columns)?;
        bytes.extend_from_slice(&self.ptr.encode());
        Ok(bytes)
    }

    pub fn decode_from<R: Read>(reader: &mut R, columns: &[ColumnInfo]) -> StorageResult<Self> {
        let values = codec::decode_tuple(reader, columns)?;
        let ptr = FilePointer::decode_from(reader)?;
        Ok(Self { values, ptr })
    }

    pub fn storage_size(&self, columns: &[ColumnInfo]) -> StorageResult<usize> {
        Ok(codec::tuple_storage_size(&self.values, columns)? + FilePointer::ENCODED_SIZE)
    }

    /// Total order: column by column with NULL first, the external
    /// reference breaking ties.
    pub fn compare(&self, other: &IndexKey) -> Ordering {
        for (a, b) in self.values.iter().zip(&other.values) {
            match a.compare(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        self.ptr.cmp(&other.ptr)
    }

    /// Compare a logical-key prefix against this key. The prefix sorts
    /// before any stored key sharing it, so the result is never `Equal`;
    /// used to position scans at the first entry at-or-after a prefix.
    pub fn compare_prefix(prefix: &[Value], key: &IndexKey) -> Ordering {
        for (a, b) in prefix.iter().zip(&key.values) {
            match a.compare(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Less
    }

    /// Whether this key's leading columns equal `prefix`.
    pub fn matches_prefix(&self, prefix: &[Value]) -> bool {
        prefix.len() <= self.values.len()
            && prefix
                .iter()
                .zip(&self.values)
                .all(|(a, b)| a.compare(b) == Ordering::Equal)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]@{}", self.ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use std::cmp::Ordering;
    use std::io::Cursor;

    fn cols() -> Vec<ColumnInfo> {
        vec![ColumnInfo::new("id", ColumnType::Integer)]
    }

    fn key(id: i32, page: u16, off: u16) -> IndexKey {
        IndexKey::new(vec![Value::Int(id)], FilePointer::new(page, off))
    }

    #[test]
    fn encode_decode_round_trip() {
        let k = key(42, 3, 10);
        let bytes = k.encode(&cols()).unwrap();
        assert_eq!(bytes.len(), k.storage_size(&cols()).unwrap());
        let back = IndexKey::decode_from(&mut Cursor::new(bytes), &cols()).unwrap();
        assert_eq!(back, k);
    }

    #[test]
    fn uniquifier_breaks_ties() {
        assert_eq!(key(5, 1, 4).compare(&key(5, 1, 6)), Ordering::Less);
        assert_eq!(key(5, 2, 4).compare(&key(5, 1, 6)), Ordering::Greater);
        assert_eq!(key(4, 9, 9).compare(&key(5, 0, 0)), Ordering::Less);
        assert_eq!(key(5, 1, 4).compare(&key(5, 1, 4)), Ordering::Equal);
    }

    #[test]
    fn nulls_sort_before_values() {
        let null_key = IndexKey::new(vec![Value::Null], FilePointer::new(9, 9));
        assert_eq!(null_key.compare(&key(i32::MIN, 0, 0)), Ordering::Less);
    }

    #[test]
    fn prefix_comparison_never_equal() {
        let k = key(5, 1, 4);
        assert_eq!(
            IndexKey::compare_prefix(&[Value::Int(5)], &k),
            Ordering::Less
        );
        assert_eq!(
            IndexKey::compare_prefix(&[Value::Int(6)], &k),
            Ordering::Greater
        );
        assert!(k.matches_prefix(&[Value::Int(5)]));
        assert!(!k.matches_prefix(&[Value::Int(6)]));
    }
}
