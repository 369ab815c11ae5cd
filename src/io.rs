//! Binary codec plumbing shared by every on-disk structure.
//!
//! All multi-byte integers are big-endian on disk; floats are IEEE-754
//! big-endian. Short strings (column and constraint names) carry a one-byte
//! length prefix, variable-length column payloads a two-byte prefix.

use std::convert::TryInto;
use std::io::Read;
use std::mem::size_of;

use crate::error::{StorageError, StorageResult};

/// A value that can serialize itself into the on-disk byte order.
pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;

    /// Number of bytes `encode` will produce.
    fn encoded_size(&self) -> usize {
        self.encode().len()
    }
}

/// A value that can reconstruct itself from the on-disk byte order.
pub trait Decodeable: Sized {
    fn decode_from<R: Read>(reader: &mut R) -> StorageResult<Self>;
}

pub fn read_exact<R: Read>(reader: &mut R, count: usize) -> StorageResult<Vec<u8>> {
    let mut buf = vec![0u8; count];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_into<T: Decodeable, R: Read>(reader: &mut R) -> StorageResult<T> {
    T::decode_from(reader)
}

/// Growable byte buffer used to assemble page images and log records.
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable + ?Sized>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// The buffer extended with zeroes up to `size`. Panics if the content
    /// already exceeds `size`; callers size their pages beforehand.
    pub fn into_padded_bytes(mut self, size: usize) -> Vec<u8> {
        assert!(
            self.buf.len() <= size,
            "buffer holds {} bytes, page is {}",
            self.buf.len(),
            size
        );
        self.buf.resize(size, 0);
        self.buf
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! impl_codec {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }

                fn encoded_size(&self) -> usize {
                    size_of::<Self>()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> StorageResult<Self> {
                    let bytes = read_exact(reader, size_of::<Self>())?;
                    Ok(Self::from_be_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    }
}

impl_codec!(for u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Encodeable for [u8] {
    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }

    fn encoded_size(&self) -> usize {
        self.len()
    }
}

/// # Format
///
/// - 1 byte: string length (0-255)
/// - n bytes: UTF-8 payload
///
/// Used for names (files, columns, constraints). Longer payloads (VARCHAR
/// column values) use the two-byte form in the tuple codec.
impl Encodeable for String {
    fn encode(&self) -> Vec<u8> {
        let payload = self.as_bytes();
        assert!(payload.len() <= u8::MAX as usize, "name too long: {}", self);

        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(payload.len() as u8);
        buf.extend_from_slice(payload);
        buf
    }

    fn encoded_size(&self) -> usize {
        1 + self.as_bytes().len()
    }
}

impl Decodeable for String {
    fn decode_from<R: Read>(reader: &mut R) -> StorageResult<Self> {
        let size = u8::decode_from(reader)?;
        let bytes = read_exact(reader, size as usize)?;
        String::from_utf8(bytes)
            .map_err(|e| StorageError::corrupt_log(format!("non-utf8 string: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn integers_round_trip_big_endian() {
        let mut w = ByteWriter::new();
        w.write(&0x0102u16);
        w.write(&0x03040506u32);
        w.write(&(-7i64));

        let bytes = w.into_bytes();
        assert_eq!(&bytes[..2], &[0x01, 0x02]);
        assert_eq!(&bytes[2..6], &[0x03, 0x04, 0x05, 0x06]);

        let mut r = Cursor::new(bytes);
        assert_eq!(u16::decode_from(&mut r).unwrap(), 0x0102);
        assert_eq!(u32::decode_from(&mut r).unwrap(), 0x03040506);
        assert_eq!(i64::decode_from(&mut r).unwrap(), -7);
    }

    #[test]
    fn strings_carry_one_byte_prefix() {
        let s = "payroll".to_string();
        let bytes = s.encode();
        assert_eq!(bytes[0], 7);

        let mut r = Cursor::new(bytes);
        assert_eq!(String::decode_from(&mut r).unwrap(), "payroll");
    }

    #[test]
    fn short_read_is_an_error() {
        let mut r = Cursor::new(vec![0u8; 3]);
        assert!(u32::decode_from(&mut r).is_err());
    }
}
