//! Write-ahead log records and their on-disk framing.
//!
//! Every record is framed as
//! `{size(2), type(1), txnId(4), prevLsnFile(4), prevLsnOffset(4), payload}`
//! where `size` counts everything after the two-byte size field itself.

use std::io::Read;

use crate::error::{StorageError, StorageResult};
use crate::io::{read_exact, ByteWriter, Decodeable};
use crate::wal::lsn::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordType {
    StartTxn = 1,
    UpdatePage = 2,
    CommitTxn = 3,
    AbortTxn = 4,
    Clr = 5,
    EndTxn = 6,
}

impl WalRecordType {
    pub fn from_u8(value: u8) -> StorageResult<Self> {
        match value {
            1 => Ok(WalRecordType::StartTxn),
            2 => Ok(WalRecordType::UpdatePage),
            3 => Ok(WalRecordType::CommitTxn),
            4 => Ok(WalRecordType::AbortTxn),
            5 => Ok(WalRecordType::Clr),
            6 => Ok(WalRecordType::EndTxn),
            other => Err(StorageError::corrupt_log(format!(
                "unknown record type {}",
                other
            ))),
        }
    }
}

/// Type-specific payload of a WAL record.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    StartTxn,
    /// A physical byte-range delta against one page.
    UpdatePage {
        file_name: String,
        page_no: u32,
        offset: u32,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    CommitTxn,
    AbortTxn,
    /// Compensation record written during undo. Redo replays `after` (the
    /// restored before-image); undo jumps straight to `undo_next`, so a
    /// compensated update is never undone twice.
    Clr {
        file_name: String,
        page_no: u32,
        offset: u32,
        undo_next: Lsn,
        after: Vec<u8>,
    },
    EndTxn,
}

impl WalRecord {
    pub fn record_type(&self) -> WalRecordType {
        match self {
            WalRecord::StartTxn => WalRecordType::StartTxn,
            WalRecord::UpdatePage { .. } => WalRecordType::UpdatePage,
            WalRecord::CommitTxn => WalRecordType::CommitTxn,
            WalRecord::AbortTxn => WalRecordType::AbortTxn,
            WalRecord::Clr { .. } => WalRecordType::Clr,
            WalRecord::EndTxn => WalRecordType::EndTxn,
        }
    }
}

/// A complete framed record: header fields plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecordFrame {
    pub txn_id: u32,
    pub prev_lsn: Lsn,
    pub body: WalRecord,
}

impl WalRecordFrame {
    pub fn new(txn_id: u32, prev_lsn: Lsn, body: WalRecord) -> Self {
        Self {
            txn_id,
            prev_lsn,
            body,
        }
    }

    /// Serialize the record; the result length is the record's total on-disk
    /// size.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        match &self.body {
            WalRecord::StartTxn | WalRecord::CommitTxn | WalRecord::AbortTxn | WalRecord::EndTxn => {}
            WalRecord::UpdatePage {
                file_name,
                page_no,
                offset,
                before,
                after,
            } => {
                payload.write(file_name);
                payload.write(page_no);
                payload.write(offset);
                payload.write(&(before.len() as u16));
                payload.write_bytes(before);
                payload.write(&(after.len() as u16));
                payload.write_bytes(after);
            }
            WalRecord::Clr {
                file_name,
                page_no,
                offset,
                undo_next,
                after,
            } => {
                payload.write(file_name);
                payload.write(page_no);
                payload.write(offset);
                payload.write(&undo_next.file_no);
                payload.write(&undo_next.offset);
                payload.write(&(after.len() as u16));
                payload.write_bytes(after);
            }
        }

        let payload = payload.into_bytes();
        let size = (1 + 4 + 4 + 4 + payload.len()) as u16;

        let mut w = ByteWriter::new();
        w.write(&size);
        w.write(&(self.body.record_type() as u8));
        w.write(&self.txn_id);
        w.write(&self.prev_lsn.file_no);
        w.write(&self.prev_lsn.offset);
        w.write_bytes(&payload);
        w.into_bytes()
    }

    /// Read one framed record; returns the frame and its total on-disk size.
    ///
    /// A size field of zero means the reader ran into the zero-filled tail of
    /// a log file; callers treat that as "advance to the next file".
    pub fn decode_from<R: Read>(reader: &mut R) -> StorageResult<Option<(Self, u32)>> {
        let size = u16::decode_from(reader)?;
        if size == 0 {
            return Ok(None);
        }
        if size < 13 {
            return Err(StorageError::corrupt_log(format!(
                "record size {} below header size",
                size
            )));
        }

        let record_type = WalRecordType::from_u8(u8::decode_from(reader)?)?;
        let txn_id = u32::decode_from(reader)?;
        let prev_lsn = Lsn::new(u32::decode_from(reader)?, u32::decode_from(reader)?);

        let body = match record_type {
            WalRecordType::StartTxn => WalRecord::StartTxn,
            WalRecordType::CommitTxn => WalRecord::CommitTxn,
            WalRecordType::AbortTxn => WalRecord::AbortTxn,
            WalRecordType::EndTxn => WalRecord::EndTxn,
            WalRecordType::UpdatePage => {
                let file_name = String::decode_from(reader)?;
                let page_no = u32::decode_from(reader)?;
                let offset = u32::decode_from(reader)?;
                let before_len = u16::decode_from(reader)?;
                let before = read_exact(reader, before_len as usize)?;
                let after_len = u16::decode_from(reader)?;
                let after = read_exact(reader, after_len as usize)?;
                WalRecord::UpdatePage {
                    file_name,
                    page_no,
                    offset,
                    before,
                    after,
                }
            }
            WalRecordType::Clr => {
                let file_name = String::decode_from(reader)?;
                let page_no = u32::decode_from(reader)?;
                let offset = u32::decode_from(reader)?;
                let undo_next = Lsn::new(u32::decode_from(reader)?, u32::decode_from(reader)?);
                let after_len = u16::decode_from(reader)?;
                let after = read_exact(reader, after_len as usize)?;
                WalRecord::Clr {
                    file_name,
                    page_no,
                    offset,
                    undo_next,
                    after,
                }
            }
        };

        Ok(Some((
            Self {
                txn_id,
                prev_lsn,
                body,
            },
            2 + size as u32,
        )))
    }

    /// One-line description for log dumps.
    pub fn describe(&self, lsn: Lsn) -> String {
        match &self.body {
            WalRecord::StartTxn => format!("{} START txn={}", lsn, self.txn_id),
            WalRecord::CommitTxn => format!("{} COMMIT txn={}", lsn, self.txn_id),
            WalRecord::AbortTxn => format!("{} ABORT txn={}", lsn, self.txn_id),
            WalRecord::EndTxn => format!("{} END txn={}", lsn, self.txn_id),
            WalRecord::UpdatePage {
                file_name,
                page_no,
                offset,
                before,
                after,
            } => format!(
                "{} UPDATE txn={} {}:{} @{} before={} after={}",
                lsn,
                self.txn_id,
                file_name,
                page_no,
                offset,
                preview(before),
                preview(after),
            ),
            WalRecord::Clr {
                file_name,
                page_no,
                offset,
                undo_next,
                after,
            } => format!(
                "{} CLR txn={} {}:{} @{} undo_next={} after={}",
                lsn,
                self.txn_id,
                file_name,
                page_no,
                offset,
                undo_next,
                preview(after),
            ),
        }
    }
}

fn preview(bytes: &[u8]) -> String {
    if bytes.len() <= 16 {
        format!("[{}]", hex::encode(bytes))
    } else {
        format!("[{}..;{}B]", hex::encode(&bytes[..16]), bytes.len())
    }
}
