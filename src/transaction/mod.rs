//! Transaction lifecycle, WAL writing, and the force discipline.
//!
//! The manager owns the log tail (`next_lsn`), the transaction-id counter,
//! and the persisted global state in `txnstate.dat`. WAL and txn-state pages
//! flow through the buffer manager like every other page; the paths that
//! write them never consult the log again, which is what keeps the
//! force-on-evict recursion finite.

use std::collections::HashMap;

use log::{debug, warn};

use crate::buffer::BufferManager;
use crate::error::{StorageError, StorageResult};
use crate::storage::file::{DbFile, DbFileType};
use crate::storage::file_manager::{wal_file_name, FileManager};
use crate::storage::page::PagePod;
use crate::util::HandyRwLock;
use crate::wal::record::{WalRecord, WalRecordFrame};
use crate::wal::{Lsn, MAX_CHANGE_CHUNK, WAL_FILE_CAPACITY, WAL_FIRST_RECORD_OFFSET};

pub mod recovery;

pub const TXN_STATE_FILENAME: &str = "txnstate.dat";

/// Session id reserved for the engine's own page accesses (WAL writes,
/// recovery); real sessions start at 1.
pub const SYSTEM_SESSION: u32 = 0;

/// Per-session transaction state.
#[derive(Debug, Clone, Default)]
pub struct TransactionState {
    pub txn_id: Option<u32>,
    /// True when the transaction came from an explicit BEGIN rather than
    /// statement auto-start.
    pub user_started: bool,
    /// Set once START_TXN has been written; read-only transactions never log
    /// anything.
    pub logged_start: bool,
}

impl TransactionState {
    pub fn in_progress(&self) -> bool {
        self.txn_id.is_some()
    }
}

pub struct TransactionManager {
    state_file: DbFile,
    wal_page_size: usize,
    pub(crate) next_txn_id: u32,
    pub(crate) first_lsn: Lsn,
    pub(crate) next_lsn: Lsn,
    last_forced: Lsn,
    /// Last record written per in-flight transaction, for prevLSN chaining.
    txn_last_lsn: HashMap<u32, Lsn>,
}

impl TransactionManager {
    /// Open or create `txnstate.dat` and position the log tail. Does not run
    /// recovery; the engine calls [`recovery::recover`] right after.
    pub fn open(
        fm: &FileManager,
        buffer: &mut BufferManager,
        page_size: usize,
    ) -> StorageResult<Self> {
        let fresh = !fm.file_exists(TXN_STATE_FILENAME);
        let state_file = if fresh {
            fm.create_file(TXN_STATE_FILENAME, DbFileType::TxnState, page_size)?
        } else {
            fm.open_file(TXN_STATE_FILENAME)?
        };
        buffer.register_file(&state_file);

        let origin = Lsn::new(0, WAL_FIRST_RECORD_OFFSET);
        let mut mgr = Self {
            state_file,
            wal_page_size: page_size,
            next_txn_id: 1,
            first_lsn: origin,
            next_lsn: origin,
            last_forced: Lsn::ZERO,
            txn_last_lsn: HashMap::new(),
        };

        if fresh {
            mgr.store_txn_state(fm, buffer)?;
        } else {
            let page = buffer.fetch_page(fm, None, &mgr.state_file.clone(), 0, false, SYSTEM_SESSION)?;
            {
                let p = page.rl();
                mgr.next_txn_id = p.read_u32(2);
                mgr.first_lsn = Lsn::new(p.read_u32(6), p.read_u32(10));
                mgr.next_lsn = Lsn::new(p.read_u32(14), p.read_u32(18));
            }
            buffer.unpin_page(&page, SYSTEM_SESSION);

            // A zero-valued LSN from an interrupted initialization means the
            // log origin.
            if mgr.first_lsn.offset < WAL_FIRST_RECORD_OFFSET {
                mgr.first_lsn = Lsn::new(mgr.first_lsn.file_no, WAL_FIRST_RECORD_OFFSET);
            }
            if mgr.next_lsn.offset < WAL_FIRST_RECORD_OFFSET {
                mgr.next_lsn = Lsn::new(mgr.next_lsn.file_no, WAL_FIRST_RECORD_OFFSET);
            }
        }

        debug!(
            "transaction manager open: next_txn_id={} first={} next={}",
            mgr.next_txn_id, mgr.first_lsn, mgr.next_lsn
        );
        Ok(mgr)
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    /// Begin a transaction for the session. No WAL record is written until
    /// the first logged page update.
    pub fn begin(&mut self, state: &mut TransactionState, user_started: bool) -> StorageResult<()> {
        if state.in_progress() {
            return Err(StorageError::TransactionInProgress);
        }
        let txn_id = self.next_txn_id;
        self.next_txn_id += 1;

        *state = TransactionState {
            txn_id: Some(txn_id),
            user_started,
            logged_start: false,
        };
        debug!("begin txn {} (user_started={})", txn_id, user_started);
        Ok(())
    }

    /// Log the delta between a dirty page and its before-image, stamping the
    /// page with the record's LSN. A clean page is a no-op.
    pub fn record_page_update(
        &mut self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        state: &mut TransactionState,
        page: &PagePod,
    ) -> StorageResult<()> {
        let txn_id = state.txn_id.ok_or(StorageError::NoTransaction)?;

        {
            let p = page.rl();
            if !p.is_dirty() {
                return Ok(());
            }
        }

        let (range, file_name, page_no) = {
            let p = page.rl();
            (
                p.changed_range(),
                p.file().name().to_string(),
                p.page_no(),
            )
        };
        let (start, end) = match range {
            Some(r) => r,
            // Dirty flag raised but the bytes match the before-image.
            None => return Ok(()),
        };

        if !state.logged_start {
            let lsn = self.append_record(
                fm,
                buffer,
                WalRecordFrame::new(txn_id, Lsn::ZERO, WalRecord::StartTxn),
            )?;
            self.txn_last_lsn.insert(txn_id, lsn);
            state.logged_start = true;
        }

        let mut last_lsn = Lsn::ZERO;
        let mut chunk_start = start;
        while chunk_start < end {
            let chunk_end = std::cmp::min(end, chunk_start + MAX_CHANGE_CHUNK);
            let (before, after) = {
                let p = page.rl();
                (
                    p.old_bytes(chunk_start, chunk_end - chunk_start).to_vec(),
                    p.read_bytes(chunk_start, chunk_end - chunk_start).to_vec(),
                )
            };
            let prev = self.txn_last_lsn[&txn_id];
            let lsn = self.append_record(
                fm,
                buffer,
                WalRecordFrame::new(
                    txn_id,
                    prev,
                    WalRecord::UpdatePage {
                        file_name: file_name.clone(),
                        page_no,
                        offset: chunk_start as u32,
                        before,
                        after,
                    },
                ),
            )?;
            self.txn_last_lsn.insert(txn_id, lsn);
            last_lsn = lsn;
            chunk_start = chunk_end;
        }

        let mut p = page.wl();
        p.set_lsn(last_lsn);
        p.sync_old_data();
        Ok(())
    }

    /// Commit the session's transaction: COMMIT_TXN, force, persist state.
    pub fn commit(
        &mut self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        state: &mut TransactionState,
    ) -> StorageResult<()> {
        let txn_id = state.txn_id.ok_or(StorageError::NoTransaction)?;

        if state.logged_start {
            let prev = self.txn_last_lsn[&txn_id];
            let lsn = self.append_record(
                fm,
                buffer,
                WalRecordFrame::new(txn_id, prev, WalRecord::CommitTxn),
            )?;
            self.force_wal_to(fm, buffer, lsn)?;

            // The commit record is durable; a failure past this point must
            // not un-commit the transaction.
            if let Err(e) = self.store_txn_state(fm, buffer) {
                warn!("txn {} committed, state store failed: {}", txn_id, e);
            }
        }

        debug!("commit txn {}", txn_id);
        self.txn_last_lsn.remove(&txn_id);
        *state = TransactionState::default();
        Ok(())
    }

    /// Roll the session's transaction back by walking its record chain in
    /// reverse, restoring before-images and logging a CLR for each.
    pub fn rollback(
        &mut self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        state: &mut TransactionState,
    ) -> StorageResult<()> {
        let txn_id = state.txn_id.ok_or(StorageError::NoTransaction)?;

        if state.logged_start {
            let last = self.txn_last_lsn[&txn_id];
            let final_last = self.undo_chain(fm, buffer, txn_id, last)?;
            self.append_record(
                fm,
                buffer,
                WalRecordFrame::new(txn_id, final_last, WalRecord::AbortTxn),
            )?;
        }

        debug!("rollback txn {}", txn_id);
        self.txn_last_lsn.remove(&txn_id);
        *state = TransactionState::default();
        Ok(())
    }

    /// Walk a transaction's chain backwards from `last_lsn`, undoing each
    /// UPDATE_PAGE and logging a CLR. CLRs encountered on the way jump via
    /// their undo-next pointer, so nothing is compensated twice. Returns the
    /// LSN the terminating ABORT_TXN should chain from.
    pub(crate) fn undo_chain(
        &mut self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        txn_id: u32,
        mut last_lsn: Lsn,
    ) -> StorageResult<Lsn> {
        let mut cur = last_lsn;
        while !cur.is_zero() {
            let WalRecordFrame { prev_lsn, body, .. } = self.read_record_at(fm, buffer, cur)?;
            match body {
                WalRecord::UpdatePage {
                    file_name,
                    page_no,
                    offset,
                    before,
                    ..
                } => {
                    let file = resolve_file(fm, buffer, &file_name)?;
                    let page = buffer.fetch_page(fm, None, &file, page_no, true, SYSTEM_SESSION)?;
                    page.wl().write_bytes(offset as usize, &before);

                    let clr_lsn = self.append_record(
                        fm,
                        buffer,
                        WalRecordFrame::new(
                            txn_id,
                            last_lsn,
                            WalRecord::Clr {
                                file_name,
                                page_no,
                                offset,
                                undo_next: prev_lsn,
                                after: before,
                            },
                        ),
                    )?;
                    {
                        let mut p = page.wl();
                        p.set_lsn(clr_lsn);
                        p.sync_old_data();
                    }
                    buffer.unpin_page(&page, SYSTEM_SESSION);
                    last_lsn = clr_lsn;
                    cur = prev_lsn;
                }
                WalRecord::Clr { undo_next, .. } => cur = undo_next,
                WalRecord::StartTxn => break,
                _ => cur = prev_lsn,
            }
        }
        Ok(last_lsn)
    }

    /// Force the WAL so that everything up to and including the record at
    /// `target` is durable. Idempotent for targets at or below the last
    /// force.
    pub fn force_wal_to(
        &mut self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        target: Lsn,
    ) -> StorageResult<()> {
        if target <= self.last_forced {
            return Ok(());
        }

        for file_no in self.last_forced.file_no..target.file_no {
            let name = wal_file_name(file_no);
            if fm.file_exists(&name) {
                let file = fm.open_file(&name)?;
                buffer.write_file(fm, &file, None, true)?;
            }
        }

        let name = wal_file_name(target.file_no);
        if fm.file_exists(&name) {
            let file = fm.open_file(&name)?;
            let page_size = file.page_size() as u32;
            let end = target.end_offset();
            let last_page = if end == 0 {
                0
            } else {
                (end + page_size - 1) / page_size - 1
            };
            buffer.write_file(fm, &file, Some((0, last_page)), true)?;
        }

        debug!("forced WAL through {}", target);
        self.last_forced = target;
        self.store_txn_state(fm, buffer)?;
        Ok(())
    }

    /// Force the whole log written so far.
    pub fn force_wal(&mut self, fm: &FileManager, buffer: &mut BufferManager) -> StorageResult<()> {
        let target = Lsn::new(self.next_lsn.file_no, self.next_lsn.offset);
        self.force_wal_to(fm, buffer, target)
    }

    /// Clean-shutdown path: force the whole log, collapse the redo window
    /// (every page image is on disk by now), and persist the state.
    pub fn shutdown(&mut self, fm: &FileManager, buffer: &mut BufferManager) -> StorageResult<()> {
        self.force_wal(fm, buffer)?;
        self.first_lsn = self.next_lsn;
        self.store_txn_state(fm, buffer)
    }

    /// Persist `{nextTxnId, firstLSN, nextLSN}` into `txnstate.dat`.
    pub(crate) fn store_txn_state(
        &mut self,
        fm: &FileManager,
        buffer: &mut BufferManager,
    ) -> StorageResult<()> {
        let state_file = self.state_file.clone();
        let page = buffer.fetch_page(fm, None, &state_file, 0, true, SYSTEM_SESSION)?;
        {
            let mut p = page.wl();
            p.write_u32(2, self.next_txn_id);
            p.write_u32(6, self.first_lsn.file_no);
            p.write_u32(10, self.first_lsn.offset);
            p.write_u32(14, self.next_lsn.file_no);
            p.write_u32(18, self.next_lsn.offset);
            p.sync_old_data();
        }
        buffer.unpin_page(&page, SYSTEM_SESSION);
        buffer.write_file(fm, &state_file, None, true)?;
        Ok(())
    }

    fn wal_file(
        &self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        file_no: u32,
        create: bool,
    ) -> StorageResult<DbFile> {
        let name = wal_file_name(file_no);
        let file = if fm.file_exists(&name) {
            fm.open_file(&name)?
        } else if create {
            fm.create_file(&name, DbFileType::Wal, self.wal_page_size)?
        } else {
            return Err(StorageError::corrupt_log(format!(
                "log file {} is missing",
                name
            )));
        };
        buffer.register_file(&file);
        Ok(file)
    }

    /// Append one framed record at the log tail, rolling over to the next
    /// file when the record would cross the per-file capacity.
    pub(crate) fn append_record(
        &mut self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        frame: WalRecordFrame,
    ) -> StorageResult<Lsn> {
        let bytes = frame.encode();
        let total = bytes.len() as u32;

        if self.next_lsn.offset + total > WAL_FILE_CAPACITY {
            self.next_lsn = Lsn::new(self.next_lsn.file_no + 1, WAL_FIRST_RECORD_OFFSET);
        }

        let lsn = Lsn::with_size(self.next_lsn.file_no, self.next_lsn.offset, total);
        let file = self.wal_file(fm, buffer, lsn.file_no, true)?;
        let page_size = file.page_size();

        let mut written = 0usize;
        while written < bytes.len() {
            let file_off = lsn.offset as usize + written;
            let page_no = (file_off / page_size) as u32;
            let in_off = file_off % page_size;
            let n = std::cmp::min(bytes.len() - written, page_size - in_off);

            let page = buffer.fetch_page(fm, None, &file, page_no, true, SYSTEM_SESSION)?;
            {
                let mut p = page.wl();
                p.write_bytes(in_off, &bytes[written..written + n]);
                p.sync_old_data();
            }
            buffer.unpin_page(&page, SYSTEM_SESSION);
            written += n;
        }

        self.next_lsn = Lsn::new(lsn.file_no, lsn.offset + total);
        Ok(lsn)
    }

    /// Read the framed record that starts exactly at `lsn`.
    pub(crate) fn read_record_at(
        &self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        lsn: Lsn,
    ) -> StorageResult<WalRecordFrame> {
        let file = self.wal_file(fm, buffer, lsn.file_no, false)?;
        let mut reader = WalPageReader {
            fm,
            buffer,
            file,
            offset: lsn.offset as u64,
        };
        match WalRecordFrame::decode_from(&mut reader)? {
            Some((frame, _)) => Ok(frame),
            None => Err(StorageError::corrupt_log(format!(
                "no record at {}",
                lsn
            ))),
        }
    }

    /// Read the record at `cursor` during a forward scan. `Ok(None)` means
    /// the cursor ran into the zero tail of a log file and should hop to the
    /// next file.
    pub(crate) fn scan_record_at(
        &self,
        fm: &FileManager,
        buffer: &mut BufferManager,
        cursor: Lsn,
    ) -> StorageResult<Option<(WalRecordFrame, u32)>> {
        let file = match self.wal_file(fm, buffer, cursor.file_no, false) {
            Ok(f) => f,
            Err(_) => return Ok(None),
        };
        let mut reader = WalPageReader {
            fm,
            buffer,
            file,
            offset: cursor.offset as u64,
        };
        match WalRecordFrame::decode_from(&mut reader) {
            Ok(found) => Ok(found),
            Err(StorageError::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Dump the whole log through the `log` facade, for debugging.
    pub fn dump_log(&self, fm: &FileManager, buffer: &mut BufferManager) -> StorageResult<()> {
        let mut cur = self.first_lsn;
        while cur < self.next_lsn {
            match self.scan_record_at(fm, buffer, cur)? {
                Some((frame, total)) => {
                    debug!("{}", frame.describe(cur));
                    cur = Lsn::new(cur.file_no, cur.offset + total);
                }
                None => {
                    cur = Lsn::new(cur.file_no + 1, WAL_FIRST_RECORD_OFFSET);
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn resolve_file(
    fm: &FileManager,
    buffer: &BufferManager,
    name: &str,
) -> StorageResult<DbFile> {
    match buffer.registered_file(name) {
        Some(f) => Ok(f),
        None => fm.open_file(name),
    }
}

/// Byte reader over the pages of one WAL file, for record decoding.
struct WalPageReader<'a> {
    fm: &'a FileManager,
    buffer: &'a mut BufferManager,
    file: DbFile,
    offset: u64,
}

impl std::io::Read for WalPageReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let page_size = self.file.page_size();
        let page_no = (self.offset / page_size as u64) as u32;
        let in_off = (self.offset % page_size as u64) as usize;

        let page = self
            .buffer
            .fetch_page(self.fm, None, &self.file, page_no, false, SYSTEM_SESSION)
            .map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e.to_string())
            })?;
        let n = std::cmp::min(buf.len(), page_size - in_off);
        buf[..n].copy_from_slice(page.rl().read_bytes(in_off, n));
        self.buffer.unpin_page(&page, SYSTEM_SESSION);

        self.offset += n as u64;
        Ok(n)
    }
}
