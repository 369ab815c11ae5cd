//! Crash recovery: redo the history, undo the losers.
//!
//! The redo pass scans the log forward from `firstLSN` to `nextLSN`,
//! replaying page deltas whose LSN is newer than the page's. The undo pass
//! walks each loser transaction's chain backwards, restoring before-images
//! and logging compensation records, then closes the chain with
//! ABORT_TXN + END_TXN. Afterwards everything is flushed, the redo window is
//! collapsed, and the transaction-id counter is advanced past every id seen.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::buffer::BufferManager;
use crate::error::StorageResult;
use crate::storage::file_manager::FileManager;
use crate::transaction::{resolve_file, TransactionManager, SYSTEM_SESSION};
use crate::util::HandyRwLock;
use crate::wal::record::{WalRecord, WalRecordFrame};
use crate::wal::{Lsn, WAL_FIRST_RECORD_OFFSET};

pub fn recover(
    mgr: &mut TransactionManager,
    fm: &FileManager,
    buffer: &mut BufferManager,
) -> StorageResult<()> {
    let first = mgr.first_lsn;
    let next = mgr.next_lsn;

    if first == next {
        debug!("recovery: log window empty, nothing to do");
        return Ok(());
    }
    info!("recovery: scanning {} .. {}", first, next);

    // Redo pass. Losers are the transactions whose chains never reach a
    // COMMIT_TXN or ABORT_TXN; an aborted transaction was already fully
    // compensated, and its CLRs replay here like any other record.
    let mut losers: HashMap<u32, Lsn> = HashMap::new();
    let mut max_txn_id = 0u32;
    let mut cur = first;

    while cur < next {
        let (frame, total) = match mgr.scan_record_at(fm, buffer, cur)? {
            Some(found) => found,
            None => {
                // Zero tail: the writer rolled over to the next file here.
                cur = Lsn::new(cur.file_no + 1, WAL_FIRST_RECORD_OFFSET);
                continue;
            }
        };
        let lsn = Lsn::with_size(cur.file_no, cur.offset, total);
        max_txn_id = max_txn_id.max(frame.txn_id);

        match &frame.body {
            WalRecord::StartTxn => {
                losers.insert(frame.txn_id, lsn);
            }
            WalRecord::UpdatePage {
                file_name,
                page_no,
                offset,
                after,
                ..
            } => {
                losers.insert(frame.txn_id, lsn);
                redo_bytes(fm, buffer, lsn, file_name, *page_no, *offset, after)?;
            }
            WalRecord::Clr {
                file_name,
                page_no,
                offset,
                after,
                ..
            } => {
                losers.insert(frame.txn_id, lsn);
                redo_bytes(fm, buffer, lsn, file_name, *page_no, *offset, after)?;
            }
            WalRecord::CommitTxn | WalRecord::AbortTxn | WalRecord::EndTxn => {
                losers.remove(&frame.txn_id);
            }
        }

        cur = Lsn::new(cur.file_no, cur.offset + total);
    }

    // Undo pass.
    for (txn_id, last) in losers {
        info!("recovery: undoing loser txn {}", txn_id);
        let final_last = mgr.undo_chain(fm, buffer, txn_id, last)?;
        let abort_lsn = mgr.append_record(
            fm,
            buffer,
            WalRecordFrame::new(txn_id, final_last, WalRecord::AbortTxn),
        )?;
        mgr.append_record(
            fm,
            buffer,
            WalRecordFrame::new(txn_id, abort_lsn, WalRecord::EndTxn),
        )?;
    }

    // Everything replayed is made durable, the redo window collapses, and
    // the id counter moves past every transaction seen in the log.
    mgr.next_txn_id = mgr.next_txn_id.max(max_txn_id + 1);
    buffer.flush_all(fm, Some(&mut *mgr))?;
    mgr.first_lsn = mgr.next_lsn;
    mgr.store_txn_state(fm, buffer)?;

    info!(
        "recovery complete: next_txn_id={} log tail {}",
        mgr.next_txn_id, mgr.next_lsn
    );
    Ok(())
}

/// Apply one redo image if the page has not seen this record yet. Replaying
/// an already-applied record (`lsn <= page.lsn`) is a no-op.
fn redo_bytes(
    fm: &FileManager,
    buffer: &mut BufferManager,
    lsn: Lsn,
    file_name: &str,
    page_no: u32,
    offset: u32,
    after: &[u8],
) -> StorageResult<()> {
    let file = match resolve_file(fm, buffer, file_name) {
        Ok(f) => f,
        Err(e) => {
            // The file was dropped after this record was written; its pages
            // no longer exist to redo into.
            warn!("recovery: skipping {} ({})", file_name, e);
            return Ok(());
        }
    };

    let page = buffer.fetch_page(fm, None, &file, page_no, true, SYSTEM_SESSION)?;
    {
        let mut p = page.wl();
        if lsn > p.lsn() {
            p.write_bytes(offset as usize, after);
            p.set_lsn(lsn);
            p.sync_old_data();
        }
    }
    buffer.unpin_page(&page, SYSTEM_SESSION);
    Ok(())
}
