//! The page cache: pins, eviction, and the write-ahead rule.
//!
//! Pages are cached in a recency-ordered map keyed by `(file, pageNo)`. The
//! LRU policy promotes entries on access; FIFO uses the same map without
//! promotion, so recency order degenerates to insertion order. The cache is
//! bounded in bytes, not entries; `ensure_space` evicts cold pages, routing
//! dirty ones through `write_dirty_pages` so the WAL is always forced up to
//! the highest page LSN before any write-back.

use std::collections::HashMap;

use log::{debug, warn};
use lru::LruCache;

use crate::config::CachePolicy;
use crate::error::StorageResult;
use crate::storage::file::{DbFile, PageId};
use crate::storage::file_manager::FileManager;
use crate::storage::page::{DbPage, PagePod};
use crate::transaction::TransactionManager;
use crate::util::{pod, HandyRwLock};
use crate::wal::lsn::Lsn;

pub struct BufferManager {
    /// Recency-ordered page map; coldest entries sit at the LRU end.
    cache: LruCache<PageId, PagePod>,
    /// Filename -> open file, for files whose pages may be cached.
    files: HashMap<String, DbFile>,
    /// Per-session pin counts, so a session can drop everything it holds on
    /// any exit path.
    session_pins: HashMap<u32, HashMap<PageId, u32>>,
    total_bytes: usize,
    max_bytes: usize,
    policy: CachePolicy,
    /// When false (transactions off) dirty pages are written back without
    /// consulting any log.
    wal_enabled: bool,
}

impl BufferManager {
    pub fn new(max_bytes: usize, policy: CachePolicy, wal_enabled: bool) -> Self {
        Self {
            cache: LruCache::unbounded(),
            files: HashMap::new(),
            session_pins: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            policy,
            wal_enabled,
        }
    }

    pub fn total_bytes_cached(&self) -> usize {
        self.total_bytes
    }

    pub fn cached_page_count(&self) -> usize {
        self.cache.len()
    }

    pub fn register_file(&mut self, file: &DbFile) {
        self.files
            .entry(file.name().to_string())
            .or_insert_with(|| file.clone());
    }

    pub fn registered_file(&self, name: &str) -> Option<DbFile> {
        self.files.get(name).cloned()
    }

    fn lookup(&mut self, id: &PageId) -> Option<PagePod> {
        match self.policy {
            CachePolicy::Lru => self.cache.get(id).cloned(),
            CachePolicy::Fifo => self.cache.peek(id).cloned(),
        }
    }

    /// Return the cached page if present, pinning it for `session`.
    pub fn get_page(&mut self, file: &DbFile, page_no: u32, session: u32) -> Option<PagePod> {
        let id = file.page_id(page_no);
        let found = self.lookup(&id)?;
        self.pin_pod(&id, &found, session);
        Some(found)
    }

    /// Insert a freshly loaded page, pinning it for `session`. Fails if the
    /// page is already cached.
    pub fn add_page(
        &mut self,
        fm: &FileManager,
        txn: Option<&mut TransactionManager>,
        page: DbPage,
        session: u32,
    ) -> StorageResult<PagePod> {
        let id = page.page_id();
        assert!(
            !self.cache.contains(&id),
            "page {} is already cached",
            id
        );

        let size = page.page_size();
        self.ensure_space(fm, txn, size)?;

        self.register_file(page.file());
        let page_pod = pod(page);
        self.cache.push(id.clone(), page_pod.clone());
        self.total_bytes += size;
        self.pin_pod(&id, &page_pod, session);
        Ok(page_pod)
    }

    /// Cache-or-load: the everyday page access path.
    pub fn fetch_page(
        &mut self,
        fm: &FileManager,
        txn: Option<&mut TransactionManager>,
        file: &DbFile,
        page_no: u32,
        create: bool,
        session: u32,
    ) -> StorageResult<PagePod> {
        if let Some(found) = self.get_page(file, page_no, session) {
            return Ok(found);
        }
        let page = fm.load_page(file, page_no, create)?;
        self.add_page(fm, txn, page, session)
    }

    fn pin_pod(&mut self, id: &PageId, page: &PagePod, session: u32) {
        page.wl().pin();
        *self
            .session_pins
            .entry(session)
            .or_insert_with(HashMap::new)
            .entry(id.clone())
            .or_insert(0) += 1;
    }

    pub fn pin_page(&mut self, page: &PagePod, session: u32) {
        let id = page.rl().page_id();
        self.pin_pod(&id, page, session);
    }

    pub fn unpin_page(&mut self, page: &PagePod, session: u32) {
        let id = page.rl().page_id();
        let counts = match self.session_pins.get_mut(&session) {
            Some(c) => c,
            None => return,
        };
        if let Some(n) = counts.get_mut(&id) {
            *n -= 1;
            if *n == 0 {
                counts.remove(&id);
            }
            page.wl().unpin();
        }
    }

    /// Drop every pin the session still holds. Called at the end of each
    /// statement so no exit path can leak a pin.
    pub fn unpin_all_for_session(&mut self, session: u32) {
        let counts = match self.session_pins.remove(&session) {
            Some(c) => c,
            None => return,
        };
        for (id, n) in counts {
            if let Some(page) = self.cache.peek(&id) {
                let mut page = page.wl();
                for _ in 0..n {
                    page.unpin();
                }
            }
        }
    }

    /// Evict cold pages until `needed` more bytes fit under the bound.
    ///
    /// Dirty candidates are deferred into one batch so the WAL is forced a
    /// single time for all of them; clean candidates are invalidated on the
    /// spot. If pinned pages dominate and the bound cannot be met, the cache
    /// runs over it with a warning.
    fn ensure_space(
        &mut self,
        fm: &FileManager,
        txn: Option<&mut TransactionManager>,
        needed: usize,
    ) -> StorageResult<()> {
        if self.total_bytes + needed <= self.max_bytes {
            return Ok(());
        }

        let can_force = txn.is_some() || !self.wal_enabled;
        let mut dirty_candidates: Vec<PagePod> = Vec::new();
        let mut pending_reclaim = 0usize;

        // Coldest first.
        let order: Vec<PageId> = self.cache.iter().rev().map(|(id, _)| id.clone()).collect();
        for id in order {
            if self.total_bytes - pending_reclaim + needed <= self.max_bytes {
                break;
            }
            let page = match self.cache.peek(&id) {
                Some(p) => p.clone(),
                None => continue,
            };

            let (pinned, dirty, exempt, size) = {
                let p = page.rl();
                (
                    p.is_pinned(),
                    p.is_dirty(),
                    p.file().file_type().is_wal_exempt(),
                    p.page_size(),
                )
            };
            if pinned {
                continue;
            }

            if dirty {
                // Flushing a dirty data page requires forcing the WAL first;
                // on paths where the transaction manager is unreachable only
                // log-exempt pages may go.
                if !can_force && !exempt {
                    continue;
                }
                dirty_candidates.push(page);
                pending_reclaim += size;
            } else {
                debug!("evicting clean page {}", id);
                self.cache.pop(&id);
                self.total_bytes -= size;
            }
        }

        if !dirty_candidates.is_empty() {
            self.write_dirty_pages(fm, txn, dirty_candidates, true)?;
        }

        if self.total_bytes + needed > self.max_bytes {
            warn!(
                "page cache exceeds its bound: {} cached + {} needed > {} max (pinned pages dominate)",
                self.total_bytes, needed, self.max_bytes
            );
        }
        Ok(())
    }

    /// Write a batch of dirty pages, upholding the write-ahead rule: the WAL
    /// is forced through the highest LSN of any non-exempt page first.
    pub fn write_dirty_pages(
        &mut self,
        fm: &FileManager,
        txn: Option<&mut TransactionManager>,
        pages: Vec<PagePod>,
        invalidate: bool,
    ) -> StorageResult<()> {
        let mut max_lsn: Option<Lsn> = None;
        for page in &pages {
            let p = page.rl();
            if p.file().file_type().is_wal_exempt() {
                continue;
            }
            let lsn = p.lsn();
            if !lsn.is_zero() && max_lsn.map_or(true, |m| lsn > m) {
                max_lsn = Some(lsn);
            }
        }

        if let (Some(lsn), Some(t)) = (max_lsn, txn) {
            t.force_wal_to(fm, self, lsn)?;
        }

        for page in pages {
            let id = {
                let mut p = page.wl();
                if p.is_dirty() {
                    fm.store_page(&mut p)?;
                }
                p.page_id()
            };
            if invalidate {
                if self.cache.pop(&id).is_some() {
                    self.total_bytes -= page.rl().page_size();
                }
            }
        }
        Ok(())
    }

    fn pages_of_file(&self, file: &DbFile, range: Option<(u32, u32)>) -> Vec<(PageId, PagePod)> {
        self.cache
            .iter()
            .filter(|(id, _)| id.file.as_ref() == file.name())
            .filter(|(id, _)| match range {
                Some((lo, hi)) => id.page_no >= lo && id.page_no <= hi,
                None => true,
            })
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect()
    }

    /// Flush the dirty pages of one file (clean pages are left intact),
    /// optionally restricted to an inclusive page range, optionally syncing
    /// the file afterwards.
    ///
    /// This is the path `forceWAL` uses on the log files themselves, so it
    /// never consults the transaction manager.
    pub fn write_file(
        &mut self,
        fm: &FileManager,
        file: &DbFile,
        range: Option<(u32, u32)>,
        sync: bool,
    ) -> StorageResult<()> {
        for (_, page) in self.pages_of_file(file, range) {
            let mut p = page.wl();
            if p.is_dirty() {
                fm.store_page(&mut p)?;
            }
        }
        if sync {
            fm.sync_file(file)?;
        }
        Ok(())
    }

    /// Write then invalidate every cached page of `file`.
    pub fn flush_file(
        &mut self,
        fm: &FileManager,
        txn: Option<&mut TransactionManager>,
        file: &DbFile,
    ) -> StorageResult<()> {
        let pages: Vec<PagePod> = self.pages_of_file(file, None).into_iter().map(|(_, p)| p).collect();
        self.write_dirty_pages(fm, txn, pages, true)
    }

    /// Write then invalidate the entire cache.
    pub fn flush_all(
        &mut self,
        fm: &FileManager,
        txn: Option<&mut TransactionManager>,
    ) -> StorageResult<()> {
        let pages: Vec<PagePod> = self.cache.iter().map(|(_, p)| p.clone()).collect();
        self.write_dirty_pages(fm, txn, pages, true)
    }

    /// Flush a file's pages and forget the file.
    pub fn remove_file(
        &mut self,
        fm: &FileManager,
        txn: Option<&mut TransactionManager>,
        file: &DbFile,
    ) -> StorageResult<()> {
        self.flush_file(fm, txn, file)?;
        self.files.remove(file.name());
        Ok(())
    }

    /// Drop a file's pages without writing them (rollback of a failed file
    /// creation, tests).
    pub fn discard_file(&mut self, file: &DbFile) {
        for (id, _) in self.pages_of_file(file, None) {
            if self.cache.pop(&id).is_some() {
                self.total_bytes -= file.page_size();
            }
        }
        self.files.remove(file.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::DbFileType;
    use tempfile::TempDir;

    const SESSION: u32 = 1;

    fn setup(max_pages: usize, policy: CachePolicy) -> (TempDir, FileManager, BufferManager, DbFile) {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let file = fm.create_file("t.tbl", DbFileType::HeapData, 512).unwrap();
        let buffer = BufferManager::new(max_pages * 512, policy, false);
        (dir, fm, buffer, file)
    }

    #[test]
    fn cache_hit_returns_the_same_frame() {
        let (_dir, fm, mut buffer, file) = setup(4, CachePolicy::Lru);

        let a = buffer.fetch_page(&fm, None, &file, 1, true, SESSION).unwrap();
        a.wl().write_u16(100, 0xABCD);
        let b = buffer.fetch_page(&fm, None, &file, 1, true, SESSION).unwrap();
        assert_eq!(b.rl().read_u16(100), 0xABCD);
        assert_eq!(buffer.cached_page_count(), 1);
        assert_eq!(a.rl().pin_count(), 2);

        buffer.unpin_all_for_session(SESSION);
        assert_eq!(a.rl().pin_count(), 0);
    }

    #[test]
    fn lru_evicts_the_coldest_page() {
        let (_dir, fm, mut buffer, file) = setup(2, CachePolicy::Lru);

        for no in 0..2 {
            let p = buffer.fetch_page(&fm, None, &file, no, true, SESSION).unwrap();
            buffer.unpin_page(&p, SESSION);
        }
        // Touch page 0 so page 1 is now the coldest.
        let p0 = buffer.get_page(&file, 0, SESSION).unwrap();
        buffer.unpin_page(&p0, SESSION);

        let p2 = buffer.fetch_page(&fm, None, &file, 2, true, SESSION).unwrap();
        buffer.unpin_page(&p2, SESSION);

        assert!(buffer.get_page(&file, 0, SESSION).is_some());
        assert!(buffer.get_page(&file, 1, SESSION).is_none());
        assert!(buffer.total_bytes_cached() <= 2 * 512);
    }

    #[test]
    fn fifo_ignores_recency() {
        let (_dir, fm, mut buffer, file) = setup(2, CachePolicy::Fifo);

        for no in 0..2 {
            let p = buffer.fetch_page(&fm, None, &file, no, true, SESSION).unwrap();
            buffer.unpin_page(&p, SESSION);
        }
        // Touching page 0 does not save it: it entered the cache first.
        let p0 = buffer.get_page(&file, 0, SESSION).unwrap();
        buffer.unpin_page(&p0, SESSION);

        let p2 = buffer.fetch_page(&fm, None, &file, 2, true, SESSION).unwrap();
        buffer.unpin_page(&p2, SESSION);

        assert!(buffer.get_page(&file, 0, SESSION).is_none());
        assert!(buffer.get_page(&file, 1, SESSION).is_some());
    }

    #[test]
    fn pinned_pages_are_never_evicted() {
        let (_dir, fm, mut buffer, file) = setup(1, CachePolicy::Lru);

        let p0 = buffer.fetch_page(&fm, None, &file, 0, true, SESSION).unwrap();
        // Keep p0 pinned; admitting p1 overruns the bound instead of
        // evicting it.
        let _p1 = buffer.fetch_page(&fm, None, &file, 1, true, SESSION).unwrap();
        assert!(buffer.get_page(&file, 0, SESSION).is_some());
        assert!(buffer.total_bytes_cached() > 512);
        drop(p0);
    }

    #[test]
    fn evicted_dirty_pages_reach_disk() {
        let (_dir, fm, mut buffer, file) = setup(2, CachePolicy::Lru);

        let p0 = buffer.fetch_page(&fm, None, &file, 0, true, SESSION).unwrap();
        p0.wl().write_bytes(64, b"sticky");
        buffer.unpin_page(&p0, SESSION);
        drop(p0);

        // Fill past the bound so page 0 gets written back and invalidated.
        for no in 1..4 {
            let p = buffer.fetch_page(&fm, None, &file, no, true, SESSION).unwrap();
            buffer.unpin_page(&p, SESSION);
        }
        assert!(buffer.get_page(&file, 0, SESSION).is_none());

        let back = buffer.fetch_page(&fm, None, &file, 0, false, SESSION).unwrap();
        assert_eq!(back.rl().read_bytes(64, 6), b"sticky");
    }
}
