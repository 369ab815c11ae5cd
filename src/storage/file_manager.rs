//! Unbuffered, seek-based page I/O over files in a single base directory.
//!
//! No caching happens here; the buffer manager sits on top.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::error::{StorageError, StorageResult};
use crate::storage::file::{decode_page_size, encode_page_size, DbFile, DbFileType};
use crate::storage::page::DbPage;

pub struct FileManager {
    base_dir: PathBuf,
    open_files: Mutex<HashMap<String, DbFile>>,
}

impl FileManager {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> StorageResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.path_of(name).exists()
    }

    /// Create a new page-structured file. Fails if the file already exists.
    ///
    /// Page 0 is written out immediately with the type byte and the encoded
    /// page size in its first two bytes.
    pub fn create_file(
        &self,
        name: &str,
        file_type: DbFileType,
        page_size: usize,
    ) -> StorageResult<DbFile> {
        let exponent = encode_page_size(page_size)?;

        let path = self.path_of(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::FileExists(name.to_string())
                } else {
                    StorageError::Io(e)
                }
            })?;

        debug!(
            "created {:?} file {} with page size {}",
            file_type, name, page_size
        );

        let db_file = DbFile::new(name, file_type, page_size, file);

        let mut page0 = DbPage::new(db_file.clone(), 0, vec![0u8; page_size]);
        page0.write_u8(0, file_type as u8);
        page0.write_u8(1, exponent);
        self.store_page(&mut page0)?;

        self.open_files
            .lock()
            .unwrap()
            .insert(name.to_string(), db_file.clone());
        Ok(db_file)
    }

    /// Open an existing file, decoding its type and page size from the first
    /// two bytes.
    pub fn open_file(&self, name: &str) -> StorageResult<DbFile> {
        if let Some(f) = self.open_files.lock().unwrap().get(name) {
            return Ok(f.clone());
        }

        let path = self.path_of(name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;

        let mut header = [0u8; 2];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let file_type =
            DbFileType::from_u8(header[0]).ok_or_else(|| StorageError::UnknownFileType {
                file: name.to_string(),
                code: header[0],
            })?;
        let page_size = decode_page_size(header[1])?;

        let db_file = DbFile::new(name, file_type, page_size, file);
        self.open_files
            .lock()
            .unwrap()
            .insert(name.to_string(), db_file.clone());
        Ok(db_file)
    }

    /// Read one page into a freshly allocated frame.
    ///
    /// On a short read: with `create` the file is extended to cover the page
    /// and a zero-filled frame is returned, otherwise the load fails with
    /// `PageNotFound`.
    pub fn load_page(&self, file: &DbFile, page_no: u32, create: bool) -> StorageResult<DbPage> {
        let page_size = file.page_size();
        let position = page_no as u64 * page_size as u64;

        let mut buf = vec![0u8; page_size];
        let mut handle = file.handle.lock().unwrap();
        handle.seek(SeekFrom::Start(position))?;

        match handle.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if !create {
                    return Err(StorageError::PageNotFound {
                        file: file.name().to_string(),
                        page_no,
                    });
                }
                debug!("extending file {} to cover page {}", file.name(), page_no);
                handle.set_len(position + page_size as u64)?;
                buf.iter_mut().for_each(|b| *b = 0);
            }
            Err(e) => return Err(StorageError::Io(e)),
        }
        drop(handle);

        Ok(DbPage::new(file.clone(), page_no, buf))
    }

    /// Write a page image back to disk and clear its dirty flag. Durability
    /// is not guaranteed until `sync_file`.
    pub fn store_page(&self, page: &mut DbPage) -> StorageResult<()> {
        let file = page.file().clone();
        let position = page.page_no() as u64 * file.page_size() as u64;

        let mut handle = file.handle.lock().unwrap();
        handle.seek(SeekFrom::Start(position))?;
        handle.write_all(page.bytes_for_write())?;
        drop(handle);

        page.clear_dirty();
        Ok(())
    }

    /// Force any buffered file-system writes to stable storage.
    pub fn sync_file(&self, file: &DbFile) -> StorageResult<()> {
        file.handle.lock().unwrap().sync_all()?;
        Ok(())
    }

    /// Number of whole pages currently in the file.
    pub fn page_count(&self, file: &DbFile) -> StorageResult<u32> {
        let len = file.handle.lock().unwrap().metadata()?.len();
        Ok((len / file.page_size() as u64) as u32)
    }

    pub fn close_file(&self, file: &DbFile) {
        self.open_files.lock().unwrap().remove(file.name());
    }

    pub fn delete_file(&self, name: &str) -> StorageResult<()> {
        self.open_files.lock().unwrap().remove(name);
        fs::remove_file(self.path_of(name))?;
        Ok(())
    }

    /// Names of the files currently open, for shutdown sweeps.
    pub fn open_file_names(&self) -> Vec<String> {
        self.open_files.lock().unwrap().keys().cloned().collect()
    }
}

/// Filename of the `n`th write-ahead log file.
pub fn wal_file_name(file_no: u32) -> String {
    format!("wal-{:05}.log", file_no)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_then_open_preserves_type_and_page_size() {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        fm.create_file("t.tbl", DbFileType::HeapData, 4096).unwrap();
        assert!(matches!(
            fm.create_file("t.tbl", DbFileType::HeapData, 4096),
            Err(StorageError::FileExists(_))
        ));

        fm.close_file(&fm.open_file("t.tbl").unwrap());
        let reopened = fm.open_file("t.tbl").unwrap();
        assert_eq!(reopened.file_type(), DbFileType::HeapData);
        assert_eq!(reopened.page_size(), 4096);
    }

    #[test]
    fn open_rejects_unknown_type_codes() {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        std::fs::write(dir.path().join("junk.dat"), [0xEEu8, 13]).unwrap();
        assert!(matches!(
            fm.open_file("junk.dat"),
            Err(StorageError::UnknownFileType { .. })
        ));
    }

    #[test]
    fn load_page_past_eof() {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let file = fm.create_file("t.tbl", DbFileType::HeapData, 512).unwrap();

        assert!(matches!(
            fm.load_page(&file, 3, false),
            Err(StorageError::PageNotFound { page_no: 3, .. })
        ));

        let page = fm.load_page(&file, 3, true).unwrap();
        assert_eq!(page.bytes(), &[0u8; 512][..]);
        assert_eq!(fm.page_count(&file).unwrap(), 4);
    }

    #[test]
    fn store_round_trips_page_bytes() {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let file = fm.create_file("t.tbl", DbFileType::HeapData, 512).unwrap();

        let mut page = fm.load_page(&file, 2, true).unwrap();
        page.write_bytes(17, b"columnar");
        fm.store_page(&mut page).unwrap();
        assert!(!page.is_dirty());
        fm.sync_file(&file).unwrap();

        let back = fm.load_page(&file, 2, false).unwrap();
        assert_eq!(back.read_bytes(17, 8), b"columnar");
    }
}
