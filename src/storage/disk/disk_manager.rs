use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::Page;

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// Result type for disk manager operations
pub type Result<T> = std::result::Result<T, DiskManagerError>;

/// DiskManager owns the database file and its companion log file. Pages
/// live at `page_id * PAGE_SIZE`; the log is an append-only byte
/// stream.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    log_path: PathBuf,
    next_page_id: AtomicI32,
}

impl DiskManager {
    /// Open (or create) the database at `db_path`. The log file lives
    /// next to it with a `.log` suffix.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let mut log_path = db_path.as_os_str().to_owned();
        log_path.push(".log");
        let log_path = PathBuf::from(log_path);
        let log_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&log_path)?;

        // Page ids start at 1; page 0 is the header page and always
        // exists implicitly.
        let page_count = (db_file.metadata()?.len() as usize / PAGE_SIZE) as PageId;
        let next_page_id = page_count.max(1);

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            log_path,
            next_page_id: AtomicI32::new(next_page_id),
        })
    }

    /// Read a page image from disk. Reads past the end of the file
    /// yield a zeroed page, so freshly allocated pages are readable
    /// before their first flush.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        if offset >= file_size {
            page.data.fill(0);
        } else {
            file.seek(SeekFrom::Start(offset))?;
            let available = (file_size - offset).min(PAGE_SIZE as u64) as usize;
            file.read_exact(&mut page.data[..available])?;
            page.data[available..].fill(0);
        }
        page.page_id = page_id;
        Ok(())
    }

    pub fn write_page(&self, page: &Page) -> Result<()> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;
        Ok(())
    }

    /// Hand out the next page id. Ids increase monotonically from 1.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Return a page to the allocator. Currently bookkeeping only;
    /// freed ids are not recycled.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Append raw log bytes and sync them to stable storage.
    pub fn write_log(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read log bytes starting at `offset` into `buf`. Returns the
    /// number of bytes read; 0 signals end of log.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(0);
        }
        file.seek(SeekFrom::Start(offset))?;
        let to_read = (file_size - offset).min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..to_read])?;
        Ok(to_read)
    }

    pub fn log_size(&self) -> Result<u64> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_disk_manager() -> (DiskManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();
        (disk, file)
    }

    #[test]
    fn test_page_round_trip() {
        let (disk, _file) = test_disk_manager();
        let page_id = disk.allocate_page();

        let mut page = Page::new(page_id);
        page.data[0] = 0xAB;
        page.data[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(INVALID_PAGE_ID);
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.data[0], 0xAB);
        assert_eq!(read_back.data[PAGE_SIZE - 1], 0xCD);
        assert_eq!(read_back.page_id, page_id);
    }

    #[test]
    fn test_read_past_eof_zero_fills() {
        let (disk, _file) = test_disk_manager();
        let mut page = Page::new(INVALID_PAGE_ID);
        disk.read_page(99, &mut page).unwrap();
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_is_monotonic_from_one() {
        let (disk, _file) = test_disk_manager();
        let first = disk.allocate_page();
        let second = disk.allocate_page();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_log_append_and_read() {
        let (disk, _file) = test_disk_manager();
        disk.write_log(b"hello ").unwrap();
        disk.write_log(b"wal").unwrap();

        let mut buf = [0u8; 32];
        let n = disk.read_log(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hello wal");

        let n = disk.read_log(&mut buf, 6).unwrap();
        assert_eq!(&buf[..n], b"wal");

        assert_eq!(disk.read_log(&mut buf, 9).unwrap(), 0);
    }
}
