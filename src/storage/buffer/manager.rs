use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::config::{FrameId, PageId, BUCKET_SIZE, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::hash::ExtendibleHashTable;
use crate::storage::page::{Page, PagePtr};
use crate::transaction::wal::log_manager::LogManager;

/// Result type for buffer pool operations
pub type Result<T> = std::result::Result<T, BufferPoolError>;

/// A frame couples a page image with its pool-side metadata. The page's
/// `RwLock` is the latch the index crabs over; pin count and dirty bit
/// are only touched under the pool mutex.
struct Frame {
    page: PagePtr,
    pin_count: u32,
    is_dirty: bool,
}

/// Book-keeping shared by all operations: the page table, the free
/// list and the replacer. Every live frame is in exactly one of three
/// states: on the free list, pinned in the page table, or unpinned in
/// the page table and tracked by the replacer.
struct PoolState {
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
}

/// Fixed-size cache of disk pages with pinning and LRU replacement.
/// Before a dirty page whose LSN is not yet durable gets evicted, the
/// log manager is forced to flush up to that LSN (the WAL rule).
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<RwLock<Frame>>,
    inner: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_log_manager(pool_size, disk_manager, None)
    }

    pub fn with_log_manager(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(RwLock::new(Frame {
                page: Arc::new(RwLock::new(Page::default())),
                pin_count: 0,
                is_dirty: false,
            }));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            inner: Mutex::new(PoolState {
                page_table: ExtendibleHashTable::new(BUCKET_SIZE),
                free_list,
                replacer: LruReplacer::new(),
            }),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, reading it from disk if it is not resident. The
    /// returned page is pinned; every fetch must be paired with exactly
    /// one `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            inner.replacer.erase(frame_id);
            let mut frame = self.frames[frame_id].write();
            frame.pin_count += 1;
            return Ok(frame.page.clone());
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let mut frame = self.frames[frame_id].write();
        {
            let mut page = frame.page.write();
            self.disk_manager.read_page(page_id, &mut page)?;
            // The image now matches disk; nothing to replay on evict.
            page.lsn = INVALID_LSN;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;
        inner.page_table.insert(page_id, frame_id);
        Ok(frame.page.clone())
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame.
    pub fn new_page(&self) -> Result<(PagePtr, PageId)> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = self.disk_manager.allocate_page();
        let mut frame = self.frames[frame_id].write();
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.pin_count = 1;
        frame.is_dirty = true;
        inner.page_table.insert(page_id, frame_id);
        Ok((frame.page.clone(), page_id))
    }

    /// Drop one pin. The dirty flag is only ever set here, never
    /// cleared.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let mut frame = self.frames[frame_id].write();
        assert!(frame.pin_count > 0, "pin count underflow on page {}", page_id);
        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            inner.replacer.insert(frame_id);
        }
        Ok(())
    }

    /// Synchronously write a resident page to disk and clear its dirty
    /// bit.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let inner = self.inner.lock();
        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let mut frame = self.frames[frame_id].write();
        {
            let page = frame.page.read();
            self.disk_manager.write_page(&page)?;
        }
        frame.is_dirty = false;
        Ok(())
    }

    /// Flush every dirty resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _inner = self.inner.lock();
        for frame_lock in &self.frames {
            let mut frame = frame_lock.write();
            if !frame.is_dirty {
                continue;
            }
            {
                let page = frame.page.read();
                if page.page_id == INVALID_PAGE_ID {
                    continue;
                }
                self.force_wal(&page);
                self.disk_manager.write_page(&page)?;
            }
            frame.is_dirty = false;
        }
        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk. Fails if
    /// the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(frame_id) = inner.page_table.find(&page_id) {
            let mut frame = self.frames[frame_id].write();
            if frame.pin_count != 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            inner.replacer.erase(frame_id);
            inner.page_table.remove(&page_id);
            frame.page.write().reset();
            frame.is_dirty = false;
            inner.free_list.push_back(frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Whether `page_id` currently occupies a frame.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.find(&page_id).is_some()
    }

    /// Pick a frame to (re)use: free list first, then an LRU victim.
    /// A dirty victim is written back first, honoring the WAL rule.
    fn acquire_frame(&self, inner: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner.replacer.victim().ok_or(BufferPoolError::PoolExhausted)?;
        let mut frame = self.frames[frame_id].write();
        assert!(frame.pin_count == 0, "replacer victim frame is pinned");

        let old_page_id = {
            let page = frame.page.read();
            if frame.is_dirty {
                self.force_wal(&page);
                self.disk_manager.write_page(&page)?;
            }
            page.page_id
        };
        frame.is_dirty = false;
        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }

    /// A modified page may not reach disk before its log record: if the
    /// page carries an LSN past the durable horizon, force the log
    /// forward first.
    fn force_wal(&self, page: &Page) {
        if let Some(log_manager) = &self.log_manager {
            if log_manager.is_enabled()
                && page.lsn != INVALID_LSN
                && page.lsn > log_manager.persistent_lsn()
            {
                log_manager.force_flush(page.lsn);
            }
        }
    }
}
