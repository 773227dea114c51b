use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::config::{Lsn, PageId, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};

/// An in-memory page image. The surrounding `RwLock` is the page latch;
/// pin count and dirty bit live in the owning frame, under the buffer
/// pool's mutex.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    /// LSN of the newest log record whose effect this in-memory image
    /// carries. `INVALID_LSN` means the image matches disk.
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: INVALID_LSN,
        }
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
        self.lsn = INVALID_LSN;
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(INVALID_PAGE_ID)
    }
}

/// Shared handle to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned latch guards, storable across call frames during tree descent
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;
