use thiserror::Error;

use crate::common::config::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("disk error: {0}")]
    DiskError(#[from] DiskManagerError),

    #[error("all frames are pinned")]
    PoolExhausted,

    #[error("page {0} is not in the buffer pool")]
    PageNotFound(PageId),

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("page {0} is pinned")]
    PagePinned(PageId),
}
