use std::time::Duration;

/// Page size in bytes
pub const PAGE_SIZE: usize = 4096;

/// Size of the in-memory log buffer (and of the flush buffer it swaps with)
pub const LOG_BUFFER_SIZE: usize = PAGE_SIZE * 8;

/// Capacity of an extendible-hash bucket
pub const BUCKET_SIZE: usize = 50;

/// How long the background log flusher sleeps between idle wake-ups
pub const LOG_TIMEOUT: Duration = Duration::from_millis(300);

/// Page ID type
pub type PageId = i32;

/// Frame index into the buffer pool's frame array
pub type FrameId = usize;

/// Log sequence number type
pub type Lsn = i32;

/// Transaction ID type
pub type TxnId = i32;

/// Slot index within a tuple page
pub type SlotId = u32;

pub const INVALID_PAGE_ID: PageId = -1;
pub const INVALID_LSN: Lsn = -1;
pub const INVALID_TXN_ID: TxnId = -1;

/// Page 0 maps index names to their root page ids
pub const HEADER_PAGE_ID: PageId = 0;
