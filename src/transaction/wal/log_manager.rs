use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, info};

use crate::common::config::{Lsn, LOG_BUFFER_SIZE, LOG_TIMEOUT};
use crate::storage::disk::DiskManager;
use crate::transaction::wal::log_record::LogRecord;

/// Appender-side state, guarded by one mutex. The flusher swaps
/// `buffer` with its private flush buffer, so appends continue while
/// the previous buffer's bytes are on their way to disk.
struct LogState {
    buffer: Vec<u8>,
    offset: usize,
    next_lsn: Lsn,
    flush_requested: bool,
}

/// Write-ahead log manager with group commit: records accumulate in an
/// in-memory buffer that a background thread flushes on timeout, on
/// buffer pressure, or on an explicit force. `persistent_lsn` is the
/// durable horizon the buffer pool checks before evicting dirty pages.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    state: Mutex<LogState>,
    /// Wakes the flusher (timeout wake-ups happen regardless)
    flush_requested: Condvar,
    /// Wakes appenders stalled on a full buffer
    space_available: Condvar,
    /// Wakes `force_flush` callers after the durable horizon advances
    flush_completed: Condvar,
    persistent_lsn: AtomicI32,
    enabled: AtomicBool,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self {
            disk_manager,
            state: Mutex::new(LogState {
                buffer: vec![0; LOG_BUFFER_SIZE],
                offset: 0,
                next_lsn: 0,
                flush_requested: false,
            }),
            flush_requested: Condvar::new(),
            space_available: Condvar::new(),
            flush_completed: Condvar::new(),
            persistent_lsn: AtomicI32::new(crate::common::config::INVALID_LSN),
            enabled: AtomicBool::new(false),
            flush_thread: Mutex::new(None),
        }
    }

    /// Whether the WAL path is active. Toggled by starting/stopping
    /// the flush thread.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Largest LSN known durable on the log file.
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().unwrap().next_lsn
    }

    /// Enable logging and start the background flusher. Idempotent.
    pub fn run_flush_thread(self: &Arc<Self>) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting log flush thread");
        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || manager.flush_loop());
        *self.flush_thread.lock().unwrap() = Some(handle);
    }

    /// Disable logging, wake the flusher for a final drain, and join
    /// it.
    pub fn shutdown(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.flush_requested = true;
        }
        self.flush_requested.notify_all();
        if let Some(handle) = self.flush_thread.lock().unwrap().take() {
            handle.join().expect("log flush thread panicked");
        }
        // Nothing left to wait for
        self.flush_completed.notify_all();
        info!("log flush thread stopped");
    }

    /// Append a record to the log buffer, assigning its LSN. Blocks
    /// briefly when the buffer has no room, letting the flusher swap
    /// buffers first.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Lsn {
        let size = record.size as usize;
        assert!(size <= LOG_BUFFER_SIZE, "log record larger than log buffer");

        let mut state = self.state.lock().unwrap();
        while LOG_BUFFER_SIZE - state.offset < size {
            state.flush_requested = true;
            self.flush_requested.notify_all();
            state = self.space_available.wait(state).unwrap();
        }

        record.lsn = state.next_lsn;
        state.next_lsn += 1;
        let offset = state.offset;
        record.serialize_to(&mut state.buffer[offset..offset + size]);
        state.offset += size;
        record.lsn
    }

    /// Block until every record with an LSN up to and including
    /// `target` is durable. Called by the buffer pool before writing a
    /// dirty page whose LSN is past the durable horizon.
    pub fn force_flush(&self, target: Lsn) {
        let mut state = self.state.lock().unwrap();
        state.flush_requested = true;
        self.flush_requested.notify_all();
        while self.persistent_lsn() < target && self.is_enabled() {
            state = self.flush_completed.wait(state).unwrap();
        }
        drop(state);
    }

    fn flush_loop(&self) {
        let mut flush_buffer: Vec<u8> = vec![0; LOG_BUFFER_SIZE];
        while self.is_enabled() {
            let (bytes, high_mark) = {
                let mut state = self.state.lock().unwrap();
                if !state.flush_requested {
                    let (guard, _timeout) = self
                        .flush_requested
                        .wait_timeout(state, LOG_TIMEOUT)
                        .unwrap();
                    state = guard;
                }
                // Swap buffers so appenders keep going during the disk
                // write; capture the high-water mark covered by the
                // outgoing buffer.
                std::mem::swap(&mut state.buffer, &mut flush_buffer);
                let bytes = state.offset;
                state.offset = 0;
                state.flush_requested = false;
                let high_mark = state.next_lsn - 1;
                self.space_available.notify_all();
                (bytes, high_mark)
            };

            if bytes > 0 {
                // Log I/O failure is unrecoverable: no WAL, no engine.
                self.disk_manager
                    .write_log(&flush_buffer[..bytes])
                    .expect("log write failed");
                debug!("flushed {} log bytes, durable through lsn {}", bytes, high_mark);
            }
            if high_mark >= 0 {
                self.persistent_lsn.fetch_max(high_mark, Ordering::SeqCst);
            }
            let _state = self.state.lock().unwrap();
            self.flush_completed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::INVALID_LSN;
    use crate::common::rid::Rid;
    use crate::common::tuple::Tuple;
    use crate::transaction::wal::log_record::{LogRecordType, LOG_HEADER_SIZE};
    use tempfile::NamedTempFile;

    fn test_log_manager() -> (Arc<LogManager>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        (Arc::new(LogManager::new(disk)), file)
    }

    #[test]
    fn test_lsns_are_sequential() {
        let (manager, _file) = test_log_manager();
        let mut begin = LogRecord::new_begin(1);
        let mut insert = LogRecord::new_insert(1, 0, Rid::new(2, 0), Tuple::new(vec![1]));

        let lsn1 = manager.append_log_record(&mut begin);
        let lsn2 = manager.append_log_record(&mut insert);
        assert_eq!(lsn1, 0);
        assert_eq!(lsn2, 1);
        assert_eq!(begin.lsn, lsn1);
    }

    #[test]
    fn test_force_flush_advances_persistent_lsn() {
        let (manager, _file) = test_log_manager();
        manager.run_flush_thread();

        let mut record = LogRecord::new_begin(1);
        let lsn = manager.append_log_record(&mut record);
        assert!(manager.persistent_lsn() < lsn || manager.persistent_lsn() == lsn);

        manager.force_flush(lsn);
        assert!(manager.persistent_lsn() >= lsn);

        manager.shutdown();
        assert!(!manager.is_enabled());
    }

    #[test]
    fn test_flushed_bytes_match_records() {
        let (manager, _file) = test_log_manager();
        manager.run_flush_thread();

        let mut record = LogRecord::new_commit(3, 1);
        let lsn = manager.append_log_record(&mut record);
        manager.force_flush(lsn);

        let disk = manager.disk_manager.clone();
        let mut buf = vec![0u8; LOG_BUFFER_SIZE];
        let n = disk.read_log(&mut buf, 0).unwrap();
        assert_eq!(n, LOG_HEADER_SIZE);

        let parsed = LogRecord::deserialize(&buf[..n]).unwrap();
        assert_eq!(parsed.record_type, LogRecordType::Commit);
        assert_eq!(parsed.txn_id, 3);
        assert_eq!(parsed.lsn, lsn);
        assert_ne!(parsed.lsn, INVALID_LSN);

        manager.shutdown();
    }

    #[test]
    fn test_buffer_pressure_wakes_flusher() {
        let (manager, _file) = test_log_manager();
        manager.run_flush_thread();

        // Enough large records to overflow the log buffer several
        // times; appends must never deadlock.
        let payload = Tuple::new(vec![7; 512]);
        let mut last = INVALID_LSN;
        for i in 0..100 {
            let mut record =
                LogRecord::new_insert(1, last, Rid::new(i, 0), payload.clone());
            last = manager.append_log_record(&mut record);
        }
        manager.force_flush(last);
        assert!(manager.persistent_lsn() >= last);

        manager.shutdown();
    }
}
