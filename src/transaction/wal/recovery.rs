use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::common::config::{Lsn, TxnId, INVALID_LSN, INVALID_PAGE_ID, LOG_BUFFER_SIZE};
use crate::common::rid::Rid;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::{PageError, TuplePage};
use crate::transaction::wal::log_record::{LogPayload, LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("disk error: {0}")]
    DiskError(#[from] DiskManagerError),

    #[error("buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("page error: {0}")]
    PageError(#[from] PageError),

    #[error("log record at lsn {0} missing from lsn mapping")]
    MissingRecord(Lsn),

    #[error("corrupted log record at offset {0}")]
    CorruptedRecord(u64),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Crash recovery: a forward redo scan over the whole log followed by
/// backward undo of every transaction without a COMMIT or ABORT.
/// Single-threaded; runs before the buffer pool takes user traffic.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    /// txn id -> LSN of its most recent log record
    active_txn: HashMap<TxnId, Lsn>,
    /// lsn -> byte offset of the record in the log file
    lsn_mapping: HashMap<Lsn, u64>,
    log_buffer: Vec<u8>,
}

impl LogRecovery {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
            log_buffer: vec![0; LOG_BUFFER_SIZE],
        }
    }

    /// Run both passes.
    pub fn recover(&mut self) -> Result<()> {
        info!("recovery: starting redo pass");
        self.redo()?;
        info!("recovery: starting undo pass, {} loser txns", self.active_txn.len());
        self.undo()?;
        self.buffer_pool.flush_all_pages()?;
        info!("recovery: complete");
        Ok(())
    }

    /// Transactions still open after the scans; empty once `undo` has
    /// run.
    pub fn active_txn(&self) -> &HashMap<TxnId, Lsn> {
        &self.active_txn
    }

    /// Forward scan: rebuild the transaction table, remember each
    /// record's file offset, and reapply every change the pages have
    /// not yet seen. Records straddling the buffer boundary are picked
    /// up by the next refill, which restarts at the straddler's offset.
    pub fn redo(&mut self) -> Result<()> {
        let mut file_offset: u64 = 0;
        loop {
            let bytes = self.disk_manager.read_log(&mut self.log_buffer, file_offset)?;
            if bytes == 0 {
                break;
            }

            let mut pos = 0usize;
            while let Some(record) = LogRecord::deserialize(&self.log_buffer[pos..bytes]) {
                let size = record.size as usize;
                self.lsn_mapping.insert(record.lsn, file_offset + pos as u64);
                self.apply_redo(&record)?;
                pos += size;
            }

            if pos == 0 {
                // No complete record at the front of a fresh refill:
                // the tail of the log is a torn write, stop here.
                break;
            }
            file_offset += pos as u64;
        }
        Ok(())
    }

    fn apply_redo(&mut self, record: &LogRecord) -> Result<()> {
        match record.record_type {
            LogRecordType::Begin => {
                self.active_txn.insert(record.txn_id, record.lsn);
                return Ok(());
            }
            LogRecordType::Commit | LogRecordType::Abort => {
                self.active_txn.remove(&record.txn_id);
                return Ok(());
            }
            _ => {
                self.active_txn.insert(record.txn_id, record.lsn);
            }
        }

        match &record.payload {
            LogPayload::Insert { rid, tuple } => {
                self.redo_on_page(*rid, record.lsn, |page| {
                    TuplePage::insert_tuple(page, *rid, tuple).map(|_| ())
                })?;
            }
            LogPayload::Delete { rid, .. } => {
                let rid = *rid;
                match record.record_type {
                    LogRecordType::MarkDelete => {
                        self.redo_on_page(rid, record.lsn, |page| TuplePage::mark_delete(page, rid))?
                    }
                    LogRecordType::RollbackDelete => self.redo_on_page(rid, record.lsn, |page| {
                        TuplePage::rollback_delete(page, rid)
                    })?,
                    LogRecordType::ApplyDelete => {
                        self.redo_on_page(rid, record.lsn, |page| TuplePage::apply_delete(page, rid))?
                    }
                    _ => unreachable!("delete payload with non-delete type"),
                }
            }
            LogPayload::Update { rid, new_tuple, .. } => {
                self.redo_on_page(*rid, record.lsn, |page| {
                    TuplePage::update_tuple(page, *rid, new_tuple)
                })?;
            }
            LogPayload::NewPage { prev_page_id } => {
                // The original engine reuses the payload page id as the
                // redo target; an invalid id (first page of a heap) has
                // nothing to reinit.
                if *prev_page_id != INVALID_PAGE_ID {
                    let page_ptr = self.buffer_pool.fetch_page(*prev_page_id)?;
                    let mut page = page_ptr.write();
                    if TuplePage::lsn(&page) < record.lsn {
                        TuplePage::init(&mut page);
                        TuplePage::set_lsn(&mut page, record.lsn);
                        drop(page);
                        self.buffer_pool.unpin_page(*prev_page_id, true)?;
                    } else {
                        drop(page);
                        self.buffer_pool.unpin_page(*prev_page_id, false)?;
                    }
                }
            }
            LogPayload::Transaction => {}
        }
        Ok(())
    }

    /// Fetch the target page and apply `op` unless the page already
    /// carries this record's effect (its LSN is at or past the
    /// record's).
    fn redo_on_page<F>(&self, rid: Rid, lsn: Lsn, op: F) -> Result<()>
    where
        F: FnOnce(&mut crate::storage::page::Page) -> std::result::Result<(), PageError>,
    {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let mut page = page_ptr.write();
        if TuplePage::lsn(&page) >= lsn {
            drop(page);
            self.buffer_pool.unpin_page(rid.page_id, false)?;
            return Ok(());
        }
        debug!("redo lsn {} on page {}", lsn, rid.page_id);
        op(&mut page)?;
        TuplePage::set_lsn(&mut page, lsn);
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Backward pass: walk each loser transaction's `prev_lsn` chain,
    /// applying the logical inverse of every change that reached its
    /// page, stopping at the BEGIN record.
    pub fn undo(&mut self) -> Result<()> {
        let losers: Vec<(TxnId, Lsn)> = self.active_txn.iter().map(|(t, l)| (*t, *l)).collect();
        for (txn_id, last_lsn) in losers {
            debug!("undoing txn {} from lsn {}", txn_id, last_lsn);
            let mut lsn = last_lsn;
            loop {
                let record = self.read_record_at(lsn)?;
                match (&record.record_type, &record.payload) {
                    (LogRecordType::Begin, _) => break,
                    (LogRecordType::Insert, LogPayload::Insert { rid, .. }) => {
                        self.undo_on_page(*rid, record.lsn, |page| {
                            TuplePage::apply_delete(page, *rid)
                        })?;
                    }
                    (LogRecordType::ApplyDelete, LogPayload::Delete { rid, tuple }) => {
                        self.undo_on_page(*rid, record.lsn, |page| {
                            TuplePage::insert_tuple(page, *rid, tuple).map(|_| ())
                        })?;
                    }
                    (LogRecordType::MarkDelete, LogPayload::Delete { rid, .. }) => {
                        self.undo_on_page(*rid, record.lsn, |page| {
                            TuplePage::rollback_delete(page, *rid)
                        })?;
                    }
                    (LogRecordType::RollbackDelete, LogPayload::Delete { rid, .. }) => {
                        self.undo_on_page(*rid, record.lsn, |page| {
                            TuplePage::mark_delete(page, *rid)
                        })?;
                    }
                    (LogRecordType::Update, LogPayload::Update { rid, old_tuple, .. }) => {
                        self.undo_on_page(*rid, record.lsn, |page| {
                            TuplePage::update_tuple(page, *rid, old_tuple)
                        })?;
                    }
                    // A fresh page with no surviving changes needs no
                    // compensation.
                    (LogRecordType::NewPage, _) => {}
                    _ => {}
                }
                if record.prev_lsn == INVALID_LSN {
                    break;
                }
                lsn = record.prev_lsn;
            }
        }
        self.active_txn.clear();
        Ok(())
    }

    /// Apply an inverse unless the page never saw the original change
    /// (its LSN is older than the record's).
    fn undo_on_page<F>(&self, rid: Rid, lsn: Lsn, op: F) -> Result<()>
    where
        F: FnOnce(&mut crate::storage::page::Page) -> std::result::Result<(), PageError>,
    {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let mut page = page_ptr.write();
        if TuplePage::lsn(&page) < lsn {
            drop(page);
            self.buffer_pool.unpin_page(rid.page_id, false)?;
            return Ok(());
        }
        debug!("undo lsn {} on page {}", lsn, rid.page_id);
        op(&mut page)?;
        drop(page);
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    fn read_record_at(&mut self, lsn: Lsn) -> Result<LogRecord> {
        let offset = *self
            .lsn_mapping
            .get(&lsn)
            .ok_or(RecoveryError::MissingRecord(lsn))?;
        let bytes = self.disk_manager.read_log(&mut self.log_buffer, offset)?;
        LogRecord::deserialize(&self.log_buffer[..bytes])
            .ok_or(RecoveryError::CorruptedRecord(offset))
    }
}
