use std::collections::HashSet;

use crate::common::config::{Lsn, PageId, TxnId, INVALID_LSN};
use crate::common::rid::Rid;

/// Two-phase locking lifecycle. A transaction is born GROWING; under
/// non-strict 2PL the first unlock moves it to SHRINKING, under strict
/// 2PL it goes straight to COMMITTED or ABORTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// An active transaction: its 2PL state, the RIDs it holds locks on,
/// the WAL chain tail, and pages scheduled for deallocation once all
/// latches are released.
pub struct Transaction {
    id: TxnId,
    state: TransactionState,
    prev_lsn: Lsn,
    shared_lock_set: HashSet<Rid>,
    exclusive_lock_set: HashSet<Rid>,
    deleted_page_set: Vec<PageId>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TransactionState::Growing,
            prev_lsn: INVALID_LSN,
            shared_lock_set: HashSet::new(),
            exclusive_lock_set: HashSet::new(),
            deleted_page_set: Vec::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// LSN of this transaction's most recent log record; links the
    /// per-transaction record chain walked by undo.
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn shared_lock_set(&self) -> &HashSet<Rid> {
        &self.shared_lock_set
    }

    pub fn shared_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.shared_lock_set
    }

    pub fn exclusive_lock_set(&self) -> &HashSet<Rid> {
        &self.exclusive_lock_set
    }

    pub fn exclusive_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.exclusive_lock_set
    }

    pub fn deleted_page_set(&self) -> &[PageId] {
        &self.deleted_page_set
    }

    pub fn add_deleted_page(&mut self, page_id: PageId) {
        self.deleted_page_set.push(page_id);
    }

    pub fn take_deleted_pages(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.deleted_page_set)
    }
}
