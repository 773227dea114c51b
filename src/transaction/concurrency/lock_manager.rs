use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};

use log::debug;
use thiserror::Error;

use crate::common::config::TxnId;
use crate::common::rid::Rid;
use crate::transaction::concurrency::transaction::{Transaction, TransactionState};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("transaction {0} cannot acquire locks in its current state")]
    InvalidState(TxnId),

    #[error("transaction {0} aborted by wait-die")]
    Aborted(TxnId),

    #[error("transaction {0} holds no shared lock on {1}")]
    NotShared(TxnId, Rid),

    #[error("transaction {0} holds no lock on {1}")]
    NotHeld(TxnId, Rid),

    #[error("transaction {0} unlocked before commit under strict 2PL")]
    EarlyUnlock(TxnId),
}

/// Result type for lock manager operations
pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    held: bool,
}

/// Per-RID wait queue. Held requests sit at the front; waiters are
/// kept sorted by transaction id within the unheld suffix so grants
/// favor older transactions.
#[derive(Debug, Default)]
struct LockList {
    queue: VecDeque<LockRequest>,
}

impl LockList {
    /// Smallest txn id among the holders; drives wait-die.
    fn oldest(&self) -> Option<TxnId> {
        self.queue.iter().filter(|r| r.held).map(|r| r.txn_id).min()
    }

    fn head_is_shared(&self) -> bool {
        matches!(self.queue.front(), Some(r) if r.mode == LockMode::Shared)
    }

    fn enqueue_waiter(&mut self, txn_id: TxnId, mode: LockMode) {
        let pos = self
            .queue
            .iter()
            .position(|r| !r.held && r.txn_id > txn_id)
            .unwrap_or(self.queue.len());
        self.queue.insert(
            pos,
            LockRequest {
                txn_id,
                mode,
                held: false,
            },
        );
    }

    fn grant_front(&mut self, txn_id: TxnId) -> bool {
        match self.queue.front_mut() {
            Some(front) if front.txn_id == txn_id && !front.held => {
                front.held = true;
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, txn_id: TxnId) -> Option<LockMode> {
        let pos = self.queue.iter().position(|r| r.txn_id == txn_id)?;
        self.queue.remove(pos).map(|r| r.mode)
    }

    fn holds(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.queue
            .iter()
            .any(|r| r.txn_id == txn_id && r.mode == mode && r.held)
    }

    fn sole_holder(&self, txn_id: TxnId) -> bool {
        self.queue.iter().filter(|r| r.held).all(|r| r.txn_id == txn_id)
    }
}

/// Tuple-level lock manager implementing two-phase locking with
/// wait-die deadlock prevention: an older requester waits for the
/// holders, a younger one is aborted on the spot.
pub struct LockManager {
    strict: bool,
    lock_table: Mutex<HashMap<Rid, LockList>>,
    waiters: Condvar,
}

impl LockManager {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            lock_table: Mutex::new(HashMap::new()),
            waiters: Condvar::new(),
        }
    }

    /// Acquire a shared lock on `rid`, blocking if an exclusive holder
    /// is ahead and this transaction is old enough to wait.
    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        self.check_lockable(txn)?;
        let mut table = self.lock_table.lock().unwrap();

        {
            let list = table.entry(rid).or_default();
            if list.queue.is_empty() {
                list.queue.push_back(LockRequest {
                    txn_id: txn.id(),
                    mode: LockMode::Shared,
                    held: true,
                });
                txn.shared_lock_set_mut().insert(rid);
                return Ok(());
            }

            // Compatible with the current holders: granted immediately.
            if list.head_is_shared() {
                list.queue.push_front(LockRequest {
                    txn_id: txn.id(),
                    mode: LockMode::Shared,
                    held: true,
                });
                txn.shared_lock_set_mut().insert(rid);
                return Ok(());
            }

            // Exclusive holder ahead: wait-die.
            let oldest = list.oldest().unwrap_or(txn.id());
            if txn.id() > oldest {
                debug!("wait-die: txn {} dies requesting shared {}", txn.id(), rid);
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::Aborted(txn.id()));
            }
            list.enqueue_waiter(txn.id(), LockMode::Shared);
        }

        loop {
            {
                let list = table.get_mut(&rid).expect("lock list vanished while waiting");
                if list.grant_front(txn.id()) {
                    break;
                }
            }
            table = self.waiters.wait(table).unwrap();
        }
        txn.shared_lock_set_mut().insert(rid);
        Ok(())
    }

    /// Acquire an exclusive lock on `rid`.
    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        self.check_lockable(txn)?;
        let mut table = self.lock_table.lock().unwrap();

        {
            let list = table.entry(rid).or_default();
            if list.queue.is_empty() {
                list.queue.push_back(LockRequest {
                    txn_id: txn.id(),
                    mode: LockMode::Exclusive,
                    held: true,
                });
                txn.exclusive_lock_set_mut().insert(rid);
                return Ok(());
            }

            let oldest = list.oldest().unwrap_or(txn.id());
            if txn.id() > oldest {
                debug!("wait-die: txn {} dies requesting exclusive {}", txn.id(), rid);
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::Aborted(txn.id()));
            }
            list.enqueue_waiter(txn.id(), LockMode::Exclusive);
        }

        loop {
            {
                let list = table.get_mut(&rid).expect("lock list vanished while waiting");
                if list.grant_front(txn.id()) {
                    break;
                }
            }
            table = self.waiters.wait(table).unwrap();
        }
        txn.exclusive_lock_set_mut().insert(rid);
        Ok(())
    }

    /// Promote a held shared lock to exclusive. Granted eagerly when
    /// this transaction is the only holder; otherwise wait-die applies.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        self.check_lockable(txn)?;
        let mut table = self.lock_table.lock().unwrap();

        {
            let list = table
                .get_mut(&rid)
                .ok_or(LockError::NotShared(txn.id(), rid))?;
            if !list.holds(txn.id(), LockMode::Shared) {
                return Err(LockError::NotShared(txn.id(), rid));
            }

            if list.sole_holder(txn.id()) {
                list.remove(txn.id());
                list.queue.push_front(LockRequest {
                    txn_id: txn.id(),
                    mode: LockMode::Exclusive,
                    held: true,
                });
                txn.shared_lock_set_mut().remove(&rid);
                txn.exclusive_lock_set_mut().insert(rid);
                return Ok(());
            }

            let oldest = list.oldest().unwrap_or(txn.id());
            if txn.id() > oldest {
                debug!("wait-die: txn {} dies upgrading {}", txn.id(), rid);
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::Aborted(txn.id()));
            }
            list.remove(txn.id());
            list.enqueue_waiter(txn.id(), LockMode::Exclusive);
        }
        loop {
            {
                let list = table.get_mut(&rid).expect("lock list vanished while waiting");
                if list.grant_front(txn.id()) {
                    break;
                }
            }
            table = self.waiters.wait(table).unwrap();
        }
        txn.shared_lock_set_mut().remove(&rid);
        txn.exclusive_lock_set_mut().insert(rid);
        Ok(())
    }

    /// Release the lock held on `rid`. Under strict 2PL this is only
    /// legal once the transaction has committed or aborted; under
    /// non-strict 2PL the first unlock ends the growing phase.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        if self.strict {
            if !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            ) {
                txn.set_state(TransactionState::Aborted);
                return Err(LockError::EarlyUnlock(txn.id()));
            }
        } else if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let mut table = self.lock_table.lock().unwrap();
        let list = table.get_mut(&rid).ok_or(LockError::NotHeld(txn.id(), rid))?;
        let mode = list
            .remove(txn.id())
            .ok_or(LockError::NotHeld(txn.id(), rid))?;
        if list.queue.is_empty() {
            table.remove(&rid);
        }
        drop(table);

        match mode {
            LockMode::Shared => txn.shared_lock_set_mut().remove(&rid),
            LockMode::Exclusive => txn.exclusive_lock_set_mut().remove(&rid),
        };
        // The head-of-queue predicate is per-waiter, so wake them all.
        self.waiters.notify_all();
        Ok(())
    }

    /// Release every lock `txn` still holds. Meant for cleanup after
    /// commit or abort.
    pub fn release_all(&self, txn: &mut Transaction) {
        let rids: Vec<Rid> = txn
            .shared_lock_set()
            .iter()
            .chain(txn.exclusive_lock_set().iter())
            .copied()
            .collect();
        for rid in rids {
            let _ = self.unlock(txn, rid);
        }
    }

    fn check_lockable(&self, txn: &mut Transaction) -> Result<()> {
        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => {
                Err(LockError::InvalidState(txn.id()))
            }
            TransactionState::Shrinking => {
                // 2PL forbids acquiring after the first release.
                txn.set_state(TransactionState::Aborted);
                Err(LockError::InvalidState(txn.id()))
            }
            TransactionState::Growing => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_then_shared() {
        let lm = LockManager::new(false);
        let rid = Rid::new(1, 0);
        let mut t1 = Transaction::new(1);
        let mut t2 = Transaction::new(2);

        lm.lock_shared(&mut t1, rid).unwrap();
        lm.lock_shared(&mut t2, rid).unwrap();
        assert!(t1.shared_lock_set().contains(&rid));
        assert!(t2.shared_lock_set().contains(&rid));
    }

    #[test]
    fn test_younger_exclusive_requester_dies() {
        let lm = LockManager::new(false);
        let rid = Rid::new(1, 0);
        let mut old = Transaction::new(1);
        let mut young = Transaction::new(5);

        lm.lock_exclusive(&mut old, rid).unwrap();
        assert!(matches!(
            lm.lock_exclusive(&mut young, rid),
            Err(LockError::Aborted(5))
        ));
        assert_eq!(young.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_shrinking_transaction_cannot_lock() {
        let lm = LockManager::new(false);
        let rid_a = Rid::new(1, 0);
        let rid_b = Rid::new(1, 1);
        let mut txn = Transaction::new(1);

        lm.lock_shared(&mut txn, rid_a).unwrap();
        lm.unlock(&mut txn, rid_a).unwrap();
        assert_eq!(txn.state(), TransactionState::Shrinking);

        assert!(lm.lock_shared(&mut txn, rid_b).is_err());
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_strict_unlock_requires_terminal_state() {
        let lm = LockManager::new(true);
        let rid = Rid::new(2, 0);
        let mut txn = Transaction::new(1);

        lm.lock_exclusive(&mut txn, rid).unwrap();
        assert!(matches!(
            lm.unlock(&mut txn, rid),
            Err(LockError::EarlyUnlock(1))
        ));
        assert_eq!(txn.state(), TransactionState::Aborted);

        // Now that the transaction is aborted, the unlock goes through.
        lm.unlock(&mut txn, rid).unwrap();
        assert!(txn.exclusive_lock_set().is_empty());
    }

    #[test]
    fn test_upgrade_sole_holder_is_eager() {
        let lm = LockManager::new(false);
        let rid = Rid::new(3, 0);
        let mut txn = Transaction::new(1);

        lm.lock_shared(&mut txn, rid).unwrap();
        lm.lock_upgrade(&mut txn, rid).unwrap();
        assert!(!txn.shared_lock_set().contains(&rid));
        assert!(txn.exclusive_lock_set().contains(&rid));
    }

    #[test]
    fn test_upgrade_younger_among_holders_dies() {
        let lm = LockManager::new(false);
        let rid = Rid::new(3, 1);
        let mut old = Transaction::new(1);
        let mut young = Transaction::new(9);

        lm.lock_shared(&mut old, rid).unwrap();
        lm.lock_shared(&mut young, rid).unwrap();
        assert!(matches!(
            lm.lock_upgrade(&mut young, rid),
            Err(LockError::Aborted(9))
        ));
    }
}
