pub mod lock_manager;
pub mod transaction;

pub use lock_manager::{LockError, LockManager, LockMode};
pub use transaction::{Transaction, TransactionState};
