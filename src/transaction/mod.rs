pub mod concurrency;
pub mod wal;

pub use concurrency::{LockError, LockManager, LockMode, Transaction, TransactionState};
pub use wal::{LogManager, LogRecord, LogRecordType, LogRecovery};
