pub mod config;
pub mod rid;
pub mod tuple;

pub use config::{FrameId, Lsn, PageId, SlotId, TxnId};
pub use rid::Rid;
pub use tuple::Tuple;
