use thiserror::Error;

use crate::common::config::SlotId;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("not enough free space on page")]
    InsufficientSpace,

    #[error("slot {0} is out of range")]
    InvalidSlot(SlotId),

    #[error("slot {0} is already occupied")]
    SlotOccupied(SlotId),

    #[error("no tuple at slot {0}")]
    TupleNotFound(SlotId),

    #[error("index name too long: {0}")]
    NameTooLong(String),

    #[error("header page is full")]
    HeaderFull,

    #[error("duplicate header record: {0}")]
    DuplicateRecord(String),

    #[error("header record not found: {0}")]
    RecordNotFound(String),
}
