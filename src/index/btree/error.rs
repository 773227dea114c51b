use thiserror::Error;

use crate::storage::buffer::BufferPoolError;
use crate::storage::page::PageError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("header page error: {0}")]
    Page(#[from] PageError),

    #[error("node serialization failed: {0}")]
    Serialization(String),

    #[error("corrupted node image: {0}")]
    Deserialization(String),

    #[error("node image too large for a page")]
    NodeTooLarge,
}
