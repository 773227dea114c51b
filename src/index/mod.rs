pub mod btree;

pub use btree::{BPlusTree, BTreeError, IndexIterator};
