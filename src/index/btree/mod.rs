pub mod error;
pub mod iterator;
pub mod node;
pub mod serialization;
pub mod tree;

pub use error::BTreeError;
pub use iterator::IndexIterator;
pub use node::{BTreeNode, NodeType};
pub use tree::BPlusTree;
