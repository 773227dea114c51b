use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::config::{PageId, INVALID_PAGE_ID};
use crate::common::rid::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;

/// In-order iterator over the leaf chain. Holds a pin on the current
/// leaf (released on advance or drop) and walks `next_page_id` links
/// left to right.
pub struct IndexIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    node: Option<BTreeNode<K>>,
    page_id: PageId,
    index: usize,
}

impl<K> IndexIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        node: BTreeNode<K>,
        page_id: PageId,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            node: Some(node),
            page_id,
            index,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            node: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
        }
    }

    /// Exhausted: past the last entry of the last leaf.
    pub fn is_end(&self) -> bool {
        match &self.node {
            None => true,
            Some(node) => self.index >= node.keys.len() && node.next_page_id == INVALID_PAGE_ID,
        }
    }

    /// Unpin the current leaf and move to the next one. Clears the
    /// node at the end of the chain.
    fn advance_leaf(&mut self) -> Result<(), BTreeError> {
        let node = self.node.take().expect("advance past the end of the index");
        self.buffer_pool.unpin_page(self.page_id, false)?;
        self.page_id = INVALID_PAGE_ID;

        if node.next_page_id == INVALID_PAGE_ID {
            return Ok(());
        }
        let page = self.buffer_pool.fetch_page(node.next_page_id)?;
        let next = {
            let guard = page.read();
            deserialize_node(&guard)?
        };
        self.page_id = node.next_page_id;
        self.index = 0;
        self.node = Some(next);
        Ok(())
    }
}

impl<K> Iterator for IndexIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node.as_ref()?;
            if self.index < node.keys.len() {
                let item = (node.keys[self.index].clone(), node.values[self.index]);
                self.index += 1;
                return Some(item);
            }
            self.advance_leaf().ok()?;
        }
    }
}

impl<K> Drop for IndexIterator<K> {
    fn drop(&mut self) {
        if self.node.is_some() {
            let _ = self.buffer_pool.unpin_page(self.page_id, false);
        }
    }
}
