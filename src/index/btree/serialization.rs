use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::config::PAGE_SIZE;
use crate::common::rid::RID_SIZE;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::storage::page::Page;

/// Result type for node serialization
pub type Result<T> = std::result::Result<T, BTreeError>;

/// Write a node image into a page: a u32 length prefix followed by the
/// bincode-encoded node.
pub fn serialize_node<K: Serialize>(node: &BTreeNode<K>, page: &mut Page) -> Result<()> {
    let bytes =
        bincode::serialize(node).map_err(|e| BTreeError::Serialization(e.to_string()))?;
    if bytes.len() + 4 > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    page.data.fill(0);
    LittleEndian::write_u32(&mut page.data[0..4], bytes.len() as u32);
    page.data[4..4 + bytes.len()].copy_from_slice(&bytes);
    Ok(())
}

/// Read a node image back out of a page.
pub fn deserialize_node<K: DeserializeOwned>(page: &Page) -> Result<BTreeNode<K>> {
    let len = LittleEndian::read_u32(&page.data[0..4]) as usize;
    if len == 0 || len + 4 > PAGE_SIZE {
        return Err(BTreeError::Deserialization(format!(
            "invalid node image length {} on page {}",
            len, page.page_id
        )));
    }
    bincode::deserialize(&page.data[4..4 + len])
        .map_err(|e| BTreeError::Deserialization(e.to_string()))
}

/// Fan-out sized so a full node's image fits a page with headroom for
/// the bincode framing. Kept even so split halves land exactly at
/// `min_size`.
pub fn calculate_btree_order<K>() -> usize {
    let entry_size = std::mem::size_of::<K>().max(1) + RID_SIZE + 8;
    let order = (PAGE_SIZE - 128) / entry_size;
    (order & !1).max(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::INVALID_PAGE_ID;
    use crate::common::rid::Rid;

    #[test]
    fn test_node_round_trip() {
        let mut node: BTreeNode<i32> = BTreeNode::new_leaf(3, 1);
        node.leaf_insert(10, Rid::new(5, 2));
        node.leaf_insert(20, Rid::new(5, 3));
        node.next_page_id = 4;

        let mut page = Page::new(3);
        serialize_node(&node, &mut page).unwrap();
        let parsed: BTreeNode<i32> = deserialize_node(&page).unwrap();

        assert_eq!(parsed.keys, node.keys);
        assert_eq!(parsed.values, node.values);
        assert_eq!(parsed.next_page_id, 4);
        assert_eq!(parsed.parent_page_id, 1);
    }

    #[test]
    fn test_blank_page_is_rejected() {
        let page = Page::new(INVALID_PAGE_ID);
        assert!(deserialize_node::<i32>(&page).is_err());
    }

    #[test]
    fn test_order_is_even_and_fits() {
        let order = calculate_btree_order::<i64>();
        assert!(order >= 4);
        assert_eq!(order % 2, 0);
        // A full leaf at this order must serialize into one page.
        let mut node: BTreeNode<i64> = BTreeNode::new_leaf(1, INVALID_PAGE_ID);
        for k in 0..order as i64 {
            node.leaf_insert(k, Rid::new(1, k as u32));
        }
        let mut page = Page::new(1);
        serialize_node(&node, &mut page).unwrap();
    }
}
