use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{RawRwLock, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::config::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::common::rid::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::IndexIterator;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{calculate_btree_order, deserialize_node, serialize_node};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeaderPage, PageReadGuard, PageWriteGuard};
use crate::transaction::concurrency::Transaction;

/// Result type for B+tree operations
pub type Result<T> = std::result::Result<T, BTreeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Delete,
}

type RootGuard = ArcRwLockWriteGuard<RawRwLock, PageId>;

/// Latches held by one mutating operation: the root pointer guard
/// (until the root is safe from change) and the write-latched,
/// pinned pages on the descent path, root side first. Pages scheduled
/// for deletion are deallocated only after every latch is released.
struct WriteContext {
    root_guard: Option<RootGuard>,
    path: Vec<(PageId, PageWriteGuard)>,
    deleted: Vec<PageId>,
}

impl WriteContext {
    fn new(root_guard: RootGuard) -> Self {
        Self {
            root_guard: Some(root_guard),
            path: Vec::new(),
            deleted: Vec::new(),
        }
    }

    fn root_id(&self) -> PageId {
        **self
            .root_guard
            .as_ref()
            .expect("root latch released before the descent finished")
    }

    fn set_root(&mut self, page_id: PageId) {
        **self
            .root_guard
            .as_mut()
            .expect("root latch must be held to move the root") = page_id;
    }
}

/// Concurrent B+tree index over `(K, Rid)` pairs, stored in buffer
/// pool pages and traversed with latch crabbing: writers keep ancestor
/// latches only while a split or merge may still propagate to them.
/// The root pointer is published through the header page on every
/// change.
pub struct BPlusTree<K> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root: Arc<RwLock<PageId>>,
    leaf_max_size: usize,
    internal_max_size: usize,
    split_count: AtomicUsize,
    _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    pub fn new(index_name: &str, buffer_pool: Arc<BufferPoolManager>) -> Result<Self> {
        let order = calculate_btree_order::<K>();
        Self::with_max_sizes(index_name, buffer_pool, order, order)
    }

    /// Create a tree with explicit fan-out limits; small limits keep
    /// split and merge paths exercised in tests.
    pub fn with_max_sizes(
        index_name: &str,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2, "leaf fan-out too small");
        assert!(internal_max_size >= 3, "internal fan-out too small");

        // An index that already exists resumes from its published root.
        let page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_id = {
            let guard = page.read();
            HeaderPage::get_root_id(&guard, index_name)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;

        Ok(Self {
            index_name: index_name.to_string(),
            buffer_pool,
            root: Arc::new(RwLock::new(root_id.unwrap_or(INVALID_PAGE_ID))),
            leaf_max_size,
            internal_max_size,
            split_count: AtomicUsize::new(0),
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Number of node splits performed since this handle was created.
    pub fn split_count(&self) -> usize {
        self.split_count.load(Ordering::Relaxed)
    }

    // ---- point lookup ----

    pub fn get_value(&self, key: &K) -> Result<Option<Rid>> {
        let Some((leaf_id, guard)) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let node: BTreeNode<K> = deserialize_node(&guard)?;
        let result = node.lookup(key);
        drop(guard);
        self.buffer_pool.unpin_page(leaf_id, false)?;
        Ok(result)
    }

    // ---- iteration ----

    /// Iterator positioned at the first entry of the leftmost leaf.
    pub fn begin(&self) -> Result<IndexIterator<K>> {
        self.make_iterator(None)
    }

    /// Iterator positioned at the first entry with key `>= key`.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<K>> {
        self.make_iterator(Some(key))
    }

    fn make_iterator(&self, key: Option<&K>) -> Result<IndexIterator<K>> {
        let Some((leaf_id, guard)) = self.find_leaf_read(key)? else {
            return Ok(IndexIterator::empty(self.buffer_pool.clone()));
        };
        let node: BTreeNode<K> = deserialize_node(&guard)?;
        let index = match key {
            Some(key) => node.key_index(key),
            None => 0,
        };
        drop(guard);
        // The leaf stays pinned; the iterator owns that pin.
        Ok(IndexIterator::new(
            self.buffer_pool.clone(),
            node,
            leaf_id,
            index,
        ))
    }

    // ---- insertion ----

    /// Insert a key/value pair. Returns false when the key already
    /// exists; keys are unique.
    pub fn insert(
        &self,
        key: K,
        value: Rid,
        mut txn: Option<&mut Transaction>,
    ) -> Result<bool> {
        let mut ctx = WriteContext::new(self.root.write_arc());
        // The exclusive root guard makes the empty-check-and-create
        // race-free: exactly one first inserter builds the tree.
        if ctx.root_id() == INVALID_PAGE_ID {
            self.start_new_tree(&mut ctx, key, value)?;
            self.finish_write(&mut ctx, txn.as_deref_mut())?;
            return Ok(true);
        }
        self.descend_write(&mut ctx, &key, WriteOp::Insert)?;
        let inserted = self.insert_into_leaf(&mut ctx, key, value)?;
        self.finish_write(&mut ctx, txn.as_deref_mut())?;
        Ok(inserted)
    }

    fn start_new_tree(&self, ctx: &mut WriteContext, key: K, value: Rid) -> Result<()> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        let mut node = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID);
        node.leaf_insert(key, value);
        {
            let mut guard = page.write();
            serialize_node(&node, &mut guard)?;
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        ctx.set_root(page_id);
        self.publish_root(page_id)?;
        Ok(())
    }

    fn insert_into_leaf(&self, ctx: &mut WriteContext, key: K, value: Rid) -> Result<bool> {
        let (leaf_id, mut leaf_guard) = ctx.path.pop().expect("descent must end at a leaf");
        let mut leaf: BTreeNode<K> = deserialize_node(&leaf_guard)?;

        if leaf.lookup(&key).is_some() {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, false)?;
            return Ok(false);
        }

        if leaf.size() < self.leaf_max_size {
            leaf.leaf_insert(key, value);
            serialize_node(&leaf, &mut leaf_guard)?;
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, true)?;
            return Ok(true);
        }

        // Full leaf: split, then place the new key in the proper half
        // and stitch the sibling chain.
        let (new_page, new_page_id) = self.buffer_pool.new_page()?;
        let (mut new_leaf, separator) = leaf.split_leaf();
        new_leaf.page_id = new_page_id;
        if key < separator {
            leaf.leaf_insert(key, value);
        } else {
            new_leaf.leaf_insert(key, value);
        }
        new_leaf.next_page_id = leaf.next_page_id;
        leaf.next_page_id = new_page_id;

        {
            let mut guard = new_page.write();
            serialize_node(&new_leaf, &mut guard)?;
        }
        serialize_node(&leaf, &mut leaf_guard)?;
        self.split_count.fetch_add(1, Ordering::Relaxed);
        drop(leaf_guard);
        self.buffer_pool.unpin_page(leaf_id, true)?;

        self.insert_into_parent(ctx, leaf_id, separator, new_page_id)?;
        Ok(true)
    }

    /// Hook `new_id` into the parent of `old_id`, splitting upward as
    /// long as parents overflow. The ancestors this can touch are
    /// exactly the ones the descent kept latched.
    fn insert_into_parent(
        &self,
        ctx: &mut WriteContext,
        old_id: PageId,
        key: K,
        new_id: PageId,
    ) -> Result<()> {
        if ctx.path.is_empty() {
            // old was the root: grow the tree by one level.
            let (root_page, new_root_id) = self.buffer_pool.new_page()?;
            let mut root = BTreeNode::new_internal(new_root_id, INVALID_PAGE_ID);
            root.populate_new_root(old_id, key, new_id);
            {
                let mut guard = root_page.write();
                serialize_node(&root, &mut guard)?;
            }
            self.buffer_pool.unpin_page(new_root_id, true)?;
            self.set_parent(old_id, new_root_id)?;
            self.set_parent(new_id, new_root_id)?;
            self.buffer_pool.unpin_page(new_id, true)?;
            self.split_count.fetch_add(1, Ordering::Relaxed);

            ctx.set_root(new_root_id);
            self.publish_root(new_root_id)?;
            ctx.root_guard = None;
            return Ok(());
        }

        let (parent_id, mut parent_guard) = ctx.path.pop().expect("ancestor latch missing");
        let mut parent: BTreeNode<K> = deserialize_node(&parent_guard)?;

        if parent.size() < self.internal_max_size {
            parent.insert_child_after(old_id, key, new_id);
            serialize_node(&parent, &mut parent_guard)?;
            self.set_parent(new_id, parent_id)?;
            self.buffer_pool.unpin_page(new_id, true)?;
            drop(parent_guard);
            self.buffer_pool.unpin_page(parent_id, true)?;
            return Ok(());
        }

        // Parent is full too: split it and insert into whichever half
        // ended up owning `old_id`.
        let (sibling_page, sibling_id) = self.buffer_pool.new_page()?;
        let (mut sibling, mid_key) = parent.split_internal();
        sibling.page_id = sibling_id;
        for child in sibling.children.clone() {
            self.set_parent(child, sibling_id)?;
        }

        if sibling.child_index(old_id).is_some() {
            sibling.insert_child_after(old_id, key, new_id);
            self.set_parent(new_id, sibling_id)?;
        } else {
            parent.insert_child_after(old_id, key, new_id);
            self.set_parent(new_id, parent_id)?;
        }
        self.buffer_pool.unpin_page(new_id, true)?;

        {
            let mut guard = sibling_page.write();
            serialize_node(&sibling, &mut guard)?;
        }
        serialize_node(&parent, &mut parent_guard)?;
        self.split_count.fetch_add(1, Ordering::Relaxed);
        drop(parent_guard);
        self.buffer_pool.unpin_page(parent_id, true)?;

        self.insert_into_parent(ctx, parent_id, mid_key, sibling_id)
    }

    // ---- deletion ----

    /// Delete the entry for `key`, rebalancing by redistribution or by
    /// merging into the left neighbor when a node underflows. Absent
    /// keys are a no-op.
    pub fn remove(&self, key: &K, mut txn: Option<&mut Transaction>) -> Result<()> {
        let mut ctx = WriteContext::new(self.root.write_arc());
        if ctx.root_id() == INVALID_PAGE_ID {
            return Ok(());
        }
        self.descend_write(&mut ctx, key, WriteOp::Delete)?;

        let (leaf_id, mut leaf_guard) = ctx.path.pop().expect("descent must end at a leaf");
        let mut leaf: BTreeNode<K> = deserialize_node(&leaf_guard)?;

        if !leaf.leaf_remove(key) {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, false)?;
            self.finish_write(&mut ctx, txn.as_deref_mut())?;
            return Ok(());
        }

        let underflow = if leaf.parent_page_id == INVALID_PAGE_ID {
            leaf.size() == 0
        } else {
            leaf.size() < self.leaf_min_size()
        };
        if underflow {
            self.coalesce_or_redistribute(&mut ctx, leaf_id, leaf_guard, leaf)?;
        } else {
            serialize_node(&leaf, &mut leaf_guard)?;
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, true)?;
        }
        self.finish_write(&mut ctx, txn.as_deref_mut())?;
        Ok(())
    }

    /// Rebalance an underfull `node`, whose mutation is not yet
    /// serialized. Every path through here serializes (or discards)
    /// the node, releases its latch and unpins it.
    fn coalesce_or_redistribute(
        &self,
        ctx: &mut WriteContext,
        node_id: PageId,
        node_guard: PageWriteGuard,
        node: BTreeNode<K>,
    ) -> Result<()> {
        if node.parent_page_id == INVALID_PAGE_ID {
            return self.adjust_root(ctx, node_id, node_guard, node);
        }

        let (parent_id, mut parent_guard) = ctx
            .path
            .pop()
            .expect("underfull node's parent must still be latched");
        let mut parent: BTreeNode<K> = deserialize_node(&parent_guard)?;
        let index = parent
            .child_index(node_id)
            .expect("underfull node missing from its parent");

        // Sibling choice: the right neighbor only for the leftmost
        // child. The merge target is always the left node of the pair.
        let node_is_left = index == 0;
        let (left_id, right_id, right_index) = if node_is_left {
            (node_id, parent.children[1], 1)
        } else {
            (parent.children[index - 1], node_id, index)
        };
        let sibling_id = if node_is_left { right_id } else { left_id };

        let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
        let sibling_guard = sibling_page.write_arc();
        let sibling: BTreeNode<K> = deserialize_node(&sibling_guard)?;

        let (mut left, mut left_guard, mut right, mut right_guard) = if node_is_left {
            (node, node_guard, sibling, sibling_guard)
        } else {
            (sibling, sibling_guard, node, node_guard)
        };

        if left.size() + right.size() <= self.max_size_of(&left) {
            // Coalesce: fold the right node into the left one. For
            // internal nodes the parent separator comes down as the
            // first key of the moved block.
            if left.is_leaf() {
                left.keys.append(&mut right.keys);
                left.values.append(&mut right.values);
                left.next_page_id = right.next_page_id;
            } else {
                left.keys.push(parent.keys[right_index - 1].clone());
                left.keys.append(&mut right.keys);
                let moved = right.children.clone();
                left.children.append(&mut right.children);
                for child in moved {
                    self.set_parent(child, left_id)?;
                }
            }
            parent.remove_child_at(right_index);

            serialize_node(&left, &mut left_guard)?;
            drop(left_guard);
            self.buffer_pool.unpin_page(left_id, true)?;
            drop(right_guard);
            self.buffer_pool.unpin_page(right_id, true)?;
            ctx.deleted.push(right_id);

            let parent_underflow = if parent.parent_page_id == INVALID_PAGE_ID {
                parent.size() == 1
            } else {
                parent.size() < self.internal_min_size()
            };
            if parent_underflow {
                return self.coalesce_or_redistribute(ctx, parent_id, parent_guard, parent);
            }
            serialize_node(&parent, &mut parent_guard)?;
            drop(parent_guard);
            self.buffer_pool.unpin_page(parent_id, true)?;
            return Ok(());
        }

        // Redistribute: shift one entry across the boundary and patch
        // the separator. Internal moves rotate through the parent key
        // and reparent the moved child.
        if node_is_left {
            if left.is_leaf() {
                left.keys.push(right.keys.remove(0));
                left.values.push(right.values.remove(0));
                parent.keys[right_index - 1] = right.keys[0].clone();
            } else {
                left.keys.push(parent.keys[right_index - 1].clone());
                let moved = right.children.remove(0);
                left.children.push(moved);
                parent.keys[right_index - 1] = right.keys.remove(0);
                self.set_parent(moved, left_id)?;
            }
        } else if right.is_leaf() {
            right.keys.insert(0, left.keys.pop().expect("sibling cannot be empty"));
            right
                .values
                .insert(0, left.values.pop().expect("sibling cannot be empty"));
            parent.keys[right_index - 1] = right.keys[0].clone();
        } else {
            right
                .keys
                .insert(0, parent.keys[right_index - 1].clone());
            parent.keys[right_index - 1] =
                left.keys.pop().expect("sibling cannot be empty");
            let moved = left.children.pop().expect("sibling cannot be empty");
            right.children.insert(0, moved);
            self.set_parent(moved, right_id)?;
        }

        serialize_node(&left, &mut left_guard)?;
        serialize_node(&right, &mut right_guard)?;
        serialize_node(&parent, &mut parent_guard)?;
        drop(left_guard);
        self.buffer_pool.unpin_page(left_id, true)?;
        drop(right_guard);
        self.buffer_pool.unpin_page(right_id, true)?;
        drop(parent_guard);
        self.buffer_pool.unpin_page(parent_id, true)?;
        Ok(())
    }

    /// Shrink the tree at the top: an internal root left with a single
    /// child promotes that child; an empty leaf root empties the tree.
    fn adjust_root(
        &self,
        ctx: &mut WriteContext,
        root_id: PageId,
        mut root_guard: PageWriteGuard,
        root: BTreeNode<K>,
    ) -> Result<()> {
        if !root.is_leaf() && root.size() == 1 {
            let child_id = root.children[0];
            ctx.set_root(child_id);
            self.set_parent(child_id, INVALID_PAGE_ID)?;
            self.publish_root(child_id)?;
            drop(root_guard);
            self.buffer_pool.unpin_page(root_id, true)?;
            ctx.deleted.push(root_id);
            return Ok(());
        }

        if root.is_leaf() && root.size() == 0 {
            ctx.set_root(INVALID_PAGE_ID);
            self.publish_root(INVALID_PAGE_ID)?;
            drop(root_guard);
            self.buffer_pool.unpin_page(root_id, true)?;
            ctx.deleted.push(root_id);
            return Ok(());
        }

        serialize_node(&root, &mut root_guard)?;
        drop(root_guard);
        self.buffer_pool.unpin_page(root_id, true)?;
        Ok(())
    }

    // ---- descent machinery ----

    /// Read-crabbed descent: latch the child, then release the parent.
    /// Returns the still-latched, pinned leaf, or `None` on an empty
    /// tree.
    fn find_leaf_read(&self, key: Option<&K>) -> Result<Option<(PageId, PageReadGuard)>> {
        let root_guard = self.root.read_arc();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let page = self.buffer_pool.fetch_page(root_id)?;
        let mut guard = page.read_arc();
        drop(root_guard);

        let mut current_id = root_id;
        loop {
            let node: BTreeNode<K> = deserialize_node(&guard)?;
            if node.is_leaf() {
                return Ok(Some((current_id, guard)));
            }
            let child_id = match key {
                Some(key) => node.child_lookup(key),
                None => node.children[0],
            };
            let child_page = self.buffer_pool.fetch_page(child_id)?;
            let child_guard = child_page.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(current_id, false)?;
            guard = child_guard;
            current_id = child_id;
        }
    }

    /// Write-crabbed descent. A node is safe when the operation cannot
    /// propagate past it: below the fan-out limit for inserts, above
    /// the minimum for deletes. Latching a safe node releases every
    /// ancestor, including the root pointer guard.
    fn descend_write(&self, ctx: &mut WriteContext, key: &K, op: WriteOp) -> Result<()> {
        let mut current_id = ctx.root_id();
        loop {
            let page = self.buffer_pool.fetch_page(current_id)?;
            let guard = page.write_arc();
            let node: BTreeNode<K> = deserialize_node(&guard)?;

            let safe = match op {
                WriteOp::Insert => node.size() < self.max_size_of(&node),
                WriteOp::Delete => node.size() > self.min_size_of(&node),
            };
            let next = if node.is_leaf() {
                INVALID_PAGE_ID
            } else {
                node.child_lookup(key)
            };

            ctx.path.push((current_id, guard));
            if safe && ctx.path.len() > 1 {
                let retained = ctx.path.pop().expect("just pushed");
                self.release_ancestors(ctx)?;
                ctx.path.push(retained);
            }

            if next == INVALID_PAGE_ID {
                return Ok(());
            }
            current_id = next;
        }
    }

    /// Drop every latch still held on the path (none of those pages
    /// were modified) and release the root pointer guard.
    fn release_ancestors(&self, ctx: &mut WriteContext) -> Result<()> {
        for (page_id, guard) in ctx.path.drain(..) {
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
        }
        ctx.root_guard = None;
        Ok(())
    }

    /// End-of-operation cleanup: release leftover latches, then
    /// deallocate pages emptied by merges. Deallocation happens only
    /// after all latches are gone; the ids are also recorded on the
    /// transaction when one is supplied.
    fn finish_write(&self, ctx: &mut WriteContext, txn: Option<&mut Transaction>) -> Result<()> {
        self.release_ancestors(ctx)?;
        if let Some(txn) = txn {
            for &page_id in &ctx.deleted {
                txn.add_deleted_page(page_id);
            }
        }
        for page_id in ctx.deleted.drain(..) {
            // A concurrent iterator may still pin the page; it is
            // unreachable from the tree either way.
            let _ = self.buffer_pool.delete_page(page_id);
        }
        Ok(())
    }

    // ---- helpers ----

    fn leaf_min_size(&self) -> usize {
        (self.leaf_max_size + 1) / 2
    }

    fn internal_min_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    fn max_size_of(&self, node: &BTreeNode<K>) -> usize {
        if node.is_leaf() {
            self.leaf_max_size
        } else {
            self.internal_max_size
        }
    }

    fn min_size_of(&self, node: &BTreeNode<K>) -> usize {
        if node.is_leaf() {
            self.leaf_min_size()
        } else {
            self.internal_min_size()
        }
    }

    /// Rewrite a node's parent pointer in place.
    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut guard = page.write();
            let mut node: BTreeNode<K> = deserialize_node(&guard)?;
            node.parent_page_id = parent_id;
            serialize_node(&node, &mut guard)?;
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Record the current root in the header page, so the index can be
    /// reopened by name.
    fn publish_root(&self, root_id: PageId) -> Result<()> {
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = page.write();
            if HeaderPage::update_record(&mut guard, &self.index_name, root_id).is_err() {
                HeaderPage::insert_record(&mut guard, &self.index_name, root_id)?;
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }
}
