use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header;
use crate::index::btree::iterator::IndexIterator;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use crate::storage::buffer::BufferPoolManager;

enum InsertOutcome<K> {
    Done,
    Duplicate,
    Split { separator: K, right_id: PageId },
}

/// Disk-resident B+Tree over the buffer pool: a unique, order-preserving
/// index from keys to record ids.
///
/// Nodes live in pages and reference each other (parent, children, leaf
/// chain) by page id only; each operation pins the pages it touches
/// through `PageGuard`s and releases them before returning. A single
/// tree-wide mutex, which also caches the root page id, serializes every
/// operation. The root id is persisted in the header-page root directory
/// under the index name, so reopening an index by name finds its tree.
pub struct BTreeIndex<K> {
    name: String,
    buffer_pool: Arc<BufferPoolManager>,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// Cached root page id; the mutex doubles as the tree-wide latch.
    root: Mutex<PageId>,
    _phantom: PhantomData<K>,
}

impl<K> BTreeIndex<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    /// Open the index named `name`, creating an empty tree when the header
    /// page has no record for it.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf nodes must hold at least two entries");
        assert!(
            internal_max_size >= 3,
            "internal nodes must hold at least three children"
        );

        let name = name.into();
        let root = {
            let guard = buffer_pool.fetch_page_guarded(HEADER_PAGE_ID)?;
            let records = header::load_records(&guard.read())?;
            header::find_root(&records, &name).unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            name,
            buffer_pool,
            leaf_max_size,
            internal_max_size,
            root: Mutex::new(root),
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.lock()
    }

    /// Point query.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root = self.root.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let leaf = self.find_leaf(*root, key)?;
        Ok(leaf.leaf_lookup(key))
    }

    /// Insert a key/rid pair; returns false (without overwriting) when the
    /// key is already present.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root = self.root.lock();

        if *root == INVALID_PAGE_ID {
            let mut guard = self.buffer_pool.new_page_guarded()?;
            let page_id = guard.page_id();
            let mut node = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            node.leaf_insert(key, rid);
            serialize_node(&node, &mut guard.write())?;
            drop(guard);

            *root = page_id;
            self.persist_root(page_id)?;
            debug!("index {}: started tree at leaf {}", self.name, page_id);
            return Ok(true);
        }

        match self.insert_recursive(*root, key, rid)? {
            InsertOutcome::Duplicate => Ok(false),
            InsertOutcome::Done => Ok(true),
            InsertOutcome::Split {
                separator,
                right_id,
            } => {
                // The old root split: install a fresh internal root over
                // both halves.
                let left_id = *root;
                let mut guard = self.buffer_pool.new_page_guarded()?;
                let new_root_id = guard.page_id();
                let mut new_root: BTreeNode<K> =
                    BTreeNode::new_internal(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
                new_root.keys.push(separator);
                new_root.children.push(left_id);
                new_root.children.push(right_id);
                serialize_node(&new_root, &mut guard.write())?;
                drop(guard);

                self.set_parent(left_id, new_root_id)?;
                self.set_parent(right_id, new_root_id)?;

                *root = new_root_id;
                self.persist_root(new_root_id)?;
                debug!("index {}: new root {} after split", self.name, new_root_id);
                Ok(true)
            }
        }
    }

    /// Delete a key; absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut root = self.root.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaf = self.find_leaf(*root, key)?;
        let Some(removed_slot) = leaf.leaf_remove(key) else {
            return Ok(());
        };

        if leaf.parent_page_id == INVALID_PAGE_ID {
            // Leaf root: the root may be arbitrarily small, but an emptied
            // tree gives its last page back.
            if leaf.keys.is_empty() {
                let leaf_id = leaf.page_id;
                self.buffer_pool.delete_page(leaf_id)?;
                *root = INVALID_PAGE_ID;
                self.persist_root(INVALID_PAGE_ID)?;
                debug!("index {}: tree emptied", self.name);
            } else {
                self.store_node(&leaf)?;
            }
            return Ok(());
        }

        self.store_node(&leaf)?;

        if removed_slot == 0 && !leaf.keys.is_empty() {
            // The subtree minimum changed; the ancestor separator that
            // routed here must follow it.
            self.repair_separators(leaf.parent_page_id, leaf.page_id, &leaf.keys[0])?;
        }

        if leaf.is_underfull() {
            self.rebalance(&mut root, leaf.page_id)?;
        }

        Ok(())
    }

    /// Iterate all pairs in key order, from the leftmost leaf.
    pub fn iter(&self) -> Result<IndexIterator<K>, BTreeError> {
        let root = self.root.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(self.buffer_pool.clone()));
        }
        let leaf = self.find_leftmost_leaf(*root)?;
        Ok(IndexIterator::new(self.buffer_pool.clone(), leaf.page_id, 0))
    }

    /// Iterate pairs in key order starting at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<IndexIterator<K>, BTreeError> {
        let root = self.root.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(self.buffer_pool.clone()));
        }
        let leaf = self.find_leaf(*root, key)?;
        let slot = leaf.leaf_lower_bound(key);
        Ok(IndexIterator::new(
            self.buffer_pool.clone(),
            leaf.page_id,
            slot,
        ))
    }

    fn insert_recursive(
        &self,
        page_id: PageId,
        key: K,
        rid: Rid,
    ) -> Result<InsertOutcome<K>, BTreeError> {
        let mut node = self.load_node(page_id)?;

        if node.is_leaf() {
            if !node.leaf_insert(key, rid) {
                return Ok(InsertOutcome::Duplicate);
            }
            if !node.is_overfull() {
                self.store_node(&node)?;
                return Ok(InsertOutcome::Done);
            }

            let mut sibling_guard = self.buffer_pool.new_page_guarded()?;
            let sibling_id = sibling_guard.page_id();
            let sibling = node.split_leaf(sibling_id);
            let separator = sibling.keys[0].clone();
            serialize_node(&sibling, &mut sibling_guard.write())?;
            drop(sibling_guard);
            self.store_node(&node)?;
            debug!(
                "index {}: split leaf {} -> {}",
                self.name, node.page_id, sibling_id
            );
            return Ok(InsertOutcome::Split {
                separator,
                right_id: sibling_id,
            });
        }

        let child_id = node.children[node.child_index_for(&key)];
        match self.insert_recursive(child_id, key, rid)? {
            InsertOutcome::Done => Ok(InsertOutcome::Done),
            InsertOutcome::Duplicate => Ok(InsertOutcome::Duplicate),
            InsertOutcome::Split {
                separator,
                right_id,
            } => {
                // The split sibling inherited this node as its parent when
                // the child copied its own link; only entries moved by a
                // further split below need reparenting.
                node.internal_insert(separator, right_id);
                if !node.is_overfull() {
                    self.store_node(&node)?;
                    return Ok(InsertOutcome::Done);
                }

                let mut sibling_guard = self.buffer_pool.new_page_guarded()?;
                let sibling_id = sibling_guard.page_id();
                let (sibling, promoted) = node.split_internal(sibling_id);
                for &child in &sibling.children {
                    self.set_parent(child, sibling_id)?;
                }
                serialize_node(&sibling, &mut sibling_guard.write())?;
                drop(sibling_guard);
                self.store_node(&node)?;
                debug!(
                    "index {}: split internal {} -> {}",
                    self.name, node.page_id, sibling_id
                );
                Ok(InsertOutcome::Split {
                    separator: promoted,
                    right_id: sibling_id,
                })
            }
        }
    }

    /// Restore occupancy for an underfull non-root node: merge with a
    /// sibling under the same parent when both fit in one node, otherwise
    /// shift a single entry across the boundary. The right sibling is
    /// preferred, then the left.
    fn rebalance(&self, root: &mut PageId, page_id: PageId) -> Result<(), BTreeError> {
        let node = self.load_node(page_id)?;

        if node.parent_page_id == INVALID_PAGE_ID {
            return self.adjust_root(root, node);
        }
        if !node.is_underfull() {
            return Ok(());
        }

        let parent = self.load_node(node.parent_page_id)?;
        let slot = parent.child_slot_of(page_id).ok_or_else(|| {
            BTreeError::CorruptedTree(format!(
                "page {} missing from its parent {}",
                page_id, parent.page_id
            ))
        })?;

        if slot + 1 < parent.children.len() {
            let sibling = self.load_node(parent.children[slot + 1])?;
            if Self::fits_in_one(&node, &sibling) {
                self.merge_nodes(root, node, sibling, parent, slot)
            } else {
                self.redistribute_from_right(node, sibling, parent, slot)
            }
        } else if slot > 0 {
            let sibling = self.load_node(parent.children[slot - 1])?;
            if Self::fits_in_one(&sibling, &node) {
                self.merge_nodes(root, sibling, node, parent, slot - 1)
            } else {
                self.redistribute_from_left(sibling, node, parent, slot)
            }
        } else {
            // Only child of the root; root adjustment owns this case.
            Ok(())
        }
    }

    fn fits_in_one(left: &BTreeNode<K>, right: &BTreeNode<K>) -> bool {
        if left.is_leaf() {
            left.keys.len() + right.keys.len() <= left.max_size
        } else {
            left.children.len() + right.children.len() <= left.max_size
        }
    }

    /// Merge `right` into `left` and drop their separator from the parent,
    /// recursing when the parent itself falls below minimum occupancy.
    /// `sep_slot` is `left`'s position in the parent.
    fn merge_nodes(
        &self,
        root: &mut PageId,
        mut left: BTreeNode<K>,
        right: BTreeNode<K>,
        mut parent: BTreeNode<K>,
        sep_slot: usize,
    ) -> Result<(), BTreeError> {
        debug!(
            "index {}: merging page {} into {}",
            self.name, right.page_id, left.page_id
        );

        let separator = parent.keys.remove(sep_slot);
        parent.children.remove(sep_slot + 1);

        if left.is_leaf() {
            left.keys.extend(right.keys);
            left.values.extend(right.values);
            // The dead leaf drops out of the chain.
            left.next_page_id = right.next_page_id;
        } else {
            left.keys.push(separator);
            left.keys.extend(right.keys);
            for &child in &right.children {
                self.set_parent(child, left.page_id)?;
            }
            left.children.extend(right.children);
        }

        self.store_node(&left)?;
        self.store_node(&parent)?;
        self.buffer_pool.delete_page(right.page_id)?;

        if parent.parent_page_id == INVALID_PAGE_ID {
            self.adjust_root(root, parent)
        } else if parent.is_underfull() {
            self.rebalance(root, parent.page_id)
        } else {
            Ok(())
        }
    }

    /// Borrow the first entry of the right sibling. `slot` is the node's
    /// position in the parent; the separator at `keys[slot]` follows the
    /// sibling's new minimum.
    fn redistribute_from_right(
        &self,
        mut node: BTreeNode<K>,
        mut right: BTreeNode<K>,
        mut parent: BTreeNode<K>,
        slot: usize,
    ) -> Result<(), BTreeError> {
        debug!(
            "index {}: page {} borrowing from right sibling {}",
            self.name, node.page_id, right.page_id
        );

        if node.is_leaf() {
            let key = right.keys.remove(0);
            let value = right.values.remove(0);
            node.keys.push(key);
            node.values.push(value);
            parent.keys[slot] = right.keys[0].clone();
        } else {
            let moved_child = right.children.remove(0);
            let down = std::mem::replace(&mut parent.keys[slot], right.keys.remove(0));
            node.keys.push(down);
            self.set_parent(moved_child, node.page_id)?;
            node.children.push(moved_child);
        }

        self.store_node(&node)?;
        self.store_node(&right)?;
        self.store_node(&parent)
    }

    /// Borrow the last entry of the left sibling. `slot` is the node's
    /// position in the parent; the separator at `keys[slot - 1]` follows
    /// the node's new minimum.
    fn redistribute_from_left(
        &self,
        mut left: BTreeNode<K>,
        mut node: BTreeNode<K>,
        mut parent: BTreeNode<K>,
        slot: usize,
    ) -> Result<(), BTreeError> {
        debug!(
            "index {}: page {} borrowing from left sibling {}",
            self.name, node.page_id, left.page_id
        );

        if node.is_leaf() {
            let key = left
                .keys
                .pop()
                .ok_or_else(|| BTreeError::CorruptedTree("empty redistribution source".into()))?;
            let value = left
                .values
                .pop()
                .ok_or_else(|| BTreeError::CorruptedTree("empty redistribution source".into()))?;
            node.keys.insert(0, key.clone());
            node.values.insert(0, value);
            parent.keys[slot - 1] = key;
        } else {
            let moved_child = left
                .children
                .pop()
                .ok_or_else(|| BTreeError::CorruptedTree("empty redistribution source".into()))?;
            let up = left
                .keys
                .pop()
                .ok_or_else(|| BTreeError::CorruptedTree("empty redistribution source".into()))?;
            let down = std::mem::replace(&mut parent.keys[slot - 1], up);
            node.keys.insert(0, down);
            self.set_parent(moved_child, node.page_id)?;
            node.children.insert(0, moved_child);
        }

        self.store_node(&left)?;
        self.store_node(&node)?;
        self.store_node(&parent)
    }

    /// Collapse an internal root left with a single child; that child
    /// becomes the new root.
    fn adjust_root(&self, root: &mut PageId, node: BTreeNode<K>) -> Result<(), BTreeError> {
        if !node.is_leaf() && node.children.len() == 1 {
            let child_id = node.children[0];
            self.set_parent(child_id, INVALID_PAGE_ID)?;
            self.buffer_pool.delete_page(node.page_id)?;
            *root = child_id;
            self.persist_root(child_id)?;
            debug!("index {}: root collapsed to page {}", self.name, child_id);
        }
        Ok(())
    }

    /// Walk up from `child_id` until a separator routes into this subtree,
    /// then point it at the subtree's new minimum. A chain of leftmost
    /// children has no such separator.
    fn repair_separators(
        &self,
        mut parent_id: PageId,
        mut child_id: PageId,
        new_min: &K,
    ) -> Result<(), BTreeError> {
        while parent_id != INVALID_PAGE_ID {
            let mut parent = self.load_node(parent_id)?;
            let slot = parent.child_slot_of(child_id).ok_or_else(|| {
                BTreeError::CorruptedTree(format!(
                    "page {} missing from its parent {}",
                    child_id, parent_id
                ))
            })?;
            if slot > 0 {
                parent.keys[slot - 1] = new_min.clone();
                self.store_node(&parent)?;
                return Ok(());
            }
            child_id = parent_id;
            parent_id = parent.parent_page_id;
        }
        Ok(())
    }

    fn find_leaf(&self, mut page_id: PageId, key: &K) -> Result<BTreeNode<K>, BTreeError> {
        loop {
            let node = self.load_node(page_id)?;
            if node.is_leaf() {
                return Ok(node);
            }
            page_id = node.children[node.child_index_for(key)];
        }
    }

    fn find_leftmost_leaf(&self, mut page_id: PageId) -> Result<BTreeNode<K>, BTreeError> {
        loop {
            let node = self.load_node(page_id)?;
            if node.is_leaf() {
                return Ok(node);
            }
            page_id = node.children[0];
        }
    }

    fn load_node(&self, page_id: PageId) -> Result<BTreeNode<K>, BTreeError> {
        let guard = self.buffer_pool.fetch_page_guarded(page_id)?;
        let node = deserialize_node(&guard.read())?;
        Ok(node)
    }

    fn store_node(&self, node: &BTreeNode<K>) -> Result<(), BTreeError> {
        let mut guard = self.buffer_pool.fetch_page_guarded(node.page_id)?;
        serialize_node(node, &mut guard.write())?;
        Ok(())
    }

    fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<(), BTreeError> {
        let mut node = self.load_node(page_id)?;
        node.parent_page_id = parent_page_id;
        self.store_node(&node)
    }

    /// Record the current root under this index's name on the header page.
    fn persist_root(&self, root: PageId) -> Result<(), BTreeError> {
        let mut guard = self.buffer_pool.fetch_page_guarded(HEADER_PAGE_ID)?;
        let mut records = header::load_records(&guard.read())?;
        header::upsert_root(&mut records, &self.name, root);
        header::store_records(&mut guard.write(), &records)?;
        Ok(())
    }
}
