use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over leaf pairs in key order.
///
/// Holds the buffer pool, the current leaf page id and the slot within it;
/// a leaf is pinned only while its image is copied out, and advancing past
/// its last slot follows `next_page_id`. Exhaustion is the
/// `(INVALID_PAGE_ID, 0)` sentinel.
pub struct IndexIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    slot: usize,
    current: Option<BTreeNode<K>>,
}

impl<K> IndexIterator<K>
where
    K: Clone + Ord + DeserializeOwned,
{
    pub(crate) fn new(buffer_pool: Arc<BufferPoolManager>, page_id: PageId, slot: usize) -> Self {
        Self {
            buffer_pool,
            page_id,
            slot,
            current: None,
        }
    }

    pub(crate) fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::new(buffer_pool, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    fn load_current(&mut self) -> Result<(), BTreeError> {
        if self.current.is_none() {
            let guard = self.buffer_pool.fetch_page_guarded(self.page_id)?;
            let node = deserialize_node::<K>(&guard.read())?;
            self.current = Some(node);
        }
        Ok(())
    }
}

impl<K> Iterator for IndexIterator<K>
where
    K: Clone + Ord + DeserializeOwned,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }
            if let Err(err) = self.load_current() {
                self.page_id = INVALID_PAGE_ID;
                self.current = None;
                return Some(Err(err));
            }
            let node = self.current.as_ref().expect("current leaf is loaded");

            if self.slot < node.keys.len() {
                let item = (node.keys[self.slot].clone(), node.values[self.slot]);
                self.slot += 1;
                return Some(Ok(item));
            }

            self.page_id = node.next_page_id;
            self.slot = 0;
            self.current = None;
        }
    }
}
