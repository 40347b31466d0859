use log::warn;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

/// RAII handle over a pinned page: dropping the guard unpins it, passing
/// along whether the holder dirtied the page. Acquiring page bytes through
/// `write` marks the guard dirty; `read` does not.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page: PagePtr,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page_id: PageId, page: PagePtr) -> Self {
        Self {
            bpm,
            page,
            page_id,
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Take the page latch for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Take the page latch for writing; the page will be unpinned dirty.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.dirty = true;
        self.page.write()
    }

    /// Mark the page dirty without taking the latch.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.bpm.unpin_page(self.page_id, self.dirty) {
            warn!("failed to unpin page {}: {}", self.page_id, err);
        }
    }
}
