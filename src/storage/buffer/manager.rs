use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::PageGuard;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Bucket size of the extendible hash directory backing the page table.
const PAGE_TABLE_BUCKET_SIZE: usize = 4;

/// Owns the frame array, free list, page table, replacer and the disk
/// manager handle, and enforces the pin/unpin discipline.
///
/// A single pool-wide mutex (the one owning the free list) is held across
/// every operation; the page table and replacer are internally synchronized
/// and only called under it. Per-frame latches protect page bytes and
/// pin/dirty metadata. Lock order is pool latch, then frame latch, never
/// the reverse.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    /// The pool-wide latch; owns the free list.
    latch: Mutex<VecDeque<FrameId>>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let page = Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(parking_lot::RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            latch: Mutex::new(free_list),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it into a frame. Fails with
    /// `BufferPoolFull` only when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut free_list = self.latch.lock();

        let frame_id = self.acquire_frame(&mut free_list)?;
        let page_id = self.disk_manager.allocate_page()?;

        let frame = &self.frames[frame_id as usize];
        let page_ptr = {
            let mut frame_guard = frame.write();
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            {
                let mut page_guard = frame_guard.page.write();
                page_guard.reset();
                page_guard.page_id = page_id;
            }
            frame_guard.page.clone()
        };

        self.install(page_id, frame_id);
        Ok((page_id, page_ptr))
    }

    /// Fetch a page, reading it from disk on a miss. Fails with
    /// `BufferPoolFull` when the page is not resident and every frame is
    /// pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut free_list = self.latch.lock();

        if let Some(frame_id) = self.page_table.get(&page_id) {
            let frame = &self.frames[frame_id as usize];
            let page_ptr = {
                let mut frame_guard = frame.write();
                frame_guard.pin_count += 1;
                frame_guard.page.clone()
            };
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(page_ptr);
        }

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &self.frames[frame_id as usize];
        let page_ptr = {
            let mut frame_guard = frame.write();
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            {
                let mut page_guard = frame_guard.page.write();
                self.disk_manager.read_page(page_id, &mut page_guard)?;
            }
            frame_guard.page.clone()
        };

        self.install(page_id, frame_id);
        Ok(page_ptr)
    }

    /// Drop one pin from a page, ORing in the dirty flag. The frame becomes
    /// evictable when its pin count reaches zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let _free_list = self.latch.lock();

        let Some(frame_id) = self.page_table.get(&page_id) else {
            return Err(BufferPoolError::PageNotFound(page_id));
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();

        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::NotPinned(page_id));
        }

        if is_dirty {
            frame_guard.is_dirty = true;
        }
        frame_guard.pin_count -= 1;

        if frame_guard.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Write a resident page through to disk, dirty or not, and clear its
    /// dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let _free_list = self.latch.lock();

        let Some(frame_id) = self.page_table.get(&page_id) else {
            return Err(BufferPoolError::PageNotFound(page_id));
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        self.disk_manager.write_page(&frame_guard.page.read())?;
        frame_guard.is_dirty = false;

        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let _free_list = self.latch.lock();

        for frame in &self.frames {
            let mut frame_guard = frame.write();
            if frame_guard.page.read().page_id == INVALID_PAGE_ID {
                continue;
            }
            self.disk_manager.write_page(&frame_guard.page.read())?;
            frame_guard.is_dirty = false;
        }

        Ok(())
    }

    /// Remove a page from the pool and return its frame to the free list.
    /// A non-resident page is trivially deleted; a pinned page fails with
    /// `PagePinned`. Dirty contents are flushed before the frame is reset.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut free_list = self.latch.lock();

        let Some(frame_id) = self.page_table.get(&page_id) else {
            return Ok(());
        };

        let frame = &self.frames[frame_id as usize];
        {
            let mut frame_guard = frame.write();

            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }

            if frame_guard.is_dirty {
                self.disk_manager.write_page(&frame_guard.page.read())?;
                frame_guard.is_dirty = false;
            }

            let mut page_guard = frame_guard.page.write();
            page_guard.reset();
            page_guard.page_id = INVALID_PAGE_ID;
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        free_list.push_back(frame_id);

        Ok(())
    }

    /// Fetch a page behind an RAII guard that unpins on drop.
    pub fn fetch_page_guarded(&self, page_id: PageId) -> Result<PageGuard<'_>, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(PageGuard::new(self, page_id, page))
    }

    /// Allocate a fresh page behind an RAII guard that unpins on drop.
    pub fn new_page_guarded(&self) -> Result<PageGuard<'_>, BufferPoolError> {
        let (page_id, page) = self.new_page()?;
        Ok(PageGuard::new(self, page_id, page))
    }

    /// Pop a free frame, or evict the replacer's victim after writing back
    /// its dirty contents.
    fn acquire_frame(
        &self,
        free_list: &mut VecDeque<FrameId>,
    ) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(victim_id) = self.replacer.evict() else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let frame = &self.frames[victim_id as usize];
        let mut frame_guard = frame.write();
        let old_page_id = frame_guard.page.read().page_id;
        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
            if frame_guard.is_dirty {
                debug!("writing back dirty page {} from frame {}", old_page_id, victim_id);
                self.disk_manager.write_page(&frame_guard.page.read())?;
                frame_guard.is_dirty = false;
            }
        }

        Ok(victim_id)
    }

    fn install(&self, page_id: PageId, frame_id: FrameId) {
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
    }
}
