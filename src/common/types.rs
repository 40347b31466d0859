use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = i32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Well-known page holding the index-name -> root-page-id directory
pub const HEADER_PAGE_ID: PageId = 0;

/// Record ID: the location of a tuple, stored as B+Tree leaf values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure: a fixed-size byte buffer plus its stable identity.
/// The surrounding `RwLock` is the per-page latch.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the byte buffer. Identity is left to the caller.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure. The frame slot never moves; only the
/// identity of the page occupying it changes on eviction/admission.
#[derive(Debug)]
pub struct Frame {
    pub frame_id: FrameId,
    pub page: PagePtr,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            frame_id,
            page,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
