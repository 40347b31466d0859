use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: page-granular reads
/// and writes against a single database file, plus page-id allocation.
///
/// Page ids map directly to file offsets (`page_id * PAGE_SIZE`). Page 0 is
/// reserved for the header page and is never handed out by `allocate_page`;
/// ids are monotonic and never reused within a session.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
}

impl DiskManager {
    /// Open (or create) the database file at the given path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let file_size = file.metadata()?.len();
        let existing_pages = (file_size as usize).div_ceil(PAGE_SIZE) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicI32::new(existing_pages.max(1)),
        })
    }

    /// Read a page from disk into the given buffer. Reading a page that was
    /// never written yields a zeroed buffer (fresh pages and the virgin
    /// header page both rely on this).
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        page.data.fill(0);
        page.page_id = page_id;

        if offset >= file_size {
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = (file_size - offset).min(PAGE_SIZE as u64) as usize;
        file.read_exact(&mut page.data[..available])?;

        Ok(())
    }

    /// Write a page to disk, extending the file as needed.
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = Self::page_offset(page.page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page ID. Pages materialize on first write; a read of
    /// an allocated-but-unwritten page returns zeros.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}
