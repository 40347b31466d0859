// Export public modules
pub mod common;
pub mod storage;
pub mod index;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::ExtendibleHashTable;
pub use storage::buffer::LruKReplacer;
pub use storage::buffer::PageGuard;
pub use storage::disk::DiskManager;
pub use index::btree::BTreeIndex;
