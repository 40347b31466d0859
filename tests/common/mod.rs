use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use marlindb::storage::buffer::BufferPoolManager;
use marlindb::storage::disk::DiskManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    create_test_buffer_pool_with_k(pool_size, 2)
}

// Create a buffer pool manager with an explicit LRU-K depth
#[allow(dead_code)]
pub fn create_test_buffer_pool_with_k(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, disk_manager));
    Ok((buffer_pool, file))
}
