use anyhow::Result;

use marlindb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, page) = buffer_pool.new_page()?;

    // Page 0 is reserved for the header page
    assert!(page_id > 0);

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, _) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    // Pool of three frames with k = 2
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page_id, page) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true)?;

    // Fill and pin every other frame so the dirty page is forced out
    let mut pinned = Vec::new();
    for _ in 0..3 {
        let (id, _) = buffer_pool.new_page()?;
        pinned.push(id);
    }

    // Everything is pinned now, so a reload cannot find a frame
    assert!(matches!(
        buffer_pool.fetch_page(page_id),
        Err(BufferPoolError::BufferPoolFull)
    ));

    buffer_pool.unpin_page(pinned[0], false)?;

    // The reload must observe the bytes written before eviction
    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        let test_data = b"Test Data";
        assert_eq!(&page_guard.data[100..100 + test_data.len()], test_data);
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_eviction_picks_the_unpinned_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (p0, _) = buffer_pool.new_page()?;
    let (_p1, _) = buffer_pool.new_page()?;
    let (_p2, _) = buffer_pool.new_page()?;

    buffer_pool.unpin_page(p0, false)?;

    // p0 is the only evictable frame, so a fourth page must land in its frame
    let (p3, _) = buffer_pool.new_page()?;
    assert!(p3 > p0);

    // p0 was evicted; everything else is pinned
    assert!(matches!(
        buffer_pool.fetch_page(p0),
        Err(BufferPoolError::BufferPoolFull)
    ));

    buffer_pool.unpin_page(p3, false)?;
    let reloaded = buffer_pool.fetch_page(p0)?;
    assert_eq!(reloaded.read().page_id, p0);
    buffer_pool.unpin_page(p0, false)?;

    Ok(())
}

#[test]
fn test_new_page_fails_when_all_pinned() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    for _ in 0..3 {
        buffer_pool.new_page()?;
    }

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    Ok(())
}

#[test]
fn test_unpin_semantics() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, _) = buffer_pool.new_page()?;

    buffer_pool.unpin_page(page_id, false)?;

    // A second unpin finds the pin count already at zero
    assert!(matches!(
        buffer_pool.unpin_page(page_id, false),
        Err(BufferPoolError::NotPinned(_))
    ));

    // Unpinning a page the pool has never seen is a protocol error
    assert!(matches!(
        buffer_pool.unpin_page(9999, false),
        Err(BufferPoolError::PageNotFound(_))
    ));

    Ok(())
}

#[test]
fn test_dirty_flag_is_sticky() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page_id, page) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0xAB;
    }
    // Two pins; the clean unpin must not erase the dirty mark
    let _second = buffer_pool.fetch_page(page_id)?;
    buffer_pool.unpin_page(page_id, true)?;
    buffer_pool.unpin_page(page_id, false)?;

    // Keep the new pages pinned so the third allocation must evict the
    // dirty page, writing it back
    let (n1, _) = buffer_pool.new_page()?;
    let (_n2, _) = buffer_pool.new_page()?;
    let (_n3, _) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(n1, false)?;

    let fetched = buffer_pool.fetch_page(page_id)?;
    assert_eq!(fetched.read().data[0], 0xAB);
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page_id, page) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data For Flushing";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true)?;

    buffer_pool.flush_page(page_id)?;

    // Flushing a page the pool does not hold reports the miss
    assert!(matches!(
        buffer_pool.flush_page(9999),
        Err(BufferPoolError::PageNotFound(_))
    ));

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        let test_data = b"Test Data For Flushing";
        assert_eq!(&page_guard.data[100..100 + test_data.len()], test_data);
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5 {
        let (page_id, page) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            let test_data = format!("Test Data {}", i).into_bytes();
            page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
        }
        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched_page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = fetched_page.read();
            let expected_data = format!("Test Data {}", i).into_bytes();
            assert_eq!(
                &page_guard.data[100..100 + expected_data.len()],
                expected_data.as_slice()
            );
        }
        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page_id, _) = buffer_pool.new_page()?;

    // Deleting while pinned is refused
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;

    // A page the pool no longer holds deletes trivially
    buffer_pool.delete_page(page_id)?;

    // The freed frame is reusable even with the other frames pinned
    let (_a, _) = buffer_pool.new_page()?;
    let (_b, _) = buffer_pool.new_page()?;
    let (_c, _) = buffer_pool.new_page()?;
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    Ok(())
}

#[test]
fn test_page_guard_unpins_on_drop() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let page_id = {
        let mut guard = buffer_pool.new_page_guarded()?;
        let id = guard.page_id();
        guard.write().data[0] = 0x5A;
        id
    };

    // The guard released its pin, so the page can be deleted outright
    buffer_pool.delete_page(page_id)?;

    // And the dirty flag it recorded reached the disk before deletion
    let guard = buffer_pool.fetch_page_guarded(page_id)?;
    assert_eq!(guard.read().data[0], 0x5A);

    Ok(())
}
