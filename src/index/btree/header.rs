//! Root directory stored on the header page.
//!
//! Page id 0 persists the map from index name to root page id, encoded as
//! a bincode record list. A freshly zeroed header page decodes as the
//! empty list, so no explicit initialization pass is needed.

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;

pub type RootRecords = Vec<(String, PageId)>;

/// Decode the record list held by the header page.
pub fn load_records(page: &Page) -> Result<RootRecords, BTreeError> {
    bincode::deserialize(&page.data)
        .map_err(|e| BTreeError::DeserializationError(e.to_string()))
}

/// Encode the record list back into the header page.
pub fn store_records(page: &mut Page, records: &RootRecords) -> Result<(), BTreeError> {
    let bytes =
        bincode::serialize(records).map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    if bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    page.data.fill(0);
    page.data[..bytes.len()].copy_from_slice(&bytes);
    Ok(())
}

/// Look up the root recorded under `name`.
pub fn find_root(records: &RootRecords, name: &str) -> Option<PageId> {
    records
        .iter()
        .find(|(n, _)| n == name)
        .map(|&(_, root)| root)
}

/// Insert or update the record for `name`.
pub fn upsert_root(records: &mut RootRecords, name: &str, root: PageId) {
    match records.iter_mut().find(|(n, _)| n == name) {
        Some(record) => record.1 = root,
        None => records.push((name.to_string(), root)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_page_is_empty_directory() {
        let page = Page::new(0);
        let records = load_records(&page).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_record_round_trip() {
        let mut page = Page::new(0);
        let mut records = RootRecords::new();
        upsert_root(&mut records, "orders_pk", 17);
        upsert_root(&mut records, "users_pk", 31);
        store_records(&mut page, &records).unwrap();

        let restored = load_records(&page).unwrap();
        assert_eq!(find_root(&restored, "orders_pk"), Some(17));
        assert_eq!(find_root(&restored, "users_pk"), Some(31));
        assert_eq!(find_root(&restored, "missing"), None);
    }

    #[test]
    fn test_upsert_overwrites() {
        let mut records = RootRecords::new();
        upsert_root(&mut records, "orders_pk", 17);
        upsert_root(&mut records, "orders_pk", 23);
        assert_eq!(records.len(), 1);
        assert_eq!(find_root(&records, "orders_pk"), Some(23));
    }
}
