use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, PageId, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeType};

// Header layout:
// - node_type: u8 (1 = leaf, 2 = internal)
// - parent_page_id: i32
// - next_page_id: i32 (leaf chain; INVALID_PAGE_ID for internal nodes)
// - key_count: u16
// - max_size: u16
const HEADER_SIZE: usize = 13;

const NODE_TYPE_LEAF: u8 = 1;
const NODE_TYPE_INTERNAL: u8 = 2;

/// Serialize a node into its page. Keys are length-prefixed bincode; leaf
/// values and child pointers follow the key area as fixed-width words.
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize,
{
    page.data.fill(0);

    page.data[0] = match node.node_type {
        NodeType::Leaf => NODE_TYPE_LEAF,
        NodeType::Internal => NODE_TYPE_INTERNAL,
    };
    LittleEndian::write_i32(&mut page.data[1..5], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[5..9], node.next_page_id);
    LittleEndian::write_u16(&mut page.data[9..11], node.keys.len() as u16);
    LittleEndian::write_u16(&mut page.data[11..13], node.max_size as u16);

    let mut offset = HEADER_SIZE;
    for key in &node.keys {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        page.data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
    }

    match node.node_type {
        NodeType::Leaf => {
            for value in &node.values {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], value.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], value.slot);
                offset += 8;
            }
        }
        NodeType::Internal => {
            for child in &node.children {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }

    Ok(())
}

/// Deserialize the node stored in a page. The node's own id comes from the
/// page identity; everything else lives in the page bytes.
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Clone + Ord,
{
    let node_type = match page.data[0] {
        NODE_TYPE_LEAF => NodeType::Leaf,
        NODE_TYPE_INTERNAL => NodeType::Internal,
        _ => return Err(BTreeError::InvalidPageFormat),
    };
    let parent_page_id = LittleEndian::read_i32(&page.data[1..5]);
    let next_page_id = LittleEndian::read_i32(&page.data[5..9]);
    let key_count = LittleEndian::read_u16(&page.data[9..11]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[11..13]) as usize;

    let mut offset = HEADER_SIZE;
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        if offset + 2 > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + key_len > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key = bincode::deserialize(&page.data[offset..offset + key_len])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        keys.push(key);
        offset += key_len;
    }

    let mut node = match node_type {
        NodeType::Leaf => {
            let mut values = Vec::with_capacity(key_count);
            for _ in 0..key_count {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                let rid_page = LittleEndian::read_i32(&page.data[offset..offset + 4]);
                let rid_slot = LittleEndian::read_u32(&page.data[offset + 4..offset + 8]);
                values.push(Rid::new(rid_page, rid_slot));
                offset += 8;
            }
            let mut node = BTreeNode::new_leaf(page.page_id, parent_page_id, max_size);
            node.values = values;
            node.next_page_id = next_page_id;
            node
        }
        NodeType::Internal => {
            let mut children: Vec<PageId> = Vec::with_capacity(key_count + 1);
            for _ in 0..key_count + 1 {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                children.push(LittleEndian::read_i32(&page.data[offset..offset + 4]));
                offset += 4;
            }
            let mut node = BTreeNode::new_internal(page.page_id, parent_page_id, max_size);
            node.children = children;
            node
        }
    };
    node.keys = keys;

    Ok(node)
}
