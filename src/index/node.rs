//! §3 B+Tree Nodes — the 24-byte shared header prose, extended to 32
//! bytes so the page-LSN lands at the same byte offset every other page
//! kind uses (see DESIGN.md). Internal and leaf nodes both start with
//! this header; leaves append one more `next_page_id` field before
//! their entries.

use crate::common::{Lsn, PageId, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};

pub const HEADER_LEN: usize = 32;

const TYPE_OFF: usize = 0;
const SIZE_OFF: usize = 4;
const MAX_SIZE_OFF: usize = 8;
const PARENT_OFF: usize = 12;
const SELF_OFF: usize = 16;
const PAGE_LSN_OFF: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
}

impl NodeType {
    fn tag(self) -> u8 {
        match self {
            NodeType::Internal => 0,
            NodeType::Leaf => 1,
        }
    }

    fn from_tag(tag: u8) -> Self {
        if tag == 1 {
            NodeType::Leaf
        } else {
            NodeType::Internal
        }
    }
}

pub struct SharedHeader {
    pub node_type: NodeType,
    pub size: u32,
    pub max_size: u32,
    pub parent_page_id: PageId,
    pub self_page_id: PageId,
    pub page_lsn: Lsn,
}

impl SharedHeader {
    pub fn new(node_type: NodeType, max_size: u32, self_page_id: PageId) -> Self {
        Self {
            node_type,
            size: 0,
            max_size,
            parent_page_id: INVALID_PAGE_ID,
            self_page_id,
            page_lsn: INVALID_LSN,
        }
    }

    pub fn write(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf[TYPE_OFF] = self.node_type.tag();
        buf[SIZE_OFF..SIZE_OFF + 4].copy_from_slice(&self.size.to_le_bytes());
        buf[MAX_SIZE_OFF..MAX_SIZE_OFF + 4].copy_from_slice(&self.max_size.to_le_bytes());
        buf[PARENT_OFF..PARENT_OFF + 4].copy_from_slice(&self.parent_page_id.to_le_bytes());
        buf[SELF_OFF..SELF_OFF + 4].copy_from_slice(&self.self_page_id.to_le_bytes());
        buf[PAGE_LSN_OFF..PAGE_LSN_OFF + 8].copy_from_slice(&self.page_lsn.to_le_bytes());
    }

    pub fn read(buf: &[u8; PAGE_SIZE]) -> Self {
        Self {
            node_type: NodeType::from_tag(buf[TYPE_OFF]),
            size: u32::from_le_bytes(buf[SIZE_OFF..SIZE_OFF + 4].try_into().unwrap()),
            max_size: u32::from_le_bytes(buf[MAX_SIZE_OFF..MAX_SIZE_OFF + 4].try_into().unwrap()),
            parent_page_id: i32::from_le_bytes(buf[PARENT_OFF..PARENT_OFF + 4].try_into().unwrap()),
            self_page_id: i32::from_le_bytes(buf[SELF_OFF..SELF_OFF + 4].try_into().unwrap()),
            page_lsn: u64::from_le_bytes(buf[PAGE_LSN_OFF..PAGE_LSN_OFF + 8].try_into().unwrap()),
        }
    }
}

pub fn peek_node_type(buf: &[u8; PAGE_SIZE]) -> NodeType {
    NodeType::from_tag(buf[TYPE_OFF])
}
