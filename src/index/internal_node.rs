//! §3/§4.6 B+Tree internal node — `n` (key, child_page_id) pairs; the
//! key at index 0 is a placeholder (its child covers everything less
//! than `entries[1].key`).

use crate::common::{Lsn, PageId, PAGE_SIZE};
use crate::types::TypeId;

use super::generic_key::GenericKey;
use super::node::{NodeType, SharedHeader, HEADER_LEN};

const ENTRY_LEN: usize = 12; // 8-byte key + 4-byte child page id

/// The number of entries a page can physically hold — a hard ceiling,
/// not the configured fan-out (see `resolve_fan_out`).
pub fn max_entries() -> u32 {
    ((PAGE_SIZE - HEADER_LEN) / ENTRY_LEN) as u32
}

/// Default fan-out for a freshly created index, absent an explicit
/// value from the caller.
pub const DEFAULT_FAN_OUT: u32 = 128;

/// Clamps a requested fan-out to what one page can physically hold.
pub fn resolve_fan_out(requested: u32) -> u32 {
    requested.clamp(1, max_entries())
}

pub struct InternalNode {
    pub page_id: PageId,
    header: SharedHeader,
    entries: Vec<(GenericKey, PageId)>,
    key_type: TypeId,
}

impl InternalNode {
    /// `max_size` is the node's fan-out, already resolved by the caller
    /// (see `resolve_fan_out`) — a split's new sibling inherits the same
    /// configured value as its parent rather than recomputing it.
    pub fn new(page_id: PageId, key_type: TypeId, max_size: u32) -> Self {
        Self {
            page_id,
            header: SharedHeader::new(NodeType::Internal, max_size, page_id),
            entries: Vec::new(),
            key_type,
        }
    }

    pub fn from_bytes(page_id: PageId, buf: [u8; PAGE_SIZE], key_type: TypeId) -> Self {
        let header = SharedHeader::read(&buf);
        let mut entries = Vec::with_capacity(header.size as usize);
        for i in 0..header.size as usize {
            let off = HEADER_LEN + i * ENTRY_LEN;
            let key = GenericKey::from_bytes(buf[off..off + 8].try_into().unwrap());
            let child = i32::from_le_bytes(buf[off + 8..off + 12].try_into().unwrap());
            entries.push((key, child));
        }
        Self {
            page_id,
            header,
            entries,
            key_type,
        }
    }

    pub fn as_bytes(&self) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        let header = SharedHeader {
            node_type: NodeType::Internal,
            size: self.entries.len() as u32,
            max_size: self.header.max_size,
            parent_page_id: self.header.parent_page_id,
            self_page_id: self.page_id,
            page_lsn: self.header.page_lsn,
        };
        header.write(&mut buf);
        for (i, (key, child)) in self.entries.iter().enumerate() {
            let off = HEADER_LEN + i * ENTRY_LEN;
            buf[off..off + 8].copy_from_slice(&key.as_bytes());
            buf[off + 8..off + 12].copy_from_slice(&child.to_le_bytes());
        }
        buf
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() as u32 >= self.header.max_size
    }

    pub fn parent_page_id(&self) -> PageId {
        self.header.parent_page_id
    }

    pub fn set_parent_page_id(&mut self, id: PageId) {
        self.header.parent_page_id = id;
    }

    pub fn page_lsn(&self) -> Lsn {
        self.header.page_lsn
    }

    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        self.header.page_lsn = lsn;
    }

    /// Seeds a fresh root (or first node) with a single placeholder key
    /// pointing at `only_child`.
    pub fn init_single_child(&mut self, only_child: PageId) {
        self.entries.clear();
        self.entries.push((GenericKey::ZERO, only_child));
    }

    /// The child responsible for `key`: the last entry whose key is
    /// `<= key` (entry 0's key is the placeholder and always compares
    /// as the smallest).
    pub fn child_for(&self, key: &GenericKey) -> PageId {
        let mut chosen = self.entries[0].1;
        for (i, (k, child)) in self.entries.iter().enumerate() {
            if i == 0 {
                continue;
            }
            if k.compare(key, self.key_type) != std::cmp::Ordering::Greater {
                chosen = *child;
            } else {
                break;
            }
        }
        chosen
    }

    /// Inserts a freshly split-off child in sorted order.
    pub fn insert_entry(&mut self, key: GenericKey, child_page_id: PageId) {
        let pos = self
            .entries
            .iter()
            .position(|(k, _)| k.compare(&key, self.key_type) == std::cmp::Ordering::Greater)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (key, child_page_id));
    }

    pub fn children(&self) -> impl Iterator<Item = PageId> + '_ {
        self.entries.iter().map(|(_, c)| *c)
    }

    /// Splits in half; returns the new right-hand sibling and the key
    /// that should be pushed up to the parent (the first key of the
    /// right sibling, which becomes its placeholder there too).
    pub fn split(&mut self, new_page_id: PageId) -> (InternalNode, GenericKey) {
        let mid = self.entries.len() / 2;
        let right_entries = self.entries.split_off(mid);
        let split_key = right_entries[0].0;
        let mut right = InternalNode::new(new_page_id, self.key_type, self.header.max_size);
        right.entries = right_entries;
        right.header.parent_page_id = self.header.parent_page_id;
        (right, split_key)
    }
}
