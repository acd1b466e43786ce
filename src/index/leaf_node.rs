//! §3/§4.6 B+Tree leaf node — `n` (key, RID) pairs plus `next_page_id`
//! for in-order scans. Keys within a node are kept sorted.

use std::cmp::Ordering;

use crate::common::{Lsn, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::types::TypeId;

use super::generic_key::GenericKey;
use super::node::{NodeType, SharedHeader, HEADER_LEN};

const NEXT_OFF: usize = HEADER_LEN; // 4 bytes
const ENTRIES_OFF: usize = HEADER_LEN + 4;
const ENTRY_LEN: usize = 16; // 8-byte key + 4-byte page id + 4-byte slot

/// The number of entries a page can physically hold — a hard ceiling,
/// not the configured fan-out (see `resolve_fan_out`).
pub fn max_entries() -> u32 {
    ((PAGE_SIZE - ENTRIES_OFF) / ENTRY_LEN) as u32
}

/// Default fan-out for a freshly created index, absent an explicit
/// value from the caller.
pub const DEFAULT_FAN_OUT: u32 = 128;

/// Clamps a requested fan-out to what one page can physically hold.
pub fn resolve_fan_out(requested: u32) -> u32 {
    requested.clamp(1, max_entries())
}

pub struct LeafNode {
    pub page_id: PageId,
    header: SharedHeader,
    next_page_id: PageId,
    entries: Vec<(GenericKey, Rid)>,
    key_type: TypeId,
}

impl LeafNode {
    /// `max_size` is the node's fan-out, already resolved by the caller
    /// (see `resolve_fan_out`) — not recomputed here, so a split's new
    /// sibling can inherit the same configured value as its parent.
    pub fn new(page_id: PageId, key_type: TypeId, max_size: u32) -> Self {
        Self {
            page_id,
            header: SharedHeader::new(NodeType::Leaf, max_size, page_id),
            next_page_id: INVALID_PAGE_ID,
            entries: Vec::new(),
            key_type,
        }
    }

    pub fn from_bytes(page_id: PageId, buf: [u8; PAGE_SIZE], key_type: TypeId) -> Self {
        let header = SharedHeader::read(&buf);
        let next_page_id =
            i32::from_le_bytes(buf[NEXT_OFF..NEXT_OFF + 4].try_into().unwrap());
        let mut entries = Vec::with_capacity(header.size as usize);
        for i in 0..header.size as usize {
            let off = ENTRIES_OFF + i * ENTRY_LEN;
            let key = GenericKey::from_bytes(buf[off..off + 8].try_into().unwrap());
            let rid_page = i32::from_le_bytes(buf[off + 8..off + 12].try_into().unwrap());
            let rid_slot = u32::from_le_bytes(buf[off + 12..off + 16].try_into().unwrap());
            entries.push((key, Rid::new(rid_page, rid_slot)));
        }
        Self {
            page_id,
            header,
            next_page_id,
            entries,
            key_type,
        }
    }

    pub fn as_bytes(&self) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        let header = SharedHeader {
            node_type: NodeType::Leaf,
            size: self.entries.len() as u32,
            max_size: self.header.max_size,
            parent_page_id: self.header.parent_page_id,
            self_page_id: self.page_id,
            page_lsn: self.header.page_lsn,
        };
        header.write(&mut buf);
        buf[NEXT_OFF..NEXT_OFF + 4].copy_from_slice(&self.next_page_id.to_le_bytes());
        for (i, (key, rid)) in self.entries.iter().enumerate() {
            let off = ENTRIES_OFF + i * ENTRY_LEN;
            buf[off..off + 8].copy_from_slice(&key.as_bytes());
            buf[off + 8..off + 12].copy_from_slice(&rid.page_id.to_le_bytes());
            buf[off + 12..off + 16].copy_from_slice(&rid.slot.to_le_bytes());
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

    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    pub fn set_next_page_id(&mut self, id: PageId) {
        self.next_page_id = id;
    }

    pub fn page_lsn(&self) -> Lsn {
        self.header.page_lsn
    }

    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        self.header.page_lsn = lsn;
    }

    /// Every RID stored under `key`, in insertion order. Equal keys are
    /// permitted — a secondary index over a non-unique column chains
    /// one entry per RID rather than rejecting the second insert.
    pub fn find_all(&self, key: &GenericKey) -> Vec<Rid> {
        self.entries
            .iter()
            .filter(|(k, _)| k.compare(key, self.key_type) == Ordering::Equal)
            .map(|(_, rid)| *rid)
            .collect()
    }

    pub fn entries(&self) -> &[(GenericKey, Rid)] {
        &self.entries
    }

    pub fn first_key(&self) -> Option<GenericKey> {
        self.entries.first().map(|(k, _)| *k)
    }

    /// Inserts in sorted-by-key position. A duplicate key is not
    /// rejected: it is inserted immediately after the existing run of
    /// equal keys, so `find_all` returns every RID ever inserted under
    /// that key. Enforcing uniqueness for a primary-key/unique column,
    /// where wanted, is not this node's concern.
    pub fn insert(&mut self, key: GenericKey, rid: Rid) {
        let pos = self
            .entries
            .iter()
            .position(|(k, _)| k.compare(&key, self.key_type) == Ordering::Greater)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (key, rid));
    }

    /// Removes exactly the `(key, rid)` pair — not every entry under
    /// `key` — since duplicate keys may belong to other, still-live
    /// rows.
    pub fn delete(&mut self, key: &GenericKey, rid: Rid) -> bool {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|(k, r)| k.compare(key, self.key_type) == Ordering::Equal && *r == rid)
        {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Splits the upper half off into a new right sibling, linked via
    /// `next_page_id`. Returns the sibling and its first key, which the
    /// caller pushes into the parent as the new separator.
    pub fn split(&mut self, new_page_id: PageId) -> (LeafNode, GenericKey) {
        let mid = self.entries.len() / 2;
        let right_entries = self.entries.split_off(mid);
        let split_key = right_entries[0].0;
        let mut right = LeafNode::new(new_page_id, self.key_type, self.header.max_size);
        right.entries = right_entries;
        right.header.parent_page_id = self.header.parent_page_id;
        right.next_page_id = self.next_page_id;
        self.next_page_id = new_page_id;
        (right, split_key)
    }
}
