//! §4.6 B+Tree Index — generic-key clustered tree with latch crabbing on
//! search, and a two-phase insert: an optimistic pass that only ever
//! exclusive-latches the target leaf, falling back to a pessimistic pass
//! that holds the whole root-to-leaf path exclusively so splits can
//! propagate upward (`insert_into_parent`), including a root split.
//!
//! Deletion does not rebalance or merge underfull siblings — sparse
//! leaves are permitted (see DESIGN.md's resolution of the relevant
//! open question); a tombstone-free remove keeps the path short and the
//! on-disk format simple.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::{BufferPool, WritePageGuard};
use crate::common::{PageId, Rid, INVALID_PAGE_ID};
use crate::error::Result;
use crate::storage::FreePageMap;
use crate::types::{TypeId, Value};

use super::generic_key::GenericKey;
use super::internal_node::InternalNode;
use super::leaf_node::LeafNode;
use super::node::{peek_node_type, NodeType};

/// Default fan-out for a new index, absent an explicit value — §4.6's
/// "fan-out is configurable (default 128)". Leaf and internal pages
/// clamp this to their own physical ceiling independently, since their
/// entries differ in size.
pub const DEFAULT_FAN_OUT: u32 = super::leaf_node::DEFAULT_FAN_OUT;

pub struct BTreeIndex {
    buffer_pool: Arc<BufferPool>,
    free_map: Arc<Mutex<FreePageMap>>,
    root_page_id: AtomicI32,
    key_type: TypeId,
    fan_out: u32,
}

impl BTreeIndex {
    /// Allocates a single empty leaf page as the initial root, with
    /// fan-out `fan_out` (clamped to what a page can physically hold).
    pub fn create(
        buffer_pool: Arc<BufferPool>,
        free_map: Arc<Mutex<FreePageMap>>,
        key_type: TypeId,
        fan_out: u32,
    ) -> Result<Self> {
        let mut guard = buffer_pool.new_page(&free_map)?;
        let root_id = guard.page_id();
        let leaf = LeafNode::new(root_id, key_type, super::leaf_node::resolve_fan_out(fan_out));
        guard[..].copy_from_slice(&leaf.as_bytes());
        drop(guard);
        Ok(Self {
            buffer_pool,
            free_map,
            root_page_id: AtomicI32::new(root_id),
            key_type,
            fan_out,
        })
    }

    pub fn open(
        root_page_id: PageId,
        key_type: TypeId,
        buffer_pool: Arc<BufferPool>,
        free_map: Arc<Mutex<FreePageMap>>,
        fan_out: u32,
    ) -> Self {
        Self {
            buffer_pool,
            free_map,
            root_page_id: AtomicI32::new(root_page_id),
            key_type,
            fan_out,
        }
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(Ordering::SeqCst)
    }

    fn key_of(&self, value: &Value) -> GenericKey {
        GenericKey::from_value(value, self.key_type)
    }

    /// Latch-crabbing search: the child latch is always acquired before
    /// its parent's is released. Returns every RID stored under `value`
    /// — more than one when the indexed column isn't unique.
    pub fn get(&self, value: &Value) -> Result<Vec<Rid>> {
        let key = self.key_of(value);
        let mut current = self.root_page_id();
        let mut held = None;
        loop {
            let guard = self.buffer_pool.fetch_page_read(current)?;
            held = None; // drop the grandparent now that the child is latched
            match peek_node_type(&guard) {
                NodeType::Leaf => {
                    let leaf = LeafNode::from_bytes(current, *guard, self.key_type);
                    return Ok(leaf.find_all(&key));
                }
                NodeType::Internal => {
                    let internal = InternalNode::from_bytes(current, *guard, self.key_type);
                    current = internal.child_for(&key);
                    held = Some(guard);
                }
            }
        }
    }

    fn leftmost_leaf_id(&self) -> Result<PageId> {
        let mut current = self.root_page_id();
        let mut held = None;
        loop {
            let guard = self.buffer_pool.fetch_page_read(current)?;
            held = None;
            match peek_node_type(&guard) {
                NodeType::Leaf => return Ok(current),
                NodeType::Internal => {
                    let internal = InternalNode::from_bytes(current, *guard, self.key_type);
                    current = internal.children().next().unwrap_or(INVALID_PAGE_ID);
                    held = Some(guard);
                }
            }
        }
    }

    /// Ordered full-index scan, riding `next_page_id` across leaves.
    pub fn scan(&self) -> Result<BTreeIndexIterator<'_>> {
        let leaf_id = self.leftmost_leaf_id()?;
        Ok(BTreeIndexIterator::new(self, leaf_id))
    }

    /// Inserts `(key, rid)`. Equal keys are permitted — a non-unique
    /// secondary index chains one entry per RID under the same key.
    /// This tree enforces no uniqueness of its own.
    pub fn insert(&self, value: &Value, rid: Rid) -> Result<()> {
        let key = self.key_of(value);

        // Phase 1 (optimistic): crab down with read latches, then
        // exclusive-latch only the leaf.
        let leaf_id = self.find_leaf_id(&key)?;
        {
            let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
            let mut leaf = LeafNode::from_bytes(leaf_id, *guard, self.key_type);
            if !leaf.is_full() {
                leaf.insert(key, rid);
                guard[..].copy_from_slice(&leaf.as_bytes());
                return Ok(());
            }
        }

        // Phase 2 (pessimistic): hold the whole path exclusively so a
        // split can propagate up, possibly creating a new root.
        self.insert_pessimistic(key, rid)
    }

    fn find_leaf_id(&self, key: &GenericKey) -> Result<PageId> {
        let mut current = self.root_page_id();
        let mut held = None;
        loop {
            let guard = self.buffer_pool.fetch_page_read(current)?;
            held = None;
            match peek_node_type(&guard) {
                NodeType::Leaf => return Ok(current),
                NodeType::Internal => {
                    let internal = InternalNode::from_bytes(current, *guard, self.key_type);
                    current = internal.child_for(key);
                    held = Some(guard);
                }
            }
        }
    }

    fn insert_pessimistic(&self, key: GenericKey, rid: Rid) -> Result<()> {
        let mut stack: Vec<WritePageGuard<'_>> = Vec::new();
        let mut current = self.root_page_id();
        loop {
            let guard = self.buffer_pool.fetch_page_write(current)?;
            let is_leaf = peek_node_type(&guard) == NodeType::Leaf;
            if is_leaf {
                stack.push(guard);
                break;
            }
            let internal = InternalNode::from_bytes(current, *guard, self.key_type);
            current = internal.child_for(&key);
            stack.push(guard);
        }

        let leaf_guard = stack.pop().expect("path always has a leaf");
        let leaf_id = leaf_guard.page_id();
        let mut leaf = LeafNode::from_bytes(leaf_id, *leaf_guard, self.key_type);
        leaf.insert(key, rid);

        let mut carry = if leaf.is_full() {
            let mut new_guard = self.buffer_pool.new_page(&self.free_map)?;
            let new_id = new_guard.page_id();
            let (right, split_key) = leaf.split(new_id);
            new_guard[..].copy_from_slice(&right.as_bytes());
            drop(new_guard);
            Some((split_key, leaf_id, new_id))
        } else {
            None
        };
        let mut guard = leaf_guard;
        guard[..].copy_from_slice(&leaf.as_bytes());
        drop(guard);

        while let Some(parent_guard) = stack.pop() {
            let Some((split_key, _left, right_child)) = carry.take() else {
                break;
            };
            let parent_id = parent_guard.page_id();
            let mut internal = InternalNode::from_bytes(parent_id, *parent_guard, self.key_type);
            internal.insert_entry(split_key, right_child);
            self.set_parent(right_child, parent_id)?;

            if internal.is_full() {
                let mut new_guard = self.buffer_pool.new_page(&self.free_map)?;
                let new_id = new_guard.page_id();
                let (right_node, up_key) = internal.split(new_id);
                new_guard[..].copy_from_slice(&right_node.as_bytes());
                drop(new_guard);
                for child in right_node.children() {
                    self.set_parent(child, new_id)?;
                }
                carry = Some((up_key, parent_id, new_id));
            }

            let mut guard = parent_guard;
            guard[..].copy_from_slice(&internal.as_bytes());
            drop(guard);
        }

        if let Some((split_key, left_id, right_id)) = carry {
            let mut new_root_guard = self.buffer_pool.new_page(&self.free_map)?;
            let new_root_id = new_root_guard.page_id();
            let mut new_root =
                InternalNode::new(new_root_id, self.key_type, super::internal_node::resolve_fan_out(self.fan_out));
            new_root.init_single_child(left_id);
            new_root.insert_entry(split_key, right_id);
            new_root_guard[..].copy_from_slice(&new_root.as_bytes());
            drop(new_root_guard);

            self.set_parent(left_id, new_root_id)?;
            self.set_parent(right_id, new_root_id)?;
            self.root_page_id.store(new_root_id, Ordering::SeqCst);
        }

        Ok(())
    }

    fn set_parent(&self, child_id: PageId, parent_id: PageId) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(child_id)?;
        match peek_node_type(&guard) {
            NodeType::Leaf => {
                let mut node = LeafNode::from_bytes(child_id, *guard, self.key_type);
                node.set_parent_page_id(parent_id);
                guard[..].copy_from_slice(&node.as_bytes());
            }
            NodeType::Internal => {
                let mut node = InternalNode::from_bytes(child_id, *guard, self.key_type);
                node.set_parent_page_id(parent_id);
                guard[..].copy_from_slice(&node.as_bytes());
            }
        }
        Ok(())
    }

    /// Removes the `(value, rid)` entry from its leaf — not every entry
    /// under `value`, since a non-unique index may chain other RIDs
    /// under the same key. No rebalancing: the leaf is simply left
    /// sparser.
    pub fn delete(&self, value: &Value, rid: Rid) -> Result<bool> {
        let key = self.key_of(value);
        let leaf_id = self.find_leaf_id(&key)?;
        let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
        let mut leaf = LeafNode::from_bytes(leaf_id, *guard, self.key_type);
        let removed = leaf.delete(&key, rid);
        if removed {
            guard[..].copy_from_slice(&leaf.as_bytes());
        }
        Ok(removed)
    }
}

/// Forward scan across leaves, riding `next_page_id`, holding no latch
/// between steps.
pub struct BTreeIndexIterator<'a> {
    index: &'a BTreeIndex,
    page_id: PageId,
    slot: usize,
    cached: Vec<(GenericKey, Rid)>,
}

impl<'a> BTreeIndexIterator<'a> {
    fn new(index: &'a BTreeIndex, start_leaf: PageId) -> Self {
        let mut it = Self {
            index,
            page_id: start_leaf,
            slot: 0,
            cached: Vec::new(),
        };
        it.load_leaf();
        it
    }

    /// Loads leaves forward until one has entries or the chain ends —
    /// a leaf can be legitimately empty after a delete, with no
    /// rebalancing to remove it from the chain.
    fn load_leaf(&mut self) {
        loop {
            self.cached.clear();
            self.slot = 0;
            if self.page_id == INVALID_PAGE_ID {
                return;
            }
            let Ok(guard) = self.index.buffer_pool.fetch_page_read(self.page_id) else {
                self.page_id = INVALID_PAGE_ID;
                return;
            };
            let leaf = LeafNode::from_bytes(self.page_id, *guard, self.index.key_type);
            self.cached = leaf.entries().to_vec();
            self.page_id = leaf.next_page_id();
            if !self.cached.is_empty() {
                return;
            }
        }
    }
}

impl Iterator for BTreeIndexIterator<'_> {
    type Item = Rid;

    fn next(&mut self) -> Option<Rid> {
        if self.slot >= self.cached.len() {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }
            self.load_leaf();
            if self.cached.is_empty() {
                return None;
            }
        }
        let (_, rid) = self.cached[self.slot];
        self.slot += 1;
        Some(rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn fixture() -> (BTreeIndex, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.francodb"), None).unwrap());
        let pool = Arc::new(BufferPool::new(64, disk));
        let free_map = Arc::new(Mutex::new(FreePageMap::from_page_bytes(
            &[0u8; crate::common::PAGE_SIZE],
        )));
        let index = BTreeIndex::create(pool, free_map, TypeId::Integer, DEFAULT_FAN_OUT).unwrap();
        (index, dir)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (index, _dir) = fixture();
        for i in 0..5i64 {
            index
                .insert(&Value::Integer(i), Rid::new(i as i32 + 10, 0))
                .unwrap();
        }
        for i in 0..5i64 {
            assert_eq!(
                index.get(&Value::Integer(i)).unwrap(),
                vec![Rid::new(i as i32 + 10, 0)]
            );
        }
        assert!(index.get(&Value::Integer(99)).unwrap().is_empty());
    }

    #[test]
    fn many_inserts_force_splits_and_stay_searchable() {
        let (index, _dir) = fixture();
        let initial_root = index.root_page_id();
        const N: i64 = 600;
        for i in 0..N {
            index.insert(&Value::Integer(i), Rid::new(3, i as u32)).unwrap();
        }
        for i in 0..N {
            assert_eq!(
                index.get(&Value::Integer(i)).unwrap(),
                vec![Rid::new(3, i as u32)],
                "key {i} missing after splits"
            );
        }
        // enough inserts to force both leaf and internal splits, so the
        // root must have been replaced at least once
        assert_ne!(index.root_page_id(), initial_root);
    }

    #[test]
    fn scan_yields_ascending_order() {
        let (index, _dir) = fixture();
        let mut order: Vec<i64> = (0..200).collect();
        // insert out of order to make sure the scan, not insertion order, is what's tested
        order.reverse();
        for i in &order {
            index.insert(&Value::Integer(*i), Rid::new(3, *i as u32)).unwrap();
        }
        let seen: Vec<i64> = index
            .scan()
            .unwrap()
            .map(|rid| rid.slot as i64)
            .collect();
        let mut expected: Vec<i64> = (0..200).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn delete_removes_entry_without_breaking_others() {
        let (index, _dir) = fixture();
        for i in 0..50i64 {
            index.insert(&Value::Integer(i), Rid::new(3, i as u32)).unwrap();
        }
        assert!(index.delete(&Value::Integer(25), Rid::new(3, 25)).unwrap());
        assert!(index.get(&Value::Integer(25)).unwrap().is_empty());
        assert_eq!(
            index.get(&Value::Integer(24)).unwrap(),
            vec![Rid::new(3, 24)]
        );
        assert!(!index.delete(&Value::Integer(25), Rid::new(3, 25)).unwrap());
    }

    #[test]
    fn duplicate_keys_chain_multiple_rids() {
        let (index, _dir) = fixture();
        index.insert(&Value::Integer(1), Rid::new(3, 0)).unwrap();
        index.insert(&Value::Integer(1), Rid::new(3, 1)).unwrap();

        let mut rids = index.get(&Value::Integer(1)).unwrap();
        rids.sort_by_key(|r| r.slot);
        assert_eq!(rids, vec![Rid::new(3, 0), Rid::new(3, 1)]);

        // deleting one RID leaves the other retrievable under the same key
        assert!(index.delete(&Value::Integer(1), Rid::new(3, 0)).unwrap());
        assert_eq!(index.get(&Value::Integer(1)).unwrap(), vec![Rid::new(3, 1)]);
    }
}
