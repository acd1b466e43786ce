//! §4 Slotted Table Page — tuple storage with a slot directory growing
//! from the header down and tuple bodies growing from the tail up.
//!
//! Physical layout: `[checksum:4][page_id:4][prev:4][next:4]
//! [free_space_ptr:4][tuple_count:4][page_lsn:8]` (32 bytes), slot
//! directory, then tuple bodies. The checksum at offset 0 is owned and
//! maintained by the disk manager, not by this type; `page_lsn` is not
//! named in the data model's 24-byte header prose but must be persisted
//! for ARIES redo to compare against a record's LSN after a crash, so it
//! is appended right after the named fields (see DESIGN.md).

use crate::common::{Lsn, PageId, Rid, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{EngineError, Result};
use crate::table::Tuple;

const PAGE_ID_OFF: usize = 4;
const PREV_OFF: usize = 8;
const NEXT_OFF: usize = 12;
const FREE_PTR_OFF: usize = 16;
const TUPLE_COUNT_OFF: usize = 20;
const PAGE_LSN_OFF: usize = 24;
const HEADER_LEN: usize = 32;
const SLOT_LEN: usize = 8; // [offset: u32, size: u32]

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u32,
    size: u32,
}

/// A view over one 4 KiB page buffer, interpreted as a slotted table
/// page. Owns its bytes so callers can build one from a fresh buffer-pool
/// frame and write it back wholesale.
pub struct TablePage {
    pub page_id: PageId,
    buf: [u8; PAGE_SIZE],
}

impl TablePage {
    /// Formats a brand-new, empty table page.
    pub fn new(page_id: PageId) -> Self {
        let mut page = Self {
            page_id,
            buf: [0u8; PAGE_SIZE],
        };
        page.buf[PAGE_ID_OFF..PAGE_ID_OFF + 4].copy_from_slice(&page_id.to_le_bytes());
        page.set_prev(INVALID_PAGE_ID);
        page.set_next(INVALID_PAGE_ID);
        page.set_free_space_ptr(PAGE_SIZE as u32);
        page.set_tuple_count(0);
        page.set_page_lsn(INVALID_LSN);
        page
    }

    pub fn from_bytes(page_id: PageId, buf: [u8; PAGE_SIZE]) -> Self {
        Self { page_id, buf }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.buf
    }

    pub fn page_lsn(&self) -> Lsn {
        u64::from_le_bytes(self.buf[PAGE_LSN_OFF..PAGE_LSN_OFF + 8].try_into().unwrap())
    }

    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        self.buf[PAGE_LSN_OFF..PAGE_LSN_OFF + 8].copy_from_slice(&lsn.to_le_bytes());
    }

    pub fn prev_page_id(&self) -> PageId {
        i32::from_le_bytes(self.buf[PREV_OFF..PREV_OFF + 4].try_into().unwrap())
    }

    pub fn set_prev(&mut self, id: PageId) {
        self.buf[PREV_OFF..PREV_OFF + 4].copy_from_slice(&id.to_le_bytes());
    }

    pub fn next_page_id(&self) -> PageId {
        i32::from_le_bytes(self.buf[NEXT_OFF..NEXT_OFF + 4].try_into().unwrap())
    }

    pub fn set_next(&mut self, id: PageId) {
        self.buf[NEXT_OFF..NEXT_OFF + 4].copy_from_slice(&id.to_le_bytes());
    }

    fn free_space_ptr(&self) -> u32 {
        u32::from_le_bytes(self.buf[FREE_PTR_OFF..FREE_PTR_OFF + 4].try_into().unwrap())
    }

    fn set_free_space_ptr(&mut self, v: u32) {
        self.buf[FREE_PTR_OFF..FREE_PTR_OFF + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn tuple_count(&self) -> u32 {
        u32::from_le_bytes(
            self.buf[TUPLE_COUNT_OFF..TUPLE_COUNT_OFF + 4]
                .try_into()
                .unwrap(),
        )
    }

    fn set_tuple_count(&mut self, count: u32) {
        self.buf[TUPLE_COUNT_OFF..TUPLE_COUNT_OFF + 4].copy_from_slice(&count.to_le_bytes());
    }

    fn slot_offset(index: u32) -> usize {
        HEADER_LEN + index as usize * SLOT_LEN
    }

    fn read_slot(&self, index: u32) -> Slot {
        let at = Self::slot_offset(index);
        Slot {
            offset: u32::from_le_bytes(self.buf[at..at + 4].try_into().unwrap()),
            size: u32::from_le_bytes(self.buf[at + 4..at + 8].try_into().unwrap()),
        }
    }

    fn write_slot(&mut self, index: u32, slot: Slot) {
        let at = Self::slot_offset(index);
        self.buf[at..at + 4].copy_from_slice(&slot.offset.to_le_bytes());
        self.buf[at + 4..at + 8].copy_from_slice(&slot.size.to_le_bytes());
    }

    /// Maximum tuple size that could ever fit on an otherwise-empty page:
    /// page size minus the header and one slot entry.
    pub fn max_tuple_size() -> usize {
        PAGE_SIZE - HEADER_LEN - SLOT_LEN
    }

    /// Inserts `data` as a new tuple, returning its slot number.
    /// Returns `Ok(None)` (not an error) when the page has no room —
    /// callers (the table heap) interpret that as "page full, try the
    /// next one".
    pub fn insert(&mut self, data: &[u8]) -> Result<Option<u32>> {
        if data.len() > Self::max_tuple_size() {
            return Err(EngineError::Execution(format!(
                "tuple of {} bytes exceeds max tuple size {}",
                data.len(),
                Self::max_tuple_size()
            )));
        }

        let count = self.tuple_count();
        let slots_end = Self::slot_offset(count + 1);
        let free_ptr = self.free_space_ptr() as usize;
        let needed = data.len();
        if slots_end > free_ptr || needed > free_ptr - slots_end {
            return Ok(None);
        }

        let new_free_ptr = free_ptr - needed;
        self.buf[new_free_ptr..new_free_ptr + needed].copy_from_slice(data);
        self.write_slot(
            count,
            Slot {
                offset: new_free_ptr as u32,
                size: needed as u32,
            },
        );
        self.set_free_space_ptr(new_free_ptr as u32);
        self.set_tuple_count(count + 1);
        Ok(Some(count))
    }

    /// Returns the tuple bytes at `slot`, or `None` if the slot is
    /// tombstoned or out of range.
    pub fn get(&self, slot: u32) -> Option<&[u8]> {
        if slot >= self.tuple_count() {
            return None;
        }
        let s = self.read_slot(slot);
        if s.size == 0 {
            return None;
        }
        Some(&self.buf[s.offset as usize..(s.offset + s.size) as usize])
    }

    /// Flips the slot to a tombstone (`size == 0`). The bytes themselves
    /// are left in place (nothing else points at that offset), so a
    /// caller holding the image from `get` beforehand can still log it
    /// as the before-image for undo.
    pub fn mark_delete(&mut self, slot: u32) -> bool {
        if slot >= self.tuple_count() {
            return false;
        }
        let mut s = self.read_slot(slot);
        if s.size == 0 {
            return false;
        }
        s.size = 0;
        self.write_slot(slot, s);
        true
    }

    /// Re-inserts a tuple at a *specific* slot during undo/redo replay.
    /// Only valid for a slot previously allocated (redo) or tombstoned
    /// (undo of a delete); grows the slot directory if `slot` is the
    /// next unused one.
    pub fn reinsert_at(&mut self, slot: u32, data: &[u8]) -> Result<()> {
        if slot == self.tuple_count() {
            self.insert(data)?;
            return Ok(());
        }
        if slot > self.tuple_count() {
            return Err(EngineError::corruption(self.page_id, "reinsert past tuple_count"));
        }
        let free_ptr = self.free_space_ptr() as usize;
        if data.len() > free_ptr - HEADER_LEN {
            return Err(EngineError::corruption(self.page_id, "no room to reinsert"));
        }
        let new_free_ptr = free_ptr - data.len();
        self.buf[new_free_ptr..new_free_ptr + data.len()].copy_from_slice(data);
        self.set_free_space_ptr(new_free_ptr as u32);
        self.write_slot(
            slot,
            Slot {
                offset: new_free_ptr as u32,
                size: data.len() as u32,
            },
        );
        Ok(())
    }

    pub fn rid(&self, slot: u32) -> Rid {
        Rid::new(self.page_id, slot)
    }

    pub fn tuple_at(&self, slot: u32) -> Option<Tuple> {
        self.get(slot).map(|bytes| {
            let mut t = Tuple::from_bytes(bytes.to_vec());
            t.rid = Some(self.rid(slot));
            t
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let mut page = TablePage::new(3);
        let slot = page.insert(b"hello").unwrap().unwrap();
        assert_eq!(page.get(slot), Some(&b"hello"[..]));
    }

    #[test]
    fn tombstoned_slot_not_visible() {
        let mut page = TablePage::new(3);
        let slot = page.insert(b"hello").unwrap().unwrap();
        assert!(page.mark_delete(slot));
        assert_eq!(page.get(slot), None);
    }

    #[test]
    fn insert_returns_none_when_full() {
        let mut page = TablePage::new(3);
        let big = vec![0u8; TablePage::max_tuple_size()];
        assert!(page.insert(&big).unwrap().is_some());
        assert_eq!(page.insert(b"x").unwrap(), None);
    }

    #[test]
    fn page_lsn_persists() {
        let mut page = TablePage::new(3);
        page.set_page_lsn(42);
        let bytes = *page.as_bytes();
        let reloaded = TablePage::from_bytes(3, bytes);
        assert_eq!(reloaded.page_lsn(), 42);
    }
}
