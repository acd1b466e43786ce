//! §4.4 Free Page Map — a bitmap over page 2, one bit per page id.

use bit_vec::BitVec;

use crate::common::{PageId, FIRST_DATA_PAGE_ID, PAGE_SIZE};

/// In-memory mirror of page 2's bitmap. Callers must mark page 2 dirty
/// after `allocate`/`deallocate` so the buffer pool flushes it back.
pub struct FreePageMap {
    bits: BitVec,
}

impl FreePageMap {
    pub fn from_page_bytes(buf: &[u8; PAGE_SIZE]) -> Self {
        let mut bits = BitVec::from_bytes(buf);
        for i in 0..FIRST_DATA_PAGE_ID as usize {
            bits.set(i, true);
        }
        Self { bits }
    }

    pub fn to_page_bytes(&self) -> [u8; PAGE_SIZE] {
        let mut out = [0u8; PAGE_SIZE];
        let bytes = self.bits.to_bytes();
        out[..bytes.len()].copy_from_slice(&bytes);
        out
    }

    /// Scans for the first unset bit, sets it, and returns its index. If
    /// every tracked bit is set, returns the id one past the end of the
    /// current bitmap (i.e. end-of-file).
    pub fn allocate(&mut self) -> PageId {
        for i in 0..self.bits.len() {
            if !self.bits[i] {
                self.bits.set(i, true);
                return i as PageId;
            }
        }
        let new_id = self.bits.len() as PageId;
        self.bits.push(true);
        new_id
    }

    pub fn deallocate(&mut self, id: PageId) {
        if (id as usize) < self.bits.len() {
            self.bits.set(id as usize, false);
        }
    }

    pub fn is_allocated(&self, id: PageId) -> bool {
        self.bits.get(id as usize).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_pages_start_allocated() {
        let map = FreePageMap::from_page_bytes(&[0u8; PAGE_SIZE]);
        assert!(map.is_allocated(0));
        assert!(map.is_allocated(1));
        assert!(map.is_allocated(2));
        assert!(!map.is_allocated(3));
    }

    #[test]
    fn allocate_reuses_deallocated_ids() {
        let mut map = FreePageMap::from_page_bytes(&[0u8; PAGE_SIZE]);
        let a = map.allocate();
        let b = map.allocate();
        assert_ne!(a, b);
        map.deallocate(a);
        let c = map.allocate();
        assert_eq!(a, c);
    }
}
