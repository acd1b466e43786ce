//! §3 Frame — a page resident in memory: pin count, dirty flag,
//! page-LSN, and the reader/writer latch over its bytes.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::common::{Lsn, PageId, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};

/// One buffer-pool slot. The `RwLock` over the page bytes *is* the
/// frame's reader/writer latch (§5: acquired while pinned, released
/// before unpin).
pub struct Frame {
    page_id: AtomicI32,
    pin_count: AtomicUsize,
    dirty: AtomicBool,
    page_lsn: AtomicU64,
    data: RwLock<[u8; PAGE_SIZE]>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page_id: AtomicI32::new(INVALID_PAGE_ID),
            pin_count: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            page_lsn: AtomicU64::new(INVALID_LSN),
            data: RwLock::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub fn set_page_id(&self, id: PageId) {
        self.page_id.store(id, Ordering::Release);
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the pin count after decrementing.
    pub fn unpin(&self) -> usize {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of a frame with pin_count == 0");
        prev - 1
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub fn page_lsn(&self) -> Lsn {
        self.page_lsn.load(Ordering::Acquire)
    }

    pub fn set_page_lsn(&self, lsn: Lsn) {
        self.page_lsn.store(lsn, Ordering::Release);
    }

    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        self.data.read().unwrap()
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        self.data.write().unwrap()
    }

    /// Resets a frame that is about to be reused for a different page.
    /// Must only be called by the pool while holding the pool latch and
    /// after verifying `pin_count == 0`.
    pub fn reset(&self, new_page_id: PageId, contents: [u8; PAGE_SIZE], page_lsn: Lsn) {
        *self.data.write().unwrap() = contents;
        self.set_page_id(new_page_id);
        self.set_dirty(false);
        self.set_page_lsn(page_lsn);
        self.pin_count.store(1, Ordering::Release);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
