//! RAII guards are the only public path to a frame's bytes, mapping the
//! pin/unpin discipline onto Rust's destructors instead of manual
//! pin-counting at every call site (§9 redesign note).

use std::ops::{Deref, DerefMut};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{Lsn, PageId, PAGE_SIZE};

use super::buffer_pool::BufferPool;
use super::frame::Frame;

pub struct ReadPageGuard<'a> {
    pool: &'a BufferPool,
    frame: &'a Frame,
    guard: RwLockReadGuard<'a, [u8; PAGE_SIZE]>,
}

impl<'a> ReadPageGuard<'a> {
    pub(super) fn new(
        pool: &'a BufferPool,
        frame: &'a Frame,
        guard: RwLockReadGuard<'a, [u8; PAGE_SIZE]>,
    ) -> Self {
        Self { pool, frame, guard }
    }

    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    pub fn page_lsn(&self) -> Lsn {
        self.frame.page_lsn()
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8; PAGE_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.frame, false, None);
    }
}

pub struct WritePageGuard<'a> {
    pool: &'a BufferPool,
    frame: &'a Frame,
    guard: RwLockWriteGuard<'a, [u8; PAGE_SIZE]>,
    new_lsn: Option<Lsn>,
}

impl<'a> WritePageGuard<'a> {
    pub(super) fn new(
        pool: &'a BufferPool,
        frame: &'a Frame,
        guard: RwLockWriteGuard<'a, [u8; PAGE_SIZE]>,
    ) -> Self {
        Self {
            pool,
            frame,
            guard,
            new_lsn: None,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    pub fn page_lsn(&self) -> Lsn {
        self.frame.page_lsn()
    }

    /// Records the LSN of the WAL record that justifies this write. The
    /// buffer pool will not let the frame reach disk before the log is
    /// flushed at least that far (§4.2 WAL protocol).
    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        self.new_lsn = Some(lsn);
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8; PAGE_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.frame, true, self.new_lsn);
    }
}
