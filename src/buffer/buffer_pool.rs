//! §4.2 Buffer Pool — frame table + page table + free list; fetch/new/
//! unpin/flush; enforces WAL-before-write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::common::{FrameId, Lsn, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{EngineError, Result};
use crate::storage::DiskManager;

use super::frame::Frame;
use super::page_guard::{ReadPageGuard, WritePageGuard};
use super::replacer::{LruReplacer, Replacer};

/// Implemented by the Log Manager so the buffer pool can enforce
/// WAL-before-write without depending on the `log` module directly.
pub trait WalSink: Send + Sync {
    fn flush_to(&self, lsn: Lsn) -> Result<()>;
}

struct Metadata {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
}

pub struct BufferPoolStats {
    pub hits: std::sync::atomic::AtomicU64,
    pub misses: std::sync::atomic::AtomicU64,
    pub evictions: std::sync::atomic::AtomicU64,
    pub dirty_writes: std::sync::atomic::AtomicU64,
}

impl Default for BufferPoolStats {
    fn default() -> Self {
        Self {
            hits: 0.into(),
            misses: 0.into(),
            evictions: 0.into(),
            dirty_writes: 0.into(),
        }
    }
}

impl BufferPoolStats {
    pub fn total_accesses(&self) -> u64 {
        use std::sync::atomic::Ordering::Relaxed;
        self.hits.load(Relaxed) + self.misses.load(Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        use std::sync::atomic::Ordering::Relaxed;
        let total = self.total_accesses();
        if total == 0 {
            1.0
        } else {
            self.hits.load(Relaxed) as f64 / total as f64
        }
    }

    pub fn dirty_ratio(&self, pool_size: usize) -> f64 {
        use std::sync::atomic::Ordering::Relaxed;
        self.dirty_writes.load(Relaxed) as f64 / pool_size.max(1) as f64
    }
}

/// Fixed array of frames, with a page table and free list protected by a
/// single "pool latch". Disk I/O never happens while that latch is held
/// (§5 latch order: frame latch is acquired only after releasing the
/// pool latch).
pub struct BufferPool {
    frames: Vec<Frame>,
    meta: Mutex<Metadata>,
    disk_manager: Arc<DiskManager>,
    wal: Mutex<Option<Arc<dyn WalSink>>>,
    pub stats: BufferPoolStats,
}

impl BufferPool {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list: Vec<FrameId> = (0..pool_size).map(FrameId).collect();
        Self {
            frames,
            meta: Mutex::new(Metadata {
                page_table: HashMap::new(),
                free_list,
                replacer: Box::new(LruReplacer::new()),
            }),
            disk_manager,
            wal: Mutex::new(None),
            stats: BufferPoolStats::default(),
        }
    }

    pub fn attach_wal(&self, wal: Arc<dyn WalSink>) {
        *self.wal.lock().unwrap() = Some(wal);
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Finds a frame to house a new page: prefer the free list, else ask
    /// the replacer for a victim. Disk I/O for writing back a dirty
    /// victim happens *after* this call, outside the pool latch.
    fn find_free_frame(meta: &mut Metadata) -> Option<FrameId> {
        if let Some(f) = meta.free_list.pop() {
            return Some(f);
        }
        let victim = meta.replacer.evict()?;
        Some(victim)
    }

    fn flush_frame_to_disk(&self, frame: &Frame) -> Result<()> {
        if !frame.is_dirty() {
            return Ok(());
        }
        if let Some(wal) = self.wal.lock().unwrap().as_ref() {
            wal.flush_to(frame.page_lsn())?;
        }
        let bytes = *frame.read();
        self.disk_manager.write_page(frame.page_id(), &bytes)?;
        frame.set_dirty(false);
        self.stats
            .dirty_writes
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Evicts whatever currently occupies `frame_id`, flushing it first
    /// if dirty, and removes it from the page table.
    fn evict_frame(&self, meta: &mut Metadata, frame_id: FrameId) -> Result<()> {
        let frame = &self.frames[frame_id.0];
        let old_page = frame.page_id();
        if old_page != INVALID_PAGE_ID {
            self.flush_frame_to_disk(frame)?;
            meta.page_table.remove(&old_page);
            self.stats
                .evictions
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(())
    }

    fn fetch_internal(&self, page_id: PageId) -> Result<FrameId> {
        {
            let mut meta = self.meta.lock().unwrap();
            if let Some(&frame_id) = meta.page_table.get(&page_id) {
                let frame = &self.frames[frame_id.0];
                if frame.pin_count() == 0 {
                    meta.replacer.record_pinned(frame_id);
                }
                frame.pin();
                self.stats.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(frame_id);
            }

            let frame_id = match Self::find_free_frame(&mut meta) {
                Some(id) => id,
                None => {
                    return Err(EngineError::OutOfRange(
                        "no free frames available in buffer pool".to_string(),
                    ))
                }
            };
            self.evict_frame(&mut meta, frame_id)?;

            let mut buf = [0u8; PAGE_SIZE];
            self.disk_manager.read_page(page_id, &mut buf)?;
            let lsn = read_embedded_lsn(&buf);
            self.frames[frame_id.0].reset(page_id, buf, lsn);
            meta.page_table.insert(page_id, frame_id);
            self.stats
                .misses
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            debug!("fetched page {} into {}", page_id, frame_id);
            Ok(frame_id)
        }
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        let frame_id = self.fetch_internal(page_id)?;
        let frame = &self.frames[frame_id.0];
        Ok(ReadPageGuard::new(self, frame, frame.read()))
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        let frame_id = self.fetch_internal(page_id)?;
        let frame = &self.frames[frame_id.0];
        Ok(WritePageGuard::new(self, frame, frame.write()))
    }

    /// Allocates a new page id via the disk manager's free-page map and
    /// returns a write guard over its (zeroed) frame.
    pub fn new_page(&self, free_map: &Mutex<crate::storage::FreePageMap>) -> Result<WritePageGuard<'_>> {
        let page_id = {
            let mut map = free_map.lock().unwrap();
            map.allocate()
        };
        let frame_id = self.fetch_internal(page_id)?;
        let frame = &self.frames[frame_id.0];
        *frame.write() = [0u8; PAGE_SIZE];
        frame.set_dirty(true);
        Ok(WritePageGuard::new(self, frame, frame.write()))
    }

    /// Called by guard destructors. Not part of the public API: callers
    /// must go through `ReadPageGuard`/`WritePageGuard`.
    pub(super) fn unpin(&self, frame: &Frame, dirty: bool, new_lsn: Option<Lsn>) {
        if dirty {
            frame.set_dirty(true);
            if let Some(lsn) = new_lsn {
                frame.set_page_lsn(lsn);
            }
        }
        let remaining = frame.unpin();
        if remaining == 0 {
            let mut meta = self.meta.lock().unwrap();
            meta.replacer.record_unpinned(FrameId(frame_index(&self.frames, frame)));
        }
    }

    /// Writes a frame's contents to disk if resident, without evicting
    /// it. Returns `false` if the page is not currently in the pool.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let meta = self.meta.lock().unwrap();
        let Some(&frame_id) = meta.page_table.get(&page_id) else {
            return Ok(false);
        };
        drop(meta);
        self.flush_frame_to_disk(&self.frames[frame_id.0])?;
        Ok(true)
    }

    pub fn flush_all(&self) -> Result<()> {
        let meta = self.meta.lock().unwrap();
        let ids: Vec<PageId> = meta.page_table.keys().copied().collect();
        drop(meta);
        for id in ids {
            self.flush_page(id)?;
        }
        self.disk_manager.flush()?;
        Ok(())
    }

    /// Drops every cached frame without flushing — used by tests that
    /// need to force the next read to go to disk.
    #[cfg(test)]
    pub fn clear_unchecked(&self) {
        let mut meta = self.meta.lock().unwrap();
        meta.page_table.clear();
        meta.free_list = (0..self.frames.len()).map(FrameId).collect();
        meta.replacer = Box::new(LruReplacer::new());
        for frame in &self.frames {
            frame.set_page_id(INVALID_PAGE_ID);
        }
    }
}

fn frame_index(frames: &[Frame], frame: &Frame) -> usize {
    let base = frames.as_ptr() as usize;
    let this = frame as *const Frame as usize;
    (this - base) / std::mem::size_of::<Frame>()
}

fn read_embedded_lsn(buf: &[u8; PAGE_SIZE]) -> Lsn {
    // Table pages and B+Tree pages both place their page-LSN at byte
    // offset 24 (see storage::table_page and index::btree_page); reading
    // it generically here means a freshly-fetched frame already carries
    // the right value without every page type re-deriving it.
    if buf.len() >= 32 {
        u64::from_le_bytes(buf[24..32].try_into().unwrap())
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(size: usize) -> (Arc<DiskManager>, BufferPool) {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManager::open(dir.path().join("t.francodb"), None).unwrap());
        let bp = BufferPool::new(size, dm.clone());
        (dm, bp)
    }

    #[test]
    fn fetch_same_page_twice_is_a_hit() {
        let (_dm, bp) = pool(4);
        let free_map = Mutex::new(crate::storage::FreePageMap::from_page_bytes(&[0u8; PAGE_SIZE]));
        {
            let _g = bp.new_page(&free_map).unwrap();
        }
        let id = 3;
        let _g1 = bp.fetch_page_read(id).unwrap();
        drop(_g1);
        let _g2 = bp.fetch_page_read(id).unwrap();
        assert!(bp.stats.hits.load(std::sync::atomic::Ordering::Relaxed) >= 1);
    }

    #[test]
    fn unpinned_frame_is_evictable() {
        let (_dm, bp) = pool(1);
        let free_map = Mutex::new(crate::storage::FreePageMap::from_page_bytes(&[0u8; PAGE_SIZE]));
        let pid_a = {
            let g = bp.new_page(&free_map).unwrap();
            g.page_id()
        };
        let pid_b = {
            let g = bp.new_page(&free_map).unwrap();
            g.page_id()
        };
        assert_ne!(pid_a, pid_b);
        // with pool size 1, fetching b evicted a; a should still be
        // readable from disk.
        let g = bp.fetch_page_read(pid_a).unwrap();
        assert_eq!(g.page_id(), pid_a);
    }

    #[test]
    fn no_free_frames_when_everything_pinned() {
        let (_dm, bp) = pool(1);
        let free_map = Mutex::new(crate::storage::FreePageMap::from_page_bytes(&[0u8; PAGE_SIZE]));
        let _g1 = bp.new_page(&free_map).unwrap();
        let err = bp.new_page(&free_map);
        assert!(err.is_err());
    }
}
