//! §4.10 Checkpoint Index — an on-disk, timestamp-sorted directory of
//! every checkpoint ever taken, so a point-in-time query can find the
//! nearest prior snapshot with a binary search instead of scanning the
//! whole `checkpoints/` directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::Lsn;
use crate::error::{EngineError, Result};

const MAGIC: u32 = 0x4350_4958; // "CPIX"
const VERSION: u32 = 1;

/// One recorded checkpoint: its LSN, wall-clock time, and the log offset
/// (the `CHECKPOINT_END` record's own LSN) recovery can resume reading
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub lsn: Lsn,
    pub timestamp_us: i64,
    pub log_offset: u64,
}

#[derive(Debug, Default)]
pub struct CheckpointIndex {
    entries: Vec<CheckpointEntry>,
}

impl CheckpointIndex {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn entries(&self) -> &[CheckpointEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a checkpoint, re-sorting by timestamp if it didn't land
    /// after the current last entry (a wall clock is not guaranteed
    /// monotonic across a process restart).
    pub fn add_checkpoint(&mut self, entry: CheckpointEntry) {
        let out_of_order = self
            .entries
            .last()
            .is_some_and(|last| last.timestamp_us > entry.timestamp_us);
        self.entries.push(entry);
        if out_of_order {
            self.entries.sort_by_key(|e| e.timestamp_us);
        }
    }

    /// The last checkpoint with `timestamp_us <= target_us`, or `None`
    /// if every checkpoint is newer than `target_us` (or none exist).
    pub fn find_nearest_before(&self, target_us: i64) -> Option<CheckpointEntry> {
        let idx = self.entries.partition_point(|e| e.timestamp_us <= target_us);
        if idx == 0 {
            None
        } else {
            Some(self.entries[idx - 1])
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let buf = fs::read(path)?;
        let mut cur = 0usize;
        let magic = read_u32(&buf, &mut cur)?;
        if magic != MAGIC {
            return Err(EngineError::corruption(-1, "bad checkpoint index magic"));
        }
        let version = read_u32(&buf, &mut cur)?;
        if version != VERSION {
            return Err(EngineError::corruption(
                -1,
                format!("unsupported checkpoint index version {version}"),
            ));
        }
        let count = read_u32(&buf, &mut cur)? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let lsn = read_u64(&buf, &mut cur)?;
            let timestamp_us = read_u64(&buf, &mut cur)? as i64;
            let log_offset = read_u64(&buf, &mut cur)?;
            entries.push(CheckpointEntry { lsn, timestamp_us, log_offset });
        }
        Ok(Self { entries })
    }

    /// Atomic tmp-then-rename write so a crash mid-write never leaves a
    /// half-written index behind.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut buf = Vec::with_capacity(12 + self.entries.len() * 24);
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for e in &self.entries {
            buf.extend_from_slice(&e.lsn.to_le_bytes());
            buf.extend_from_slice(&(e.timestamp_us as u64).to_le_bytes());
            buf.extend_from_slice(&e.log_offset.to_le_bytes());
        }
        let tmp = tmp_path(path);
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&buf)?;
            f.sync_data()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

fn read_u32(buf: &[u8], cur: &mut usize) -> Result<u32> {
    if *cur + 4 > buf.len() {
        return Err(EngineError::corruption(-1, "truncated checkpoint index"));
    }
    let v = u32::from_le_bytes(buf[*cur..*cur + 4].try_into().unwrap());
    *cur += 4;
    Ok(v)
}

fn read_u64(buf: &[u8], cur: &mut usize) -> Result<u64> {
    if *cur + 8 > buf.len() {
        return Err(EngineError::corruption(-1, "truncated checkpoint index"));
    }
    let v = u64::from_le_bytes(buf[*cur..*cur + 8].try_into().unwrap());
    *cur += 8;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn find_nearest_before_picks_last_entry_at_or_before_target() {
        let mut idx = CheckpointIndex::new();
        idx.add_checkpoint(CheckpointEntry { lsn: 10, timestamp_us: 100, log_offset: 10 });
        idx.add_checkpoint(CheckpointEntry { lsn: 20, timestamp_us: 200, log_offset: 20 });
        idx.add_checkpoint(CheckpointEntry { lsn: 30, timestamp_us: 300, log_offset: 30 });

        assert_eq!(idx.find_nearest_before(250).unwrap().lsn, 20);
        assert_eq!(idx.find_nearest_before(300).unwrap().lsn, 30);
        assert!(idx.find_nearest_before(50).is_none());
    }

    #[test]
    fn out_of_order_insert_is_resorted() {
        let mut idx = CheckpointIndex::new();
        idx.add_checkpoint(CheckpointEntry { lsn: 20, timestamp_us: 200, log_offset: 20 });
        idx.add_checkpoint(CheckpointEntry { lsn: 10, timestamp_us: 100, log_offset: 10 });
        assert_eq!(idx.entries()[0].lsn, 10);
        assert_eq!(idx.entries()[1].lsn, 20);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.idx");
        let mut idx = CheckpointIndex::new();
        idx.add_checkpoint(CheckpointEntry { lsn: 5, timestamp_us: 42, log_offset: 99 });
        idx.save_to_file(&path).unwrap();

        let reloaded = CheckpointIndex::load_from_file(&path).unwrap();
        assert_eq!(reloaded.entries(), idx.entries());
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let idx = CheckpointIndex::load_from_file(dir.path().join("nope.idx")).unwrap();
        assert!(idx.is_empty());
    }
}
