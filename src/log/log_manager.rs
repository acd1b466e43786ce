//! §4.7 Log Manager — append-only WAL file with group-commit flushing.
//! LSNs are the file offsets where each record's `[size]` prefix begins.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::buffer::WalSink;
use crate::common::Lsn;
use crate::error::Result;

use super::log_record::LogRecord;

struct Inner {
    file: File,
    /// Bytes already appended to `buffer` but not yet written to `file`.
    buffer: Vec<u8>,
    /// File offset at which `buffer`'s first byte belongs.
    buffer_start: u64,
}

/// Owns `<db>/wal.log`. Appends are serialized; flushes may run
/// concurrently with new appends up to the point they started (the
/// buffer being flushed is swapped out under the lock, so an append
/// that lands after the swap is simply part of the next flush).
pub struct LogManager {
    inner: Mutex<Inner>,
    path: PathBuf,
}

impl LogManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let mut len = file.seek(SeekFrom::End(0))?;
        if len == 0 {
            // Offset 0 is reserved so a freshly-formatted page's
            // `page_lsn() == INVALID_LSN` can never collide with a real
            // record's LSN; the first real record starts at offset 1.
            file.write_all(&[0u8])?;
            file.sync_data()?;
            len = 1;
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                buffer: Vec::new(),
                buffer_start: len,
            }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record`, stamping its `lsn` as the offset the record's
    /// frame begins at, and returns that LSN. Not yet durable — callers
    /// that need durability (e.g. commit) must follow with `flush_to`.
    pub fn append(&self, record: &mut LogRecord) -> Lsn {
        let mut inner = self.inner.lock().unwrap();
        let lsn = inner.buffer_start + inner.buffer.len() as u64;
        record.lsn = lsn;
        let body = record.encode();
        let crc = crc32fast::hash(&body);
        inner.buffer.extend_from_slice(&(body.len() as u32).to_le_bytes());
        inner.buffer.extend_from_slice(&body);
        inner.buffer.extend_from_slice(&crc.to_le_bytes());
        lsn
    }

    /// Guarantees every record with `lsn <= target` is durable on disk.
    /// Since a single mutex serializes appends, the simplest correct
    /// group-commit policy is to flush everything currently buffered.
    pub fn flush_to(&self, target: Lsn) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if target < inner.buffer_start || inner.buffer.is_empty() {
            return Ok(());
        }
        inner.file.write_all(&inner.buffer)?;
        inner.file.sync_data()?;
        inner.buffer_start += inner.buffer.len() as u64;
        inner.buffer.clear();
        Ok(())
    }

    pub fn current_lsn(&self) -> Lsn {
        let inner = self.inner.lock().unwrap();
        inner.buffer_start + inner.buffer.len() as u64
    }

    /// Cuts the WAL to end exactly at `offset`, discarding every record
    /// at or after it. Used only by destructive point-in-time recovery
    /// (`RECOVER TO`): once truncated, a later crash-recovery pass can
    /// never redo what this discarded.
    pub fn truncate_to(&self, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.file.flush()?;
        inner.file.set_len(offset)?;
        inner.buffer.clear();
        inner.buffer_start = offset;
        Ok(())
    }

    /// Reads every well-formed record from the start of the file. Stops
    /// (without error) at the first record that fails length sanity or
    /// CRC — that is the tail of a partially-written crash record, per
    /// the recovery contract, not a corruption to report.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let mut inner = self.inner.lock().unwrap();
        inner.file.flush()?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(1))?; // skip the reserved LSN-0 sentinel byte
        let mut out = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            if file.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len == 0 || len > 64 * 1024 * 1024 {
                break;
            }
            let mut body = vec![0u8; len];
            if file.read_exact(&mut body).is_err() {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if file.read_exact(&mut crc_buf).is_err() {
                break;
            }
            let expected = u32::from_le_bytes(crc_buf);
            if crc32fast::hash(&body) != expected {
                break;
            }
            match LogRecord::decode(&body) {
                Ok(record) => out.push(record),
                Err(_) => break,
            }
        }
        Ok(out)
    }
}

impl WalSink for LogManager {
    fn flush_to(&self, lsn: Lsn) -> Result<()> {
        LogManager::flush_to(self, lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Rid;
    use crate::log::log_record::LogRecordBody;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_all_round_trips() {
        let dir = tempdir().unwrap();
        let lm = LogManager::open(dir.path().join("wal.log")).unwrap();
        let mut rec = LogRecord::new(
            0,
            1,
            1,
            LogRecordBody::Insert {
                rid: Rid::new(3, 0),
                table_oid: 1,
                after: b"x".to_vec(),
            },
        );
        let lsn = lm.append(&mut rec);
        lm.flush_to(lsn).unwrap();
        let all = lm.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].lsn, lsn);
    }

    #[test]
    fn flush_to_is_idempotent() {
        let dir = tempdir().unwrap();
        let lm = LogManager::open(dir.path().join("wal.log")).unwrap();
        let mut rec = LogRecord::new(0, 1, 1, LogRecordBody::Begin);
        let lsn = lm.append(&mut rec);
        lm.flush_to(lsn).unwrap();
        lm.flush_to(lsn).unwrap();
        assert_eq!(lm.read_all().unwrap().len(), 1);
    }
}
