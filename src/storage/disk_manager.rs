//! §4.1 Disk Manager — fixed-size page I/O on a single file, with a
//! per-page checksum and an optional XOR stream cipher.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::common::{PageId, FILE_MAGIC, META_MAGIC, PAGE_SIZE};
use crate::error::{EngineError, Result};

/// Derives a 32-byte XOR key from an arbitrary passphrase: the original
/// truncates if the passphrase is long enough, otherwise cycles it to
/// fill the key. Kept bit-for-bit compatible so encrypted files are
/// portable across reimplementations that follow the same spec.
fn derive_key(passphrase: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    let bytes = passphrase.as_bytes();
    if bytes.len() >= 32 {
        key.copy_from_slice(&bytes[..32]);
    } else if !bytes.is_empty() {
        for (i, slot) in key.iter_mut().enumerate() {
            *slot = bytes[i % bytes.len()];
        }
    }
    key
}

fn xor_whiten(key: &[u8; 32], buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}

struct Inner {
    file: File,
    meta_file: File,
}

/// Owns one database file (plus its `.meta` sidecar). All I/O is
/// serialized by a single mutex; the file is never touched while the
/// buffer pool's own latches are held.
pub struct DiskManager {
    inner: Mutex<Inner>,
    encryption_key: Option<[u8; 32]>,
    db_path: PathBuf,
}

impl DiskManager {
    pub fn open(db_path: impl AsRef<Path>, encryption_key: Option<&str>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let meta_path = meta_sidecar_path(&db_path);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&db_path)?;
        let mut meta_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&meta_path)?;

        let key = encryption_key
            .filter(|k| !k.is_empty())
            .map(derive_key);

        let is_new = file.metadata()?.len() == 0;
        if is_new {
            bootstrap(&mut file, &mut meta_file, key.as_ref())?;
        }

        Ok(Self {
            inner: Mutex::new(Inner { file, meta_file }),
            encryption_key: key,
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Reads page `id` into `buf`. Verifies the checksum for pages >= 3
    /// and logs (but does not fail on) a mismatch — corruption is
    /// reported, never guessed at.
    pub fn read_page(&self, id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let offset = page_offset(id);
        inner.file.seek(SeekFrom::Start(offset))?;
        match inner.file.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                buf.fill(0);
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(key) = &self.encryption_key {
            if id != crate::common::MAGIC_PAGE_ID {
                xor_whiten(key, buf);
            }
        }

        if id >= crate::common::FIRST_DATA_PAGE_ID {
            let expected = crc32fast::hash(&buf[4..]);
            let stored = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            if stored != 0 && stored != expected {
                warn!(
                    "checksum mismatch on page {}: stored {:#010x}, computed {:#010x}",
                    id, stored, expected
                );
            }
        }
        Ok(())
    }

    /// Writes `buf` to page `id`, recomputing and stamping the checksum
    /// into bytes `0..4` for pages >= 3.
    pub fn write_page(&self, id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut staged = *buf;
        if id >= crate::common::FIRST_DATA_PAGE_ID {
            let checksum = crc32fast::hash(&staged[4..]);
            staged[0..4].copy_from_slice(&checksum.to_le_bytes());
        }
        if let Some(key) = &self.encryption_key {
            if id != crate::common::MAGIC_PAGE_ID {
                xor_whiten(key, &mut staged);
            }
        }

        let mut inner = self.inner.lock().unwrap();
        let offset = page_offset(id);
        let needed_len = offset + PAGE_SIZE as u64;
        if inner.file.metadata()?.len() < needed_len {
            inner.file.set_len(needed_len)?;
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&staged)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        inner.file.sync_all()?;
        Ok(())
    }

    /// Reads the whole `.meta` sidecar body (after its magic + length
    /// prefix), optionally XOR-decrypted.
    pub fn read_meta(&self) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner.meta_file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; META_MAGIC.len()];
        if inner.meta_file.read_exact(&mut magic).is_err() {
            return Ok(Vec::new());
        }
        if &magic != META_MAGIC {
            return Err(EngineError::corruption(
                crate::common::INVALID_PAGE_ID,
                "bad .meta magic",
            ));
        }
        let mut len_buf = [0u8; 8];
        inner.meta_file.read_exact(&mut len_buf)?;
        let len = u64::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        inner.meta_file.read_exact(&mut body)?;
        if let Some(key) = &self.encryption_key {
            xor_whiten(key, &mut body);
        }
        Ok(body)
    }

    pub fn write_meta(&self, body: &[u8]) -> Result<()> {
        let mut staged = body.to_vec();
        if let Some(key) = &self.encryption_key {
            xor_whiten(key, &mut staged);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.meta_file.set_len(0)?;
        inner.meta_file.seek(SeekFrom::Start(0))?;
        inner.meta_file.write_all(META_MAGIC)?;
        inner.meta_file.write_all(&(staged.len() as u64).to_le_bytes())?;
        inner.meta_file.write_all(&staged)?;
        inner.meta_file.sync_all()?;
        Ok(())
    }
}

fn page_offset(id: PageId) -> u64 {
    id as u64 * PAGE_SIZE as u64
}

fn meta_sidecar_path(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_os_string();
    s.push(".meta");
    PathBuf::from(s)
}

fn bootstrap(file: &mut File, meta_file: &mut File, key: Option<&[u8; 32]>) -> Result<()> {
    file.set_len(PAGE_SIZE as u64 * crate::common::FIRST_DATA_PAGE_ID as u64)?;

    let mut page0 = [0u8; PAGE_SIZE];
    page0[..FILE_MAGIC.len()].copy_from_slice(FILE_MAGIC);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&page0)?;

    // page 1: empty catalog (a zero-length entry list, catalog module
    // fills this lazily on first save).
    let page1 = [0u8; PAGE_SIZE];
    file.seek(SeekFrom::Start(PAGE_SIZE as u64))?;
    file.write_all(&page1)?;

    // page 2: bitmap with pages 0..=2 marked in use.
    let mut page2 = [0u8; PAGE_SIZE];
    page2[0] = 0b0000_0111;
    if let Some(key) = key {
        xor_whiten(key, &mut page2);
    }
    file.seek(SeekFrom::Start(2 * PAGE_SIZE as u64))?;
    file.write_all(&page2)?;
    file.sync_all()?;

    meta_file.set_len(0)?;
    meta_file.write_all(META_MAGIC)?;
    meta_file.write_all(&0u64.to_le_bytes())?;
    meta_file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstraps_reserved_pages() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.francodb"), None).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        dm.read_page(0, &mut buf).unwrap();
        assert_eq!(&buf[..FILE_MAGIC.len()], FILE_MAGIC);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.francodb"), None).unwrap();
        let mut page = [7u8; PAGE_SIZE];
        dm.write_page(3, &page).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(3, &mut out).unwrap();
        page[0..4].copy_from_slice(&out[0..4]); // checksum bytes, recomputed on write
        assert_eq!(page, out);
    }

    #[test]
    fn encrypted_round_trip() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("t.francodb"), Some("hunter2")).unwrap();
        let page = [42u8; PAGE_SIZE];
        dm.write_page(5, &page).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        dm.read_page(5, &mut out).unwrap();
        assert_eq!(&out[4..], &page[4..]);
    }
}
