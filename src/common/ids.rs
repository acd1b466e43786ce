//! Newtype identifiers. Kept as thin wrappers (not bare integers) so a
//! page id can never be passed where a frame id or LSN is expected.

use std::fmt;

/// Signed so `-1` can mean "invalid" without a sentinel outside the type's
/// own range, matching the on-disk representation used by the page header.
pub type PageId = i32;
pub const INVALID_PAGE_ID: PageId = -1;

/// Index into the buffer pool's fixed frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Row identifier: the address of a tuple within a table heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Log sequence number: a strictly monotonic file offset into the WAL.
pub type Lsn = u64;
pub const INVALID_LSN: Lsn = 0;

/// Transaction identifier, monotonically increasing for the process
/// lifetime.
pub type TxnId = u64;

/// Table/index object id, monotonically increasing, never reused.
pub type Oid = u32;
