//! §3 Table Metadata / Index Metadata — owned by the Catalog, not by the
//! heap or the index itself.

use crate::common::{Lsn, Oid, PageId, INVALID_LSN, INVALID_PAGE_ID};
use crate::table::Schema;
use crate::types::TypeId;

use super::foreign_key::ForeignKey;

/// Lifecycle: created by `CREATE TABLE` (which allocates the first heap
/// page), mutated by `ALTER`, destroyed by `DROP` (which frees every page
/// via the bitmap and erases the catalog entries).
#[derive(Clone)]
pub struct TableMetadata {
    pub name: String,
    pub oid: Oid,
    pub schema: Schema,
    pub first_page_id: PageId,
    pub foreign_keys: Vec<ForeignKey>,
    pub last_checkpoint_lsn: Lsn,
    pub checkpoint_snapshot_page_id: PageId,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, oid: Oid, schema: Schema, first_page_id: PageId) -> Self {
        Self {
            name: name.into(),
            oid,
            schema,
            first_page_id,
            foreign_keys: Vec::new(),
            last_checkpoint_lsn: INVALID_LSN,
            checkpoint_snapshot_page_id: INVALID_PAGE_ID,
        }
    }
}

/// A clustered B+Tree rooted at `root_page_id`, keyed on one column of
/// the indexed table. Leaf values are RIDs pointing back into the heap.
#[derive(Clone)]
pub struct IndexMetadata {
    pub name: String,
    pub table_name: String,
    pub indexed_column: String,
    pub root_page_id: PageId,
    pub key_type: TypeId,
}

impl IndexMetadata {
    pub fn new(
        name: impl Into<String>,
        table_name: impl Into<String>,
        indexed_column: impl Into<String>,
        root_page_id: PageId,
        key_type: TypeId,
    ) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            indexed_column: indexed_column.into(),
            root_page_id,
            key_type,
        }
    }
}
