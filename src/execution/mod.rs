//! §4.11 Executor Iterators — Volcano-style operators that ride on top
//! of the Table Heap and B+Tree Index: each implements `init`/`next`
//! once, composition is a tree, and every iterator owns its children.
//! `next` returning `Ok(None)` means exhausted, per the data model's
//! `READY -> RUNNING -> FINISHED` state machine for the DML iterators.

pub mod aggregation;
pub mod delete_exec;
pub mod distinct;
pub mod filter;
pub mod foreign_keys;
pub mod index_scan;
pub mod insert_exec;
pub mod limit;
pub mod nested_loop_join;
pub mod predicate;
pub mod projection;
pub mod seq_scan;
pub mod sort;
pub mod update_exec;

use std::sync::{Arc, Mutex};

use crate::buffer::BufferPool;
use crate::catalog::{Catalog, IndexMetadata};
use crate::common::{Oid, PageId, Rid, TxnId};
use crate::error::Result;
use crate::index::BTreeIndex;
use crate::log::LogManager;
use crate::storage::FreePageMap;
use crate::table::{Schema, TableHeap};
use crate::transaction::{LockMode, Resource, TransactionManager};
use crate::types::Value;

pub use predicate::{Clause, Connective, Predicate};

/// One row flowing between executors: its column values, plus the heap
/// slot it came from when it has one. Literal rows built by `Insert` and
/// a join's synthesized NULL-filled side carry no RID.
#[derive(Debug, Clone)]
pub struct Row {
    pub values: Vec<Value>,
    pub rid: Option<Rid>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn with_rid(values: Vec<Value>, rid: Rid) -> Self {
        Self { values, rid: Some(rid) }
    }
}

/// State machine for the DML iterators (Insert/Delete/Update):
/// `Ready -> Running -> Finished`; `next` after `Finished` always
/// returns `Ok(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlState {
    Ready,
    Running,
    Finished,
}

/// `init` / `next` / `output_schema`, the data model's Volcano contract.
pub trait Executor {
    fn init(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<Row>>;
    fn output_schema(&self) -> &Schema;
}

/// Everything an executor needs to touch the storage stack, threaded in
/// explicitly rather than reached through a global singleton (the
/// arena+explicit-context REDESIGN FLAG applied to the executor layer).
pub struct ExecutionContext<'a> {
    pub catalog: &'a Catalog,
    pub buffer_pool: Arc<BufferPool>,
    pub free_map: Arc<Mutex<FreePageMap>>,
    pub log_manager: Arc<LogManager>,
    pub txn_manager: &'a TransactionManager,
    pub txn_id: TxnId,
}

impl<'a> ExecutionContext<'a> {
    pub fn open_heap(&self, oid: Oid, first_page_id: PageId) -> TableHeap {
        TableHeap::open(
            oid,
            first_page_id,
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.free_map),
            Arc::clone(&self.log_manager),
        )
    }

    pub fn open_index(&self, meta: &IndexMetadata) -> BTreeIndex {
        BTreeIndex::open(
            meta.root_page_id,
            meta.key_type,
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.free_map),
            crate::index::DEFAULT_FAN_OUT,
        )
    }

    pub fn lock_row(&self, rid: Rid, mode: LockMode) -> Result<()> {
        self.txn_manager.lock_row(self.txn_id, Resource::Row(rid), mode)
    }

    pub fn lock_table(&self, oid: Oid, mode: LockMode) -> Result<()> {
        self.txn_manager.lock_row(self.txn_id, Resource::Table(oid), mode)
    }
}
