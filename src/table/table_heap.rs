//! §4.5 Table Heap — a doubly-linked list of slotted table pages, plus
//! insert/get/delete and the forward iterator that rides on top.

use std::sync::{Arc, Mutex};

use crate::buffer::BufferPool;
use crate::common::{Lsn, Oid, PageId, Rid, INVALID_PAGE_ID};
use crate::error::Result;
use crate::log::{LogManager, LogRecord, LogRecordBody};
use crate::storage::{FreePageMap, TablePage};
use crate::transaction::{TransactionManager, UndoEntry, UndoOp};

use super::tuple::Tuple;

#[derive(Clone)]
pub struct TableHeap {
    pub table_oid: Oid,
    pub first_page_id: PageId,
    buffer_pool: Arc<BufferPool>,
    free_map: Arc<Mutex<FreePageMap>>,
    log_manager: Arc<LogManager>,
}

impl TableHeap {
    /// Creates a brand-new heap with a single empty head page.
    pub fn create(
        table_oid: Oid,
        buffer_pool: Arc<BufferPool>,
        free_map: Arc<Mutex<FreePageMap>>,
        log_manager: Arc<LogManager>,
    ) -> Result<Self> {
        let mut guard = buffer_pool.new_page(&free_map)?;
        let page_id = guard.page_id();
        let page = TablePage::new(page_id);
        guard[..].copy_from_slice(page.as_bytes());
        drop(guard);
        Ok(Self {
            table_oid,
            first_page_id: page_id,
            buffer_pool,
            free_map,
            log_manager,
        })
    }

    pub fn open(
        table_oid: Oid,
        first_page_id: PageId,
        buffer_pool: Arc<BufferPool>,
        free_map: Arc<Mutex<FreePageMap>>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self {
            table_oid,
            first_page_id,
            buffer_pool,
            free_map,
            log_manager,
        }
    }

    fn read_table_page(&self, page_id: PageId) -> Result<TablePage> {
        let guard = self.buffer_pool.fetch_page_read(page_id)?;
        Ok(TablePage::from_bytes(page_id, *guard))
    }

    /// Walks from `first_page_id`, allocating a successor page when the
    /// tail is full, per the data model's exact retry protocol.
    pub fn insert(
        &self,
        data: &[u8],
        txn_manager: &TransactionManager,
        txn_id: u64,
    ) -> Result<Rid> {
        let mut page_id = self.first_page_id;
        loop {
            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            let mut page = TablePage::from_bytes(page_id, *guard);
            if let Some(slot) = page.insert(data)? {
                let rid = page.rid(slot);
                let lsn = self.append_insert_log(txn_manager, txn_id, rid, data);
                page.set_page_lsn(lsn);
                guard[..].copy_from_slice(page.as_bytes());
                guard.set_page_lsn(lsn);
                txn_manager.record_undo(
                    txn_id,
                    UndoEntry {
                        rid,
                        table_oid: self.table_oid,
                        // the "before image" of an insert's undo is the
                        // inserted row itself: the CLR needs it to log
                        // an ApplyDelete that removes exactly this tuple.
                        before_image: data.to_vec(),
                        op: UndoOp::Insert,
                        lsn,
                    },
                );
                return Ok(rid);
            }

            let next = page.next_page_id();
            if next != INVALID_PAGE_ID {
                page_id = next;
                continue;
            }

            // Page full and it's the tail: allocate a new page with no
            // latch held, then re-verify before linking it in.
            drop(guard);
            let mut new_guard = self.buffer_pool.new_page(&self.free_map)?;
            let new_page_id = new_guard.page_id();

            let mut tail_guard = self.buffer_pool.fetch_page_write(page_id)?;
            let mut tail_page = TablePage::from_bytes(page_id, *tail_guard);
            if tail_page.next_page_id() != INVALID_PAGE_ID {
                // someone else grew the heap already; retry on their successor
                self.free_map.lock().unwrap().deallocate(new_page_id);
                page_id = tail_page.next_page_id();
                continue;
            }
            let mut new_page = TablePage::new(new_page_id);
            new_page.set_prev(page_id);
            tail_page.set_next(new_page_id);
            tail_guard[..].copy_from_slice(tail_page.as_bytes());
            new_guard[..].copy_from_slice(new_page.as_bytes());
            page_id = new_page_id;
        }
    }

    fn append_insert_log(
        &self,
        txn_manager: &TransactionManager,
        txn_id: u64,
        rid: Rid,
        data: &[u8],
    ) -> Lsn {
        let prev_lsn = txn_manager.prev_lsn(txn_id);
        let mut rec = LogRecord::new(
            prev_lsn,
            txn_id,
            now_micros(),
            LogRecordBody::Insert {
                rid,
                table_oid: self.table_oid,
                after: data.to_vec(),
            },
        );
        self.log_manager.append(&mut rec)
    }

    pub fn get(&self, rid: Rid) -> Result<Option<Tuple>> {
        let page = self.read_table_page(rid.page_id)?;
        Ok(page.tuple_at(rid.slot))
    }

    /// Flips the slot to a tombstone, logging an APPLY_DELETE with the
    /// full before-image for undo/redo.
    pub fn mark_delete(
        &self,
        rid: Rid,
        txn_manager: &TransactionManager,
        txn_id: u64,
    ) -> Result<bool> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = TablePage::from_bytes(rid.page_id, *guard);
        let Some(before) = page.get(rid.slot).map(|b| b.to_vec()) else {
            return Ok(false);
        };
        if !page.mark_delete(rid.slot) {
            return Ok(false);
        }
        let prev_lsn = txn_manager.prev_lsn(txn_id);
        let mut rec = LogRecord::new(
            prev_lsn,
            txn_id,
            now_micros(),
            LogRecordBody::ApplyDelete {
                rid,
                table_oid: self.table_oid,
                before: before.clone(),
            },
        );
        let lsn = self.log_manager.append(&mut rec);
        page.set_page_lsn(lsn);
        guard[..].copy_from_slice(page.as_bytes());
        guard.set_page_lsn(lsn);
        txn_manager.record_undo(
            txn_id,
            UndoEntry {
                rid,
                table_oid: self.table_oid,
                before_image: before,
                op: UndoOp::ApplyDelete,
                lsn,
            },
        );
        Ok(true)
    }

    /// Clones the heap's (cheap: two ints plus three `Arc`s) handle into
    /// a freestanding iterator, so a scan can outlive the borrow that
    /// created it and be held across repeated `Executor::next` calls.
    pub fn iter(&self) -> super::table_iterator::TableIterator {
        super::table_iterator::TableIterator::new(self.clone())
    }

    pub(super) fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }
}

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_micros() as i64
}
