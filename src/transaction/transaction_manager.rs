//! §4.9 Transaction Manager — begin/commit/abort paths, owning the live
//! transaction table the Lock Manager and Recovery Manager both read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::common::TxnId;
use crate::error::Result;
use crate::log::{CompensationOp, LogManager, LogRecord, LogRecordBody};

use super::lock_manager::{LockManager, Resource};
use super::transaction::{LockRef, Transaction, TxnState, UndoOp};

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_micros() as i64
}

pub struct TransactionManager {
    next_id: AtomicU64,
    active: Mutex<HashMap<TxnId, Transaction>>,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            log_manager,
            lock_manager,
        }
    }

    pub fn begin(&self) -> TxnId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut txn = Transaction::new(id, now_micros());
        let mut rec = LogRecord::new(0, id, txn.started_at_us, LogRecordBody::Begin);
        let lsn = self.log_manager.append(&mut rec);
        txn.prev_lsn = lsn;
        self.active.lock().unwrap().insert(id, txn);
        id
    }

    pub fn lock_row(&self, txn_id: TxnId, resource: Resource, mode: super::lock_manager::LockMode) -> Result<()> {
        self.lock_manager.acquire(txn_id, resource, mode)?;
        let mut active = self.active.lock().unwrap();
        if let Some(txn) = active.get_mut(&txn_id) {
            let lock_ref = match resource {
                Resource::Row(rid) => LockRef::Row(rid),
                Resource::Table(oid) => LockRef::Table(oid),
            };
            txn.locks_held.push(lock_ref);
        }
        Ok(())
    }

    pub fn record_undo(&self, txn_id: TxnId, entry: super::transaction::UndoEntry) {
        if let Some(txn) = self.active.lock().unwrap().get_mut(&txn_id) {
            txn.push_undo(entry);
        }
    }

    pub fn prev_lsn(&self, txn_id: TxnId) -> crate::common::Lsn {
        self.active
            .lock()
            .unwrap()
            .get(&txn_id)
            .map(|t| t.prev_lsn)
            .unwrap_or(0)
    }

    /// Commit path: write COMMIT, `flush_to(commit_lsn)`, release locks.
    pub fn commit(&self, txn_id: TxnId) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        let Some(txn) = active.get_mut(&txn_id) else {
            return Ok(());
        };
        txn.begin_shrinking();
        let mut rec = LogRecord::new(txn.prev_lsn, txn_id, now_micros(), LogRecordBody::Commit);
        let lsn = self.log_manager.append(&mut rec);
        self.log_manager.flush_to(lsn)?;
        txn.state = TxnState::Committed;
        let resources = resources_of(txn);
        drop(active);
        self.lock_manager.release_all(txn_id, &resources);
        info!("txn {txn_id} committed at lsn {lsn}");
        Ok(())
    }

    /// Abort path: caller supplies the undo closure since reversing an
    /// entry means touching the table heap, which this module does not
    /// depend on (kept decoupled from `table`/`catalog`).
    pub fn abort(
        &self,
        txn_id: TxnId,
        mut undo: impl FnMut(&super::transaction::UndoEntry) -> Result<()>,
    ) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        let Some(txn) = active.get_mut(&txn_id) else {
            return Ok(());
        };
        if txn.state == TxnState::Committed {
            warn!("ignoring abort of already-committed txn {txn_id}");
            return Ok(());
        }
        if txn.state == TxnState::Aborted {
            return Ok(()); // abort is idempotent
        }

        let undo_list = std::mem::take(&mut txn.undo_list);
        for entry in undo_list.iter().rev() {
            undo(entry)?;
            // Undoing an Insert deletes the row; undoing an ApplyDelete or
            // an Update restores the before-image. Either way the CLR
            // records the physical action taken, not which kind of record
            // it compensates for, so redo can replay it without context.
            let op = match entry.op {
                UndoOp::Insert => CompensationOp::Delete,
                UndoOp::ApplyDelete | UndoOp::Update => {
                    CompensationOp::Reinsert(entry.before_image.clone())
                }
            };
            let mut clr = LogRecord::new(
                txn.prev_lsn,
                txn_id,
                now_micros(),
                LogRecordBody::Clr {
                    compensates: entry.lsn,
                    rid: entry.rid,
                    table_oid: entry.table_oid,
                    op,
                },
            );
            txn.prev_lsn = self.log_manager.append(&mut clr);
        }

        let mut rec = LogRecord::new(txn.prev_lsn, txn_id, now_micros(), LogRecordBody::Abort);
        let lsn = self.log_manager.append(&mut rec);
        self.log_manager.flush_to(lsn)?;
        txn.state = TxnState::Aborted;
        txn.aborts_count += 1;
        let resources = resources_of(txn);
        drop(active);
        self.lock_manager.release_all(txn_id, &resources);
        Ok(())
    }

    pub fn is_active(&self, txn_id: TxnId) -> bool {
        self.active
            .lock()
            .unwrap()
            .get(&txn_id)
            .map(|t| t.is_active())
            .unwrap_or(false)
    }

    /// Every transaction still active right now — read by the Checkpoint
    /// Manager so a fuzzy checkpoint's `CHECKPOINT_END` record names
    /// exactly who was in flight when the snapshot was taken.
    pub fn active_txn_ids(&self) -> Vec<TxnId> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| t.is_active())
            .map(|(id, _)| *id)
            .collect()
    }
}

fn resources_of(txn: &Transaction) -> Vec<Resource> {
    txn.locks_held
        .iter()
        .map(|l| match l {
            LockRef::Row(rid) => Resource::Row(*rid),
            LockRef::Table(oid) => Resource::Table(*oid),
        })
        .collect()
}
