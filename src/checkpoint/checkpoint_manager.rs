//! §4.10 Checkpoint Manager — orchestrates periodic fuzzy checkpoints
//! (`CHECKPOINT_BEGIN`, one snapshot per table, `CHECKPOINT_END`) and
//! serves the two time-travel primitives built on top of the resulting
//! snapshot-plus-log history: read-only `AS OF` and destructive
//! `RECOVER TO`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::info;

use crate::buffer::BufferPool;
use crate::catalog::Catalog;
use crate::common::{Lsn, Oid, Rid, TxnId};
use crate::error::{EngineError, Result};
use crate::log::{LogManager, LogRecord, LogRecordBody};
use crate::storage::FreePageMap;
use crate::table::{Schema, TableHeap, Tuple};
use crate::transaction::TransactionManager;
use crate::types::Value;

use super::checkpoint_index::{CheckpointEntry, CheckpointIndex};
use super::table_snapshot::TableSnapshot;

/// Snapshots older than this count are pruned per table (§4.10's stated
/// default retention).
const DEFAULT_RETENTION: usize = 5;

pub struct CheckpointManager {
    buffer_pool: Arc<BufferPool>,
    free_map: Arc<Mutex<FreePageMap>>,
    log_manager: Arc<LogManager>,
    checkpoints_dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<CheckpointIndex>,
    retention: usize,
}

impl CheckpointManager {
    pub fn open(
        data_directory: impl AsRef<Path>,
        buffer_pool: Arc<BufferPool>,
        free_map: Arc<Mutex<FreePageMap>>,
        log_manager: Arc<LogManager>,
    ) -> Result<Self> {
        let data_directory = data_directory.as_ref();
        let index_path = data_directory.join("checkpoints.idx");
        let index = CheckpointIndex::load_from_file(&index_path)?;
        Ok(Self {
            buffer_pool,
            free_map,
            log_manager,
            checkpoints_dir: data_directory.join("checkpoints"),
            index_path,
            index: Mutex::new(index),
            retention: DEFAULT_RETENTION,
        })
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn latest_checkpoint(&self) -> Option<CheckpointEntry> {
        self.index.lock().unwrap().entries().last().copied()
    }

    /// Takes one fuzzy checkpoint: `CHECKPOINT_BEGIN`, a snapshot of
    /// every catalogued table, `CHECKPOINT_END` naming the transactions
    /// still active when the snapshot was taken, records it in the
    /// on-disk index, then prunes old snapshots.
    pub fn run_checkpoint(&self, catalog: &Catalog, txn_manager: &TransactionManager) -> Result<Lsn> {
        let mut begin = LogRecord::new(0, 0, now_micros(), LogRecordBody::CheckpointBegin);
        let begin_lsn = self.log_manager.append(&mut begin);
        let timestamp_us = now_micros();

        for name in catalog.list_tables() {
            let meta = catalog
                .get_table_by_name(&name)
                .expect("name just listed by the catalog");
            let heap = TableHeap::open(
                meta.oid,
                meta.first_page_id,
                self.buffer_pool.clone(),
                self.free_map.clone(),
                self.log_manager.clone(),
            );
            let rows: Vec<Vec<Value>> = heap.iter().map(|t| t.values(&meta.schema)).collect();
            let snapshot = TableSnapshot::new(&name, meta.schema.clone(), begin_lsn, timestamp_us, rows);
            snapshot.save_to_file(self.snapshot_path(begin_lsn, &name))?;
            catalog.update_checkpoint(meta.oid, begin_lsn, crate::common::INVALID_PAGE_ID);
        }

        let active_txns = txn_manager.active_txn_ids();
        let mut end = LogRecord::new(
            begin_lsn,
            0,
            now_micros(),
            LogRecordBody::CheckpointEnd { active_txns },
        );
        let end_lsn = self.log_manager.append(&mut end);
        self.log_manager.flush_to(end_lsn)?;

        {
            let mut index = self.index.lock().unwrap();
            index.add_checkpoint(CheckpointEntry {
                lsn: begin_lsn,
                timestamp_us,
                log_offset: end_lsn,
            });
            index.save_to_file(&self.index_path)?;
        }

        for name in catalog.list_tables() {
            self.cleanup_old_snapshots(&name)?;
        }

        info!("checkpoint {begin_lsn} complete, {timestamp_us}us");
        Ok(begin_lsn)
    }

    fn snapshot_path(&self, lsn: Lsn, table_name: &str) -> PathBuf {
        self.checkpoints_dir.join(lsn.to_string()).join(format!("{table_name}.snap"))
    }

    /// Deletes every `.snap` file for `table_name` beyond the
    /// `retention` most recent checkpoints, then removes any checkpoint
    /// directory left with nothing else in it.
    fn cleanup_old_snapshots(&self, table_name: &str) -> Result<()> {
        let mut lsns: Vec<Lsn> = {
            let index = self.index.lock().unwrap();
            index
                .entries()
                .iter()
                .map(|e| e.lsn)
                .filter(|&lsn| self.snapshot_path(lsn, table_name).exists())
                .collect()
        };
        lsns.sort_unstable();
        if lsns.len() <= self.retention {
            return Ok(());
        }
        let drop_count = lsns.len() - self.retention;
        for lsn in &lsns[..drop_count] {
            let path = self.snapshot_path(*lsn, table_name);
            let _ = std::fs::remove_file(&path);
            if let Some(dir) = path.parent() {
                let empty = std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false);
                if empty {
                    let _ = std::fs::remove_dir(dir);
                }
            }
        }
        Ok(())
    }

    /// Read-only reconstruction of `table_name`'s row set as it stood at
    /// `target_us`: the nearest snapshot at or before that time, replayed
    /// forward through every transaction committed at or before it.
    pub fn table_as_of(&self, catalog: &Catalog, table_name: &str, target_us: i64) -> Result<Vec<Vec<Value>>> {
        let meta = catalog
            .get_table_by_name(table_name)
            .ok_or_else(|| EngineError::Catalog(format!("unknown table {table_name}")))?;

        // If the nearest checkpoint's own snapshot for this table was
        // already pruned by retention, this falls back to a full replay
        // from the start of the log rather than walking further back to
        // an older surviving snapshot — acceptable since retention only
        // ever discards snapshots the log can still reconstruct.
        let nearest = self.index.lock().unwrap().find_nearest_before(target_us);
        let (mut rows, schema, since_lsn) = match nearest {
            Some(entry) => {
                let path = self.snapshot_path(entry.lsn, table_name);
                if path.exists() {
                    let snap = TableSnapshot::load_from_file(path)?;
                    (snap.rows, snap.schema, entry.lsn)
                } else {
                    (Vec::new(), meta.schema.clone(), 0)
                }
            }
            None => (Vec::new(), meta.schema.clone(), 0),
        };

        let records = self.log_manager.read_all()?;
        let committed = committed_by(&records, target_us);
        replay_rows(&records, &committed, meta.oid, &schema, since_lsn, target_us, &mut rows);
        Ok(rows)
    }

    /// Destructive point-in-time rollback: every catalogued table's live
    /// heap is rewritten to the row set `table_as_of` would compute for
    /// `target_us`, inside one transaction per table, and the WAL is then
    /// truncated past that point — a later crash-recovery pass can never
    /// resurrect what this just discarded.
    pub fn recover_to(&self, catalog: &Catalog, txn_manager: &TransactionManager, target_us: i64) -> Result<()> {
        let records = self.log_manager.read_all()?;
        let cut_lsn = records.iter().find(|r| r.timestamp_us > target_us).map(|r| r.lsn);

        for name in catalog.list_tables() {
            let target_rows = self.table_as_of(catalog, &name, target_us)?;
            let meta = catalog.get_table_by_name(&name).expect("listed by catalog");
            let heap = TableHeap::open(
                meta.oid,
                meta.first_page_id,
                self.buffer_pool.clone(),
                self.free_map.clone(),
                self.log_manager.clone(),
            );

            let txn = txn_manager.begin();
            let live: Vec<Rid> = heap.iter().filter_map(|t| t.rid).collect();
            for rid in live {
                heap.mark_delete(rid, txn_manager, txn)?;
            }
            for row in &target_rows {
                let tuple = Tuple::from_values(&meta.schema, row)?;
                heap.insert(tuple.as_bytes(), txn_manager, txn)?;
            }
            txn_manager.commit(txn)?;
        }

        if let Some(lsn) = cut_lsn {
            self.log_manager.truncate_to(lsn)?;
            info!("recover-to {target_us}us truncated the log at lsn {lsn}");
        }
        Ok(())
    }
}

fn committed_by(records: &[LogRecord], target_us: i64) -> HashSet<TxnId> {
    records
        .iter()
        .filter(|r| matches!(r.body, LogRecordBody::Commit) && r.timestamp_us <= target_us)
        .map(|r| r.txn_id)
        .collect()
}

/// Applies every committed `Insert`/`Update`/`ApplyDelete` for
/// `table_oid` after `since_lsn` and at or before `target_us` onto
/// `rows`, matching existing rows by primary key. Time travel replays
/// logically by value, unlike the RID-addressed physical replay crash
/// recovery uses (see `recovery::recovery_manager` and DESIGN.md): a
/// snapshot's rows carry no RID, only column values, so there is nothing
/// else to match on.
fn replay_rows(
    records: &[LogRecord],
    committed: &HashSet<TxnId>,
    table_oid: Oid,
    schema: &Schema,
    since_lsn: Lsn,
    target_us: i64,
    rows: &mut Vec<Vec<Value>>,
) {
    let Some(pk) = schema.primary_key_index() else {
        return; // no stable identity to merge updates/deletes by
    };
    for rec in records {
        if rec.lsn <= since_lsn || rec.timestamp_us > target_us || !committed.contains(&rec.txn_id) {
            continue;
        }
        match &rec.body {
            LogRecordBody::Insert { table_oid: oid, after, .. } if *oid == table_oid => {
                rows.push(Tuple::from_bytes(after.clone()).values(schema));
            }
            LogRecordBody::Update { table_oid: oid, after, .. } if *oid == table_oid => {
                let new_row = Tuple::from_bytes(after.clone()).values(schema);
                if let Some(existing) = rows.iter_mut().find(|r| r[pk] == new_row[pk]) {
                    *existing = new_row;
                } else {
                    rows.push(new_row);
                }
            }
            LogRecordBody::ApplyDelete { table_oid: oid, before, .. } if *oid == table_oid => {
                let deleted = Tuple::from_bytes(before.clone()).values(schema);
                rows.retain(|r| r[pk] != deleted[pk]);
            }
            _ => {}
        }
    }
}

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_micros() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use crate::table::Column;
    use crate::transaction::LockManager;
    use crate::types::TypeId;
    use tempfile::tempdir;

    fn fixture(
        dir: &Path,
    ) -> (Arc<BufferPool>, Arc<Mutex<FreePageMap>>, Arc<LogManager>, Arc<TransactionManager>) {
        let disk = Arc::new(DiskManager::open(dir.join("t.francodb"), None).unwrap());
        let bp = Arc::new(BufferPool::new(16, disk));
        let free_map = Arc::new(Mutex::new(FreePageMap::from_page_bytes(&[0u8; crate::common::PAGE_SIZE])));
        let lm = Arc::new(LogManager::open(dir.join("wal.log")).unwrap());
        bp.attach_wal(lm.clone() as Arc<dyn crate::buffer::WalSink>);
        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = Arc::new(TransactionManager::new(lm.clone(), lock_manager));
        (bp, free_map, lm, txn_manager)
    }

    #[test]
    fn checkpoint_then_as_of_matches_live_state() {
        let dir = tempdir().unwrap();
        let (bp, free_map, lm, txn_manager) = fixture(dir.path());
        let catalog = Catalog::new(bp.clone(), free_map.clone(), lm.clone());
        let schema = Schema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("name", TypeId::Varchar).with_max_len(32),
        ]);
        catalog.create_table("widgets", schema, Vec::new()).unwrap();
        let heap = TableHeap::open(
            catalog.table_oid("widgets").unwrap(),
            catalog.get_table_by_name("widgets").unwrap().first_page_id,
            bp.clone(),
            free_map.clone(),
            lm.clone(),
        );
        let txn = txn_manager.begin();
        let values = vec![Value::Integer(1), Value::Varchar("bolt".into())];
        let tuple = Tuple::from_values(&catalog.get_table_by_name("widgets").unwrap().schema, &values).unwrap();
        heap.insert(tuple.as_bytes(), &txn_manager, txn).unwrap();
        txn_manager.commit(txn).unwrap();

        let ckpt = CheckpointManager::open(dir.path(), bp.clone(), free_map.clone(), lm.clone()).unwrap();
        let lsn = ckpt.run_checkpoint(&catalog, &txn_manager).unwrap();
        assert!(lsn > 0);
        assert!(ckpt.latest_checkpoint().is_some());

        let rows = ckpt.table_as_of(&catalog, "widgets", now_micros()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Integer(1));
    }

    #[test]
    fn as_of_before_any_write_is_empty() {
        let dir = tempdir().unwrap();
        let (bp, free_map, lm, _txn_manager) = fixture(dir.path());
        let catalog = Catalog::new(bp.clone(), free_map.clone(), lm.clone());
        let schema = Schema::new(vec![Column::new("id", TypeId::Integer).primary_key()]);
        catalog.create_table("widgets", schema, Vec::new()).unwrap();

        let ckpt = CheckpointManager::open(dir.path(), bp, free_map, lm).unwrap();
        let rows = ckpt.table_as_of(&catalog, "widgets", 0).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn recover_to_rolls_back_a_later_insert() {
        let dir = tempdir().unwrap();
        let (bp, free_map, lm, txn_manager) = fixture(dir.path());
        let catalog = Catalog::new(bp.clone(), free_map.clone(), lm.clone());
        let schema = Schema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("name", TypeId::Varchar).with_max_len(32),
        ]);
        catalog.create_table("widgets", schema, Vec::new()).unwrap();
        let oid = catalog.table_oid("widgets").unwrap();
        let first_page_id = catalog.get_table_by_name("widgets").unwrap().first_page_id;
        let heap = TableHeap::open(oid, first_page_id, bp.clone(), free_map.clone(), lm.clone());

        let txn = txn_manager.begin();
        let tuple = Tuple::from_values(
            &catalog.get_table_by_name("widgets").unwrap().schema,
            &[Value::Integer(1), Value::Varchar("bolt".into())],
        )
        .unwrap();
        heap.insert(tuple.as_bytes(), &txn_manager, txn).unwrap();
        txn_manager.commit(txn).unwrap();

        let cutoff_us = now_micros();
        std::thread::sleep(std::time::Duration::from_millis(2));

        let txn2 = txn_manager.begin();
        let tuple2 = Tuple::from_values(
            &catalog.get_table_by_name("widgets").unwrap().schema,
            &[Value::Integer(2), Value::Varchar("nut".into())],
        )
        .unwrap();
        heap.insert(tuple2.as_bytes(), &txn_manager, txn2).unwrap();
        txn_manager.commit(txn2).unwrap();

        let ckpt = CheckpointManager::open(dir.path(), bp.clone(), free_map.clone(), lm.clone()).unwrap();
        ckpt.recover_to(&catalog, &txn_manager, cutoff_us).unwrap();

        let remaining: Vec<_> = heap.iter().collect();
        assert_eq!(remaining.len(), 1);
        let schema = catalog.get_table_by_name("widgets").unwrap().schema;
        assert_eq!(remaining[0].value_at(&schema, 0), Value::Integer(1));
    }
}
