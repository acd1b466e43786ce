//! IndexScan — given an equality predicate on an indexed column, probes
//! the B+Tree for the matching RID(s) and fetches the tuple from the
//! heap instead of scanning every page.

use crate::error::Result;
use crate::index::BTreeIndex;
use crate::table::{Schema, TableHeap};
use crate::types::Value;

use super::{Executor, Row};

pub struct IndexScan {
    index: BTreeIndex,
    heap: TableHeap,
    schema: Schema,
    probe: Value,
    matches: Option<std::vec::IntoIter<crate::common::Rid>>,
}

impl IndexScan {
    pub fn new(index: BTreeIndex, heap: TableHeap, schema: Schema, probe: Value) -> Self {
        Self {
            index,
            heap,
            schema,
            probe,
            matches: None,
        }
    }
}

impl Executor for IndexScan {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// A probe value may match more than one RID when the indexed
    /// column isn't unique — every matching row is surfaced, one per
    /// `next()` call, same as a `SeqScan` over filtered rows would.
    fn next(&mut self) -> Result<Option<Row>> {
        let matches = match &mut self.matches {
            Some(m) => m,
            None => self.matches.insert(self.index.get(&self.probe)?.into_iter()),
        };
        loop {
            let Some(rid) = matches.next() else {
                return Ok(None);
            };
            if let Some(tuple) = self.heap.get(rid)? {
                return Ok(Some(Row::with_rid(tuple.values(&self.schema), rid)));
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::log::LogManager;
    use crate::storage::{DiskManager, FreePageMap};
    use crate::table::{Column, Schema as TSchema, Tuple};
    use crate::transaction::{LockManager, TransactionManager};
    use crate::types::TypeId;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[test]
    fn probes_exact_match_via_the_tree() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.francodb"), None).unwrap());
        let pool = Arc::new(BufferPool::new(16, disk));
        let free_map = Arc::new(Mutex::new(FreePageMap::from_page_bytes(
            &[0u8; crate::common::PAGE_SIZE],
        )));
        let log = Arc::new(LogManager::open(dir.path().join("wal.log")).unwrap());
        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = TransactionManager::new(Arc::clone(&log), lock_manager);
        let schema = TSchema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("name", TypeId::Varchar),
        ]);
        let heap = TableHeap::create(1, Arc::clone(&pool), Arc::clone(&free_map), Arc::clone(&log)).unwrap();
        let index = BTreeIndex::create(
            Arc::clone(&pool),
            Arc::clone(&free_map),
            TypeId::Integer,
            crate::index::DEFAULT_FAN_OUT,
        )
        .unwrap();

        let txn = txn_manager.begin();
        for (id, name) in [(1, "a"), (2, "b")] {
            let tuple =
                Tuple::from_values(&schema, &[Value::Integer(id), Value::Varchar(name.into())]).unwrap();
            let rid = heap.insert(tuple.as_bytes(), &txn_manager, txn).unwrap();
            index.insert(&Value::Integer(id), rid).unwrap();
        }
        txn_manager.commit(txn).unwrap();

        let mut scan = IndexScan::new(index, heap, schema, Value::Integer(2));
        let row = scan.next().unwrap().unwrap();
        assert_eq!(row.values[1], Value::Varchar("b".into()));
        assert!(scan.next().unwrap().is_none());
    }

    #[test]
    fn probes_every_match_on_a_non_unique_index() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.francodb"), None).unwrap());
        let pool = Arc::new(BufferPool::new(16, disk));
        let free_map = Arc::new(Mutex::new(FreePageMap::from_page_bytes(
            &[0u8; crate::common::PAGE_SIZE],
        )));
        let log = Arc::new(LogManager::open(dir.path().join("wal.log")).unwrap());
        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = TransactionManager::new(Arc::clone(&log), lock_manager);
        let schema = TSchema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("status", TypeId::Varchar),
        ]);
        let heap = TableHeap::create(1, Arc::clone(&pool), Arc::clone(&free_map), Arc::clone(&log)).unwrap();
        let index = BTreeIndex::create(
            Arc::clone(&pool),
            Arc::clone(&free_map),
            TypeId::Varchar,
            crate::index::DEFAULT_FAN_OUT,
        )
        .unwrap();

        let txn = txn_manager.begin();
        for (id, status) in [(1, "open"), (2, "open"), (3, "closed")] {
            let tuple =
                Tuple::from_values(&schema, &[Value::Integer(id), Value::Varchar(status.into())]).unwrap();
            let rid = heap.insert(tuple.as_bytes(), &txn_manager, txn).unwrap();
            index.insert(&Value::Varchar(status.into()), rid).unwrap();
        }
        txn_manager.commit(txn).unwrap();

        let mut scan = IndexScan::new(index, heap, schema, Value::Varchar("open".into()));
        let mut ids: Vec<Value> = Vec::new();
        while let Some(row) = scan.next().unwrap() {
            ids.push(row.values[0].clone());
        }
        ids.sort_by_key(|v| match v {
            Value::Integer(i) => *i,
            _ => unreachable!(),
        });
        assert_eq!(ids, vec![Value::Integer(1), Value::Integer(2)]);
    }
}
