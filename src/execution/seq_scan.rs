//! SeqScan — walks a Table Heap (or a time-travel snapshot's row set,
//! plugged into the same "override slot") applying the WHERE predicate.

use crate::table::{Schema, TableHeap, TableIterator};
use crate::types::Value;

use super::{Executor, Predicate, Row};

/// Where SeqScan pulls its rows from. `Heap` is the normal path; `Rows`
/// is the override slot `SELECT ... AS OF <t>` plugs a pre-materialized
/// snapshot row set into, so the rest of the executor tree (predicate,
/// joins, aggregation) needs no awareness that it's reading history.
enum Source {
    Heap(TableIterator),
    Rows(std::vec::IntoIter<Vec<Value>>),
}

pub struct SeqScan {
    source: Source,
    schema: Schema,
    predicate: Predicate,
}

impl SeqScan {
    pub fn over_heap(heap: &TableHeap, schema: Schema, predicate: Predicate) -> Self {
        Self {
            source: Source::Heap(heap.iter()),
            schema,
            predicate,
        }
    }

    /// The time-travel override slot: scans a fixed, already-materialized
    /// row set (e.g. from `CheckpointManager::table_as_of`) instead of a
    /// live heap.
    pub fn over_rows(rows: Vec<Vec<Value>>, schema: Schema, predicate: Predicate) -> Self {
        Self {
            source: Source::Rows(rows.into_iter()),
            schema,
            predicate,
        }
    }

    fn next_candidate(&mut self) -> Option<Row> {
        match &mut self.source {
            Source::Heap(iter) => iter.next().map(|t| {
                let rid = t.rid;
                let values = t.values(&self.schema);
                match rid {
                    Some(rid) => Row::with_rid(values, rid),
                    None => Row::new(values),
                }
            }),
            Source::Rows(rows) => rows.next().map(Row::new),
        }
    }
}

impl Executor for SeqScan {
    fn init(&mut self) -> crate::error::Result<()> {
        Ok(())
    }

    fn next(&mut self) -> crate::error::Result<Option<Row>> {
        loop {
            let Some(row) = self.next_candidate() else {
                return Ok(None);
            };
            if self.predicate.evaluate(&self.schema, &row) {
                return Ok(Some(row));
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
    use crate::execution::Clause;
    use crate::buffer::BufferPool;
    use crate::log::LogManager;
    use crate::storage::{DiskManager, FreePageMap};
    use crate::table::{Column, Schema as TSchema};
    use crate::transaction::{LockManager, TransactionManager};
    use crate::types::{Op, TypeId};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn fixture() -> (TableHeap, TransactionManager, TSchema, tempfile::TempDir) {
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
        let heap = TableHeap::create(1, pool, free_map, log).unwrap();
        (heap, txn_manager, schema, dir)
    }

    #[test]
    fn scan_applies_predicate_and_survives_repeated_next() {
        let (heap, txn_manager, schema, _dir) = fixture();
        let txn = txn_manager.begin();
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            let tuple = crate::table::Tuple::from_values(
                &schema,
                &[Value::Integer(id), Value::Varchar(name.into())],
            )
            .unwrap();
            heap.insert(tuple.as_bytes(), &txn_manager, txn).unwrap();
        }
        txn_manager.commit(txn).unwrap();

        let pred = Predicate::and(vec![Clause::new("id", Op::Ge, Value::Integer(2))]);
        let mut scan = SeqScan::over_heap(&heap, schema, pred);
        let mut seen = Vec::new();
        while let Some(row) = scan.next().unwrap() {
            seen.push(row.values[0].clone());
        }
        assert_eq!(seen, vec![Value::Integer(2), Value::Integer(3)]);
        assert!(scan.next().unwrap().is_none());
    }
}
