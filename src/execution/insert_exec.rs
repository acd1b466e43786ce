//! Insert — single-shot: builds the tuple from literal values, inserts
//! into the heap, then updates every index on the table. `next` returns
//! `false` after one call, per the DML state machine.

use crate::catalog::TableMetadata;
use crate::error::Result;
use crate::table::{Schema, Tuple};
use crate::transaction::LockMode;
use crate::types::Value;

use super::{foreign_keys, DmlState, Executor, ExecutionContext, Row};

pub struct Insert<'a> {
    ctx: &'a ExecutionContext<'a>,
    meta: TableMetadata,
    values: Vec<Value>,
    state: DmlState,
}

impl<'a> Insert<'a> {
    pub fn new(ctx: &'a ExecutionContext<'a>, meta: TableMetadata, values: Vec<Value>) -> Self {
        Self {
            ctx,
            meta,
            values,
            state: DmlState::Ready,
        }
    }
}

impl Executor for Insert<'_> {
    fn init(&mut self) -> Result<()> {
        self.state = DmlState::Running;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.state == DmlState::Finished {
            return Ok(None);
        }
        self.state = DmlState::Finished;

        foreign_keys::validate_insert(self.ctx, &self.meta.name, &self.values)?;

        self.ctx.lock_table(self.meta.oid, LockMode::Exclusive)?;
        let tuple = Tuple::from_values(&self.meta.schema, &self.values)?;
        let heap = self.ctx.open_heap(self.meta.oid, self.meta.first_page_id);
        let rid = heap.insert(tuple.as_bytes(), self.ctx.txn_manager, self.ctx.txn_id)?;

        for ix_meta in self.ctx.catalog.indexes_for_table(&self.meta.name) {
            let Some(col_idx) = self.meta.schema.column_index(&ix_meta.indexed_column) else {
                continue;
            };
            let index = self.ctx.open_index(&ix_meta);
            index.insert(&self.values[col_idx], rid)?;
            self.ctx.catalog.update_index_root(&ix_meta.name, index.root_page_id());
        }

        Ok(Some(Row::with_rid(self.values.clone(), rid)))
    }

    fn output_schema(&self) -> &Schema {
        &self.meta.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::catalog::Catalog;
    use crate::log::LogManager;
    use crate::storage::{DiskManager, FreePageMap};
    use crate::table::Column;
    use crate::transaction::{LockManager, TransactionManager};
    use crate::types::TypeId;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[test]
    fn insert_populates_heap_and_index() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.francodb"), None).unwrap());
        let pool = Arc::new(BufferPool::new(16, disk));
        let free_map = Arc::new(Mutex::new(FreePageMap::from_page_bytes(
            &[0u8; crate::common::PAGE_SIZE],
        )));
        let log = Arc::new(LogManager::open(dir.path().join("wal.log")).unwrap());
        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = TransactionManager::new(Arc::clone(&log), lock_manager);
        let catalog = Catalog::new(Arc::clone(&pool), Arc::clone(&free_map), Arc::clone(&log));

        let schema = crate::table::Schema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("name", TypeId::Varchar),
        ]);
        let oid = catalog.create_table("widgets", schema, Vec::new()).unwrap();
        let meta = catalog.get_table(oid).unwrap();
        let root = crate::index::BTreeIndex::create(
            Arc::clone(&pool),
            Arc::clone(&free_map),
            TypeId::Integer,
            crate::index::DEFAULT_FAN_OUT,
        )
        .unwrap()
        .root_page_id();
        catalog
            .register_index("widgets_id_idx", "widgets", "id", root, TypeId::Integer)
            .unwrap();

        let txn = txn_manager.begin();
        let ctx = ExecutionContext {
            catalog: &catalog,
            buffer_pool: Arc::clone(&pool),
            free_map: Arc::clone(&free_map),
            log_manager: Arc::clone(&log),
            txn_manager: &txn_manager,
            txn_id: txn,
        };
        let mut insert = Insert::new(
            &ctx,
            meta,
            vec![Value::Integer(7), Value::Varchar("gadget".into())],
        );
        insert.init().unwrap();
        let row = insert.next().unwrap().unwrap();
        assert_eq!(row.values[0], Value::Integer(7));
        assert!(insert.next().unwrap().is_none());

        let ix_meta = catalog.get_index("widgets_id_idx").unwrap();
        let index = crate::index::BTreeIndex::open(
            ix_meta.root_page_id,
            TypeId::Integer,
            pool,
            free_map,
            crate::index::DEFAULT_FAN_OUT,
        );
        assert_eq!(index.get(&Value::Integer(7)).unwrap(), vec![row.rid.unwrap()]);
    }
}
