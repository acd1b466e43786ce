//! Delete — scans the child for candidates, then re-verifies each under
//! the owning transaction before removing it from every index and
//! tombstoning it in the heap. A candidate another transaction already
//! removed is silently skipped, not an error.

use crate::catalog::TableMetadata;
use crate::error::Result;
use crate::table::Schema;
use crate::transaction::LockMode;

use super::{foreign_keys, DmlState, Executor, ExecutionContext, Row};

pub struct Delete<'a> {
    ctx: &'a ExecutionContext<'a>,
    meta: TableMetadata,
    child: Box<dyn Executor + 'a>,
    state: DmlState,
    deleted_count: u64,
}

impl<'a> Delete<'a> {
    pub fn new(ctx: &'a ExecutionContext<'a>, meta: TableMetadata, child: Box<dyn Executor + 'a>) -> Self {
        Self {
            ctx,
            meta,
            child,
            state: DmlState::Ready,
            deleted_count: 0,
        }
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted_count
    }
}

impl Executor for Delete<'_> {
    fn init(&mut self) -> Result<()> {
        self.state = DmlState::Running;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.state == DmlState::Finished {
            return Ok(None);
        }

        while let Some(candidate) = self.child.next()? {
            let Some(rid) = candidate.rid else {
                continue;
            };
            self.ctx.lock_row(rid, LockMode::Exclusive)?;

            // Re-verify: another transaction may have deleted this row
            // between the scan and the lock grant.
            let heap = self.ctx.open_heap(self.meta.oid, self.meta.first_page_id);
            if heap.get(rid)?.is_none() {
                continue;
            }

            foreign_keys::validate_delete(self.ctx, &self.meta.name, &candidate.values)?;

            for ix_meta in self.ctx.catalog.indexes_for_table(&self.meta.name) {
                let Some(col_idx) = self.meta.schema.column_index(&ix_meta.indexed_column) else {
                    continue;
                };
                let index = self.ctx.open_index(&ix_meta);
                index.delete(&candidate.values[col_idx], rid)?;
            }

            if heap.mark_delete(rid, self.ctx.txn_manager, self.ctx.txn_id)? {
                self.deleted_count += 1;
                return Ok(Some(candidate));
            }
        }

        self.state = DmlState::Finished;
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.meta.schema
    }
}
