//! Update — same collect/verify pattern as Delete: for each verified
//! tuple, rebuild the new tuple with its `SET` columns replaced, remove
//! the old key from every index, remove from heap, insert the new
//! tuple and index its new key.

use crate::catalog::TableMetadata;
use crate::error::Result;
use crate::table::{Schema, Tuple};
use crate::transaction::LockMode;
use crate::types::Value;

use super::{foreign_keys, DmlState, Executor, ExecutionContext, Row};

pub struct Update<'a> {
    ctx: &'a ExecutionContext<'a>,
    meta: TableMetadata,
    child: Box<dyn Executor + 'a>,
    assignments: Vec<(usize, Value)>,
    state: DmlState,
}

impl<'a> Update<'a> {
    /// `assignments` are `(column name, new literal value)` pairs; an
    /// unknown column name is an execution error at construction time.
    pub fn new(
        ctx: &'a ExecutionContext<'a>,
        meta: TableMetadata,
        child: Box<dyn Executor + 'a>,
        assignments: Vec<(String, Value)>,
    ) -> Result<Self> {
        let resolved = assignments
            .into_iter()
            .map(|(col, v)| {
                meta.schema
                    .column_index(&col)
                    .map(|idx| (idx, v))
                    .ok_or_else(|| crate::error::EngineError::Execution(format!("unknown column {col}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ctx,
            meta,
            child,
            assignments: resolved,
            state: DmlState::Ready,
        })
    }
}

impl Executor for Update<'_> {
    fn init(&mut self) -> Result<()> {
        self.state = DmlState::Running;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.state == DmlState::Finished {
            return Ok(None);
        }

        while let Some(candidate) = self.child.next()? {
            let Some(old_rid) = candidate.rid else {
                continue;
            };
            self.ctx.lock_row(old_rid, LockMode::Exclusive)?;

            let heap = self.ctx.open_heap(self.meta.oid, self.meta.first_page_id);
            if heap.get(old_rid)?.is_none() {
                continue; // concurrently deleted since the scan; skip
            }

            let mut new_values = candidate.values.clone();
            for (idx, v) in &self.assignments {
                new_values[*idx] = v.clone();
            }

            foreign_keys::validate_update(self.ctx, &self.meta.name, &candidate.values, &new_values)?;

            let indexes = self.ctx.catalog.indexes_for_table(&self.meta.name);
            for ix_meta in &indexes {
                let Some(col_idx) = self.meta.schema.column_index(&ix_meta.indexed_column) else {
                    continue;
                };
                if candidate.values[col_idx] == new_values[col_idx] {
                    continue;
                }
                let index = self.ctx.open_index(ix_meta);
                index.delete(&candidate.values[col_idx], old_rid)?;
            }

            heap.mark_delete(old_rid, self.ctx.txn_manager, self.ctx.txn_id)?;
            let new_tuple = Tuple::from_values(&self.meta.schema, &new_values)?;
            let new_rid = heap.insert(new_tuple.as_bytes(), self.ctx.txn_manager, self.ctx.txn_id)?;

            for ix_meta in &indexes {
                let Some(col_idx) = self.meta.schema.column_index(&ix_meta.indexed_column) else {
                    continue;
                };
                if candidate.values[col_idx] == new_values[col_idx] {
                    continue;
                }
                let index = self.ctx.open_index(ix_meta);
                index.insert(&new_values[col_idx], new_rid)?;
                self.ctx.catalog.update_index_root(&ix_meta.name, index.root_page_id());
            }

            return Ok(Some(Row::with_rid(new_values, new_rid)));
        }

        self.state = DmlState::Finished;
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.meta.schema
    }
}
