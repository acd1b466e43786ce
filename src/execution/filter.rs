//! Filter — applies a `Predicate` to a child's output schema. The
//! single-table executors (SeqScan, Delete, Update) embed their own
//! predicate directly; this is the generalization a join needs once a
//! WHERE clause references columns from more than one side, since
//! there is no single table schema left to hand the predicate to.

use crate::error::Result;
use crate::table::Schema;

use super::{Executor, Predicate, Row};

pub struct Filter<'a> {
    child: Box<dyn Executor + 'a>,
    predicate: Predicate,
}

impl<'a> Filter<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, predicate: Predicate) -> Self {
        Self { child, predicate }
    }
}

impl Executor for Filter<'_> {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.child.next()? {
            if self.predicate.evaluate(self.child.output_schema(), &row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::seq_scan::SeqScan;
    use crate::table::Column;
    use crate::types::{Op, TypeId, Value};

    fn schema() -> Schema {
        Schema::new(vec![Column::new("id", TypeId::Integer)])
    }

    #[test]
    fn keeps_only_rows_the_predicate_accepts() {
        let rows = vec![vec![Value::Integer(1)], vec![Value::Integer(2)], vec![Value::Integer(3)]];
        let scan = SeqScan::over_rows(rows, schema(), Predicate::always_true());
        let predicate = Predicate::and(vec![super::super::predicate::Clause::new("id", Op::Gt, Value::Integer(1))]);
        let mut filter = Filter::new(Box::new(scan), predicate);
        filter.init().unwrap();
        let mut out = Vec::new();
        while let Some(row) = filter.next().unwrap() {
            out.push(row.values[0].clone());
        }
        assert_eq!(out, vec![Value::Integer(2), Value::Integer(3)]);
    }
}
