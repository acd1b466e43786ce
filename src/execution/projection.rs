//! Projection — narrows a child's rows to a named column list, in the
//! order named. `SELECT *` never builds one of these; the planner only
//! reaches for it when the statement names specific columns.

use crate::error::{EngineError, Result};
use crate::table::{Column, Schema};

use super::{Executor, Row};

pub struct Projection<'a> {
    child: Box<dyn Executor + 'a>,
    indices: Vec<usize>,
    schema: Schema,
}

impl<'a> Projection<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, columns: &[String]) -> Result<Self> {
        let child_schema = child.output_schema();
        let mut indices = Vec::with_capacity(columns.len());
        let mut out_cols: Vec<Column> = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = child_schema
                .column_index(name)
                .ok_or_else(|| EngineError::Execution(format!("unknown column {name}")))?;
            indices.push(idx);
            out_cols.push(child_schema.columns[idx].clone());
        }
        let schema = Schema::new(out_cols);
        Ok(Self { child, indices, schema })
    }
}

impl Executor for Projection<'_> {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        let Some(row) = self.child.next()? else {
            return Ok(None);
        };
        let values = self.indices.iter().map(|&i| row.values[i].clone()).collect();
        Ok(Some(Row { values, rid: row.rid }))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::seq_scan::SeqScan;
    use crate::execution::Predicate;
    use crate::types::{TypeId, Value};

    #[test]
    fn reorders_and_narrows_columns() {
        let schema = Schema::new(vec![
            Column::new("id", TypeId::Integer),
            Column::new("name", TypeId::Varchar),
        ]);
        let rows = vec![vec![Value::Integer(1), Value::Varchar("a".into())]];
        let scan = SeqScan::over_rows(rows, schema, Predicate::always_true());
        let mut proj = Projection::new(Box::new(scan), &["name".to_string()]).unwrap();
        proj.init().unwrap();
        let row = proj.next().unwrap().unwrap();
        assert_eq!(row.values, vec![Value::Varchar("a".into())]);
        assert!(proj.next().unwrap().is_none());
    }
}
