//! Sort — materializes the whole child then applies a stable comparator
//! honouring ASC/DESC per sort key (integer and string comparisons
//! differ, per the predicate evaluator's own comparison semantics).

use std::cmp::Ordering;

use crate::error::{EngineError, Result};
use crate::table::Schema;

use super::{Executor, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

pub struct Sort<'a> {
    child: Box<dyn Executor + 'a>,
    schema: Schema,
    keys: Vec<(usize, SortDirection)>,
    rows: Option<std::vec::IntoIter<Row>>,
}

impl<'a> Sort<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, schema: Schema, keys: Vec<SortKey>) -> Result<Self> {
        let resolved = keys
            .into_iter()
            .map(|k| {
                schema
                    .column_index(&k.column)
                    .map(|idx| (idx, k.direction))
                    .ok_or_else(|| EngineError::Execution(format!("unknown sort column {}", k.column)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            child,
            schema,
            keys: resolved,
            rows: None,
        })
    }
}

impl Executor for Sort<'_> {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        let mut rows = Vec::new();
        while let Some(row) = self.child.next()? {
            rows.push(row);
        }
        rows.sort_by(|a, b| {
            for (idx, dir) in &self.keys {
                let ord = a.values[*idx]
                    .compare(&b.values[*idx])
                    .unwrap_or(Ordering::Equal);
                let ord = match dir {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        self.rows = Some(rows.into_iter());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.as_mut().and_then(|r| r.next()))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
