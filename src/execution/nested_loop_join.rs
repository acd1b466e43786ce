//! NestedLoopJoin — materializes both children (each is already the root
//! of its own executor tree, so this is the one place a join touches
//! storage only indirectly, through its children) and probes the inner
//! side once per outer row. Outer-join variants track a per-inner-row
//! "matched" bitmap and emit a NULL-padded row for anything left
//! unmatched once the outer loop completes.

use crate::error::Result;
use crate::table::{Column, Schema};
use crate::types::Value;

use super::{Executor, Predicate, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

pub struct NestedLoopJoin<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    join_type: JoinType,
    predicate: Predicate,
    schema: Schema,
    left_width: usize,
    right_width: usize,

    left_rows: Vec<Row>,
    right_rows: Vec<Row>,
    right_matched: Vec<bool>,
    out: Vec<Row>,
    cursor: usize,
}

fn combined_schema(left: &Schema, right: &Schema) -> Schema {
    let mut cols: Vec<Column> = Vec::with_capacity(left.columns.len() + right.columns.len());
    cols.extend(left.columns.iter().cloned());
    cols.extend(right.columns.iter().cloned());
    Schema::new(cols)
}

fn combine(left: &[Value], right: &[Value]) -> Vec<Value> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    out.extend_from_slice(left);
    out.extend_from_slice(right);
    out
}

fn nulls(width: usize) -> Vec<Value> {
    vec![Value::Null; width]
}

impl<'a> NestedLoopJoin<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        join_type: JoinType,
        predicate: Predicate,
    ) -> Self {
        let schema = combined_schema(left.output_schema(), right.output_schema());
        let left_width = left.output_schema().columns.len();
        let right_width = right.output_schema().columns.len();
        Self {
            left,
            right,
            join_type,
            predicate,
            schema,
            left_width,
            right_width,
            left_rows: Vec::new(),
            right_rows: Vec::new(),
            right_matched: Vec::new(),
            out: Vec::new(),
            cursor: 0,
        }
    }

    fn matches(&self, l: &Row, r: &Row, combined_schema: &Schema) -> bool {
        let row = Row::new(combine(&l.values, &r.values));
        self.predicate.evaluate(combined_schema, &row)
    }
}

impl Executor for NestedLoopJoin<'_> {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;

        self.left_rows.clear();
        while let Some(row) = self.left.next()? {
            self.left_rows.push(row);
        }
        self.right_rows.clear();
        while let Some(row) = self.right.next()? {
            self.right_rows.push(row);
        }
        self.right_matched = vec![false; self.right_rows.len()];

        let combined_schema = self.schema.clone();
        let mut out = Vec::new();
        for l in &self.left_rows {
            let mut left_matched = false;
            for (i, r) in self.right_rows.iter().enumerate() {
                let is_match = match self.join_type {
                    JoinType::Cross => true,
                    _ => self.matches(l, r, &combined_schema),
                };
                if is_match {
                    left_matched = true;
                    self.right_matched[i] = true;
                    out.push(Row::new(combine(&l.values, &r.values)));
                }
            }
            if !left_matched && matches!(self.join_type, JoinType::Left | JoinType::Full) {
                out.push(Row::new(combine(&l.values, &nulls(self.right_width))));
            }
        }
        if matches!(self.join_type, JoinType::Right | JoinType::Full) {
            for (i, r) in self.right_rows.iter().enumerate() {
                if !self.right_matched[i] {
                    out.push(Row::new(combine(&nulls(self.left_width), &r.values)));
                }
            }
        }

        self.out = out;
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.cursor >= self.out.len() {
            return Ok(None);
        }
        let row = self.out[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(row))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
