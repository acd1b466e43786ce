//! Distinct — hashes each row's full column list (the same
//! concatenate-and-hash technique used for aggregation's group key) and
//! emits only the first row seen for a given key.

use std::collections::HashSet;

use crate::error::Result;
use crate::table::Schema;
use crate::types::Value;

use super::{Executor, Row};

fn key_fragment(value: &Value) -> String {
    match value {
        Value::Null => "\u{0}N".to_string(),
        other => format!("{other}"),
    }
}

pub struct Distinct<'a> {
    child: Box<dyn Executor + 'a>,
    seen: HashSet<String>,
}

impl<'a> Distinct<'a> {
    pub fn new(child: Box<dyn Executor + 'a>) -> Self {
        Self {
            child,
            seen: HashSet::new(),
        }
    }
}

impl Executor for Distinct<'_> {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.child.next()? {
            let key = row.values.iter().map(key_fragment).collect::<Vec<_>>().join("\u{1}");
            if self.seen.insert(key) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
