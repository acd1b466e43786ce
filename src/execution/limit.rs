//! Limit — skips `offset` rows from the child, then yields at most
//! `limit` more before reporting exhaustion, regardless of how many the
//! child actually has left.

use crate::error::Result;
use crate::table::Schema;

use super::{Executor, Row};

pub struct Limit<'a> {
    child: Box<dyn Executor + 'a>,
    offset: u64,
    limit: Option<u64>,
    skipped: u64,
    emitted: u64,
}

impl<'a> Limit<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, limit: Option<u64>, offset: u64) -> Self {
        Self {
            child,
            offset,
            limit,
            skipped: 0,
            emitted: 0,
        }
    }
}

impl Executor for Limit<'_> {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                return Ok(None);
            }
        }
        while self.skipped < self.offset {
            if self.child.next()?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        let row = self.child.next()?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
