//! Aggregation — groups the child's rows by a `GROUP BY` column list and
//! maintains per-group COUNT/SUM/AVG/MIN/MAX accumulators. The group
//! table is a hash table keyed by the group columns' rendered values
//! (the data model calls for "a hash table in reimplementation" in
//! place of the original's linear-probe group array).

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::table::{Column, Schema};
use crate::types::{TypeId, Value};

use super::{Executor, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate to compute: `func` over `column` (ignored for `Count(*)`,
/// where `column` is `None`).
#[derive(Debug, Clone)]
pub struct AggSpec {
    pub func: AggFunc,
    pub column: Option<String>,
}

struct Accumulator {
    count: i64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
        }
    }

    fn update(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        self.count += 1;
        if let Value::Integer(v) = value {
            self.sum += *v as f64;
        } else if let Value::Decimal(v) = value {
            self.sum += v;
        }
        let replace_min = match &self.min {
            None => true,
            Some(m) => m.compare(value) == Some(std::cmp::Ordering::Greater),
        };
        if replace_min {
            self.min = Some(value.clone());
        }
        let replace_max = match &self.max {
            None => true,
            Some(m) => m.compare(value) == Some(std::cmp::Ordering::Less),
        };
        if replace_max {
            self.max = Some(value.clone());
        }
    }

    fn finish(&self, func: AggFunc) -> Value {
        match func {
            AggFunc::Count => Value::Integer(self.count),
            AggFunc::Sum => Value::Decimal(self.sum),
            AggFunc::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Decimal(self.sum / self.count as f64)
                }
            }
            AggFunc::Min => self.min.clone().unwrap_or(Value::Null),
            AggFunc::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

/// Renders a value for use as (part of) a group key — lossy for decimals
/// beyond the predicate's own 1e-4 tolerance, which is acceptable since
/// grouping, unlike comparison, needs exact bucketing, not a tolerance.
fn key_fragment(value: &Value) -> String {
    match value {
        Value::Null => "\u{0}N".to_string(),
        other => format!("{other}"),
    }
}

pub struct Aggregation<'a> {
    child: Box<dyn Executor + 'a>,
    group_cols: Vec<usize>,
    aggs: Vec<(AggFunc, Option<usize>)>,
    output_schema: Schema,
    groups: Option<std::vec::IntoIter<(Vec<Value>, Vec<Accumulator>)>>,
}

impl<'a> Aggregation<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        child_schema: &Schema,
        group_by: &[String],
        aggs: Vec<AggSpec>,
    ) -> Result<Self> {
        let group_cols = group_by
            .iter()
            .map(|c| {
                child_schema
                    .column_index(c)
                    .ok_or_else(|| EngineError::Execution(format!("unknown group column {c}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut resolved_aggs = Vec::with_capacity(aggs.len());
        let mut out_cols = Vec::new();
        for c in group_by {
            out_cols.push(
                child_schema
                    .column(c)
                    .cloned()
                    .unwrap_or_else(|| Column::new(c.clone(), TypeId::Varchar)),
            );
        }
        for spec in &aggs {
            let col_idx = match &spec.column {
                Some(name) => Some(
                    child_schema
                        .column_index(name)
                        .ok_or_else(|| EngineError::Execution(format!("unknown column {name}")))?,
                ),
                None => None,
            };
            resolved_aggs.push((spec.func, col_idx));
            let label = match (spec.func, &spec.column) {
                (AggFunc::Count, None) => "count".to_string(),
                (f, Some(name)) => format!("{f:?}_{name}").to_lowercase(),
                (f, None) => format!("{f:?}").to_lowercase(),
            };
            let out_type = match spec.func {
                AggFunc::Count => TypeId::Integer,
                _ => TypeId::Decimal,
            };
            out_cols.push(Column::new(label, out_type));
        }

        Ok(Self {
            child,
            group_cols,
            aggs: resolved_aggs,
            output_schema: Schema::new(out_cols),
            groups: None,
        })
    }
}

impl Executor for Aggregation<'_> {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        let mut table: HashMap<String, (Vec<Value>, Vec<Accumulator>)> = HashMap::new();
        while let Some(row) = self.child.next()? {
            let key_values: Vec<Value> = self.group_cols.iter().map(|&i| row.values[i].clone()).collect();
            let key = key_values.iter().map(key_fragment).collect::<Vec<_>>().join("\u{1}");
            let entry = table
                .entry(key)
                .or_insert_with(|| (key_values, self.aggs.iter().map(|_| Accumulator::new()).collect()));
            for (acc, (_, col_idx)) in entry.1.iter_mut().zip(&self.aggs) {
                match col_idx {
                    Some(idx) => acc.update(&row.values[*idx]),
                    None => acc.update(&Value::Integer(1)), // COUNT(*): every row counts
                }
            }
        }
        self.groups = Some(table.into_values().collect::<Vec<_>>().into_iter());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        let Some(groups) = self.groups.as_mut() else {
            return Ok(None);
        };
        let Some((key_values, accs)) = groups.next() else {
            return Ok(None);
        };
        let mut out = key_values;
        for (acc, (func, _)) in accs.iter().zip(&self.aggs) {
            out.push(acc.finish(*func));
        }
        Ok(Some(Row::new(out)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
