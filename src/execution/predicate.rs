//! §4.11 Predicate evaluator — a conjunctive or disjunctive list of
//! `(column, op, literal)` clauses, shared by every executor with a
//! WHERE clause (SeqScan, IndexScan's probe key aside, Delete, Update).

use crate::table::Schema;
use crate::types::{Op, Value};

use super::Row;

#[derive(Debug, Clone)]
pub struct Clause {
    pub column: String,
    pub op: Op,
    pub literal: Value,
}

impl Clause {
    pub fn new(column: impl Into<String>, op: Op, literal: Value) -> Self {
        Self {
            column: column.into(),
            op,
            literal,
        }
    }
}

/// Whether the clause list is AND'd or OR'd together. A single clause
/// (or none) evaluates the same under either connective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub clauses: Vec<Clause>,
    pub connective: Connective,
}

impl Predicate {
    pub fn and(clauses: Vec<Clause>) -> Self {
        Self {
            clauses,
            connective: Connective::And,
        }
    }

    pub fn or(clauses: Vec<Clause>) -> Self {
        Self {
            clauses,
            connective: Connective::Or,
        }
    }

    /// Always-true predicate, for scans with no WHERE clause.
    pub fn always_true() -> Self {
        Self::and(Vec::new())
    }

    /// A clause naming an unknown column is treated as not satisfied,
    /// matching SQL's unknown-comparison rule for a missing operand.
    pub fn evaluate(&self, schema: &Schema, row: &Row) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        let mut results = self.clauses.iter().map(|c| {
            schema
                .column_index(&c.column)
                .map(|idx| c.op.evaluate(&row.values[idx], &c.literal))
                .unwrap_or(false)
        });
        match self.connective {
            Connective::And => results.all(|b| b),
            Connective::Or => results.any(|b| b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use crate::types::TypeId;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("name", TypeId::Varchar),
        ])
    }

    #[test]
    fn conjunction_requires_every_clause() {
        let schema = schema();
        let row = Row::new(vec![Value::Integer(5), Value::Varchar("bob".into())]);
        let pred = Predicate::and(vec![
            Clause::new("id", Op::Eq, Value::Integer(5)),
            Clause::new("name", Op::Eq, Value::Varchar("bob".into())),
        ]);
        assert!(pred.evaluate(&schema, &row));

        let pred = Predicate::and(vec![
            Clause::new("id", Op::Eq, Value::Integer(5)),
            Clause::new("name", Op::Eq, Value::Varchar("alice".into())),
        ]);
        assert!(!pred.evaluate(&schema, &row));
    }

    #[test]
    fn disjunction_requires_one_clause() {
        let schema = schema();
        let row = Row::new(vec![Value::Integer(5), Value::Varchar("bob".into())]);
        let pred = Predicate::or(vec![
            Clause::new("id", Op::Eq, Value::Integer(99)),
            Clause::new("name", Op::Eq, Value::Varchar("bob".into())),
        ]);
        assert!(pred.evaluate(&schema, &row));
    }

    #[test]
    fn empty_predicate_is_always_true() {
        let schema = schema();
        let row = Row::new(vec![Value::Integer(1), Value::Varchar("x".into())]);
        assert!(Predicate::always_true().evaluate(&schema, &row));
    }
}
