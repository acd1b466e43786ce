//! §6 SQL surface — a tagged `Statement` AST. The engine's contract is
//! this AST, not a grammar; `parser` is a narrow reader over the literal
//! SQL forms used by clients, not a general dialect parser.

use crate::execution::aggregation::AggSpec;
use crate::execution::nested_loop_join::JoinType;
use crate::execution::sort::SortKey;
use crate::execution::Predicate;
use crate::table::Column;
use crate::types::Value;

#[derive(Debug, Clone)]
pub struct CreateTableStatement {
    pub table: String,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<crate::catalog::ForeignKey>,
}

#[derive(Debug, Clone)]
pub struct CreateIndexStatement {
    pub index_name: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: String,
    pub join_type: JoinType,
    pub predicate: Predicate,
}

#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub table: String,
    pub joins: Vec<JoinClause>,
    pub columns: Vec<String>, // empty means `*`
    pub predicate: Predicate,
    pub group_by: Vec<String>,
    pub aggregates: Vec<AggSpec>,
    pub distinct: bool,
    pub order_by: Vec<SortKey>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub as_of: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>, // empty means "every column, in schema order"
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub predicate: Predicate,
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub table: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone)]
pub struct CreateUserStatement {
    pub username: String,
    pub password: String,
    pub is_root: bool,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateTable(CreateTableStatement),
    CreateIndex(CreateIndexStatement),
    Drop(String),
    CreateDatabase(String),
    UseDatabase(String),
    DropDatabase(String),
    Begin,
    Commit,
    Rollback,
    Checkpoint,
    RecoverTo(i64),
    CreateUser(CreateUserStatement),
    DropUser(String),
    /// `SHOW`/`EXPLAIN`/`PRAGMA` — inert, carried for protocol
    /// completeness but not executed against a query plan.
    Show(String),
    Explain(Box<Statement>),
    Pragma(String),
}
