//! §6/SPEC_FULL §D SQL reader — a minimal recursive-descent reader over
//! the statement forms used by clients, not a general SQL dialect
//! parser (that dialect is the out-of-scope Parser collaborator).
//! `sqlparser`'s tokenizer does the lexing (numbers, quoted strings,
//! comparison operators) so literal/operator scanning isn't hand-rolled;
//! the grammar above the token stream is this module's own.

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{EngineError, Result};
use crate::execution::aggregation::{AggFunc, AggSpec};
use crate::execution::nested_loop_join::JoinType;
use crate::execution::sort::{SortDirection, SortKey};
use crate::execution::{Clause, Connective, Predicate};
use crate::table::Column;
use crate::types::{Op, TypeId, Value};

use super::ast::*;

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| EngineError::Parse(e.to_string()))?;
    Ok(tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect())
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// True (and consumes) if the next token is a `Word` matching `kw`
    /// case-insensitively; false (no consumption) otherwise.
    fn eat_keyword(&mut self, kw: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.value.eq_ignore_ascii_case(kw) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(EngineError::Parse(format!("expected keyword {kw}")))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Word(w)) => Ok(w.value),
            other => Err(EngineError::Parse(format!("expected an identifier, found {other:?}"))),
        }
    }

    fn expect_punct(&mut self, tok: &Token) -> Result<()> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(EngineError::Parse(format!("expected {tok:?}")))
        }
    }

    fn eat_punct(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn literal(cur: &mut Cursor) -> Result<Value> {
    match cur.advance() {
        Some(Token::Number(s, _)) => {
            if s.contains('.') {
                s.parse::<f64>()
                    .map(Value::Decimal)
                    .map_err(|_| EngineError::Parse(format!("bad number literal {s}")))
            } else {
                s.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| EngineError::Parse(format!("bad integer literal {s}")))
            }
        }
        Some(Token::SingleQuotedString(s)) => Ok(Value::Varchar(s)),
        Some(Token::Minus) => match cur.advance() {
            Some(Token::Number(s, _)) => {
                if s.contains('.') {
                    s.parse::<f64>()
                        .map(|v| Value::Decimal(-v))
                        .map_err(|_| EngineError::Parse(format!("bad number literal {s}")))
                } else {
                    s.parse::<i64>()
                        .map(|v| Value::Integer(-v))
                        .map_err(|_| EngineError::Parse(format!("bad integer literal {s}")))
                }
            }
            other => Err(EngineError::Parse(format!("expected a number after '-', found {other:?}"))),
        },
        Some(Token::Word(w)) if w.value.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
        Some(Token::Word(w)) if w.value.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
        Some(Token::Word(w)) if w.value.eq_ignore_ascii_case("null") => Ok(Value::Null),
        other => Err(EngineError::Parse(format!("expected a literal, found {other:?}"))),
    }
}

fn comparison_op(cur: &mut Cursor) -> Result<Op> {
    match cur.advance() {
        Some(Token::Eq) => Ok(Op::Eq),
        Some(Token::Neq) => Ok(Op::Ne),
        Some(Token::Lt) => Ok(Op::Lt),
        Some(Token::Gt) => Ok(Op::Gt),
        Some(Token::LtEq) => Ok(Op::Le),
        Some(Token::GtEq) => Ok(Op::Ge),
        other => Err(EngineError::Parse(format!("expected a comparison operator, found {other:?}"))),
    }
}

/// One flat chain of clauses, all AND'd or all OR'd — mixed
/// AND/OR predicates aren't expressible by the executor's `Predicate`
/// type, so a WHERE clause here is one connective throughout.
fn predicate(cur: &mut Cursor) -> Result<Predicate> {
    let mut clauses = vec![clause(cur)?];
    let mut connective = Connective::And;
    loop {
        if cur.eat_keyword("AND") {
            connective = Connective::And;
            clauses.push(clause(cur)?);
        } else if cur.eat_keyword("OR") {
            connective = Connective::Or;
            clauses.push(clause(cur)?);
        } else {
            break;
        }
    }
    Ok(Predicate { clauses, connective })
}

fn clause(cur: &mut Cursor) -> Result<Clause> {
    let column = cur.ident()?;
    let op = comparison_op(cur)?;
    let lit = literal(cur)?;
    Ok(Clause::new(column, op, lit))
}

fn column_list_in_parens(cur: &mut Cursor) -> Result<Vec<String>> {
    cur.expect_punct(&Token::LParen)?;
    let mut cols = Vec::new();
    loop {
        cols.push(cur.ident()?);
        if cur.eat_punct(&Token::Comma) {
            continue;
        }
        break;
    }
    cur.expect_punct(&Token::RParen)?;
    Ok(cols)
}

fn data_type(cur: &mut Cursor) -> Result<(TypeId, usize)> {
    let name = cur.ident()?;
    let upper = name.to_uppercase();
    let mut max_len = 255;
    if cur.eat_punct(&Token::LParen) {
        if let Some(Token::Number(n, _)) = cur.peek().cloned() {
            cur.advance();
            max_len = n.parse().unwrap_or(255);
        }
        cur.expect_punct(&Token::RParen)?;
    }
    let type_id = match upper.as_str() {
        "INT" | "INTEGER" | "BIGINT" => TypeId::Integer,
        "BOOL" | "BOOLEAN" => TypeId::Boolean,
        "DECIMAL" | "FLOAT" | "DOUBLE" | "REAL" | "NUMERIC" => TypeId::Decimal,
        "TIMESTAMP" | "DATETIME" => TypeId::Timestamp,
        "VARCHAR" | "TEXT" | "CHAR" | "STRING" => TypeId::Varchar,
        other => return Err(EngineError::Parse(format!("unknown column type {other}"))),
    };
    Ok((type_id, max_len))
}

fn create_table(cur: &mut Cursor) -> Result<Statement> {
    cur.expect_keyword("TABLE")?;
    let table = cur.ident()?;
    cur.expect_punct(&Token::LParen)?;

    let mut columns = Vec::new();
    let mut foreign_keys = Vec::new();
    loop {
        if cur.eat_keyword("FOREIGN") {
            cur.expect_keyword("KEY")?;
            let cols = column_list_in_parens(cur)?;
            cur.expect_keyword("REFERENCES")?;
            let ref_table = cur.ident()?;
            let ref_cols = column_list_in_parens(cur)?;
            let column = cols.into_iter().next().ok_or_else(|| {
                EngineError::Parse("FOREIGN KEY needs exactly one column".into())
            })?;
            let ref_column = ref_cols.into_iter().next().ok_or_else(|| {
                EngineError::Parse("REFERENCES needs exactly one column".into())
            })?;
            foreign_keys.push(crate::catalog::ForeignKey::new(column, ref_table, ref_column));
        } else {
            let name = cur.ident()?;
            let (type_id, max_len) = data_type(cur)?;
            let mut col = Column::new(name, type_id).with_max_len(max_len);
            loop {
                if cur.eat_keyword("PRIMARY") {
                    cur.expect_keyword("KEY")?;
                    col = col.primary_key();
                } else if cur.eat_keyword("NOT") {
                    cur.expect_keyword("NULL")?;
                    col = col.not_null();
                } else if cur.eat_keyword("UNIQUE") {
                    col = col.unique();
                } else {
                    break;
                }
            }
            columns.push(col);
        }

        if cur.eat_punct(&Token::Comma) {
            continue;
        }
        break;
    }
    cur.expect_punct(&Token::RParen)?;

    Ok(Statement::CreateTable(CreateTableStatement {
        table,
        columns,
        foreign_keys,
    }))
}

fn create_index(cur: &mut Cursor) -> Result<Statement> {
    cur.expect_keyword("INDEX")?;
    let index_name = cur.ident()?;
    cur.expect_keyword("ON")?;
    let table = cur.ident()?;
    let cols = column_list_in_parens(cur)?;
    let column = cols
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Parse("CREATE INDEX needs exactly one column".into()))?;
    Ok(Statement::CreateIndex(CreateIndexStatement {
        index_name,
        table,
        column,
    }))
}

fn create(cur: &mut Cursor) -> Result<Statement> {
    if matches!(cur.peek(), Some(Token::Word(w)) if w.value.eq_ignore_ascii_case("TABLE")) {
        return create_table(cur);
    }
    if matches!(cur.peek(), Some(Token::Word(w)) if w.value.eq_ignore_ascii_case("INDEX")) {
        return create_index(cur);
    }
    if cur.eat_keyword("DATABASE") {
        return Ok(Statement::CreateDatabase(cur.ident()?));
    }
    if cur.eat_keyword("USER") {
        let username = cur.ident()?;
        cur.expect_keyword("IDENTIFIED")?;
        cur.expect_keyword("BY")?;
        let password = match cur.advance() {
            Some(Token::SingleQuotedString(s)) => s,
            other => return Err(EngineError::Parse(format!("expected a quoted password, found {other:?}"))),
        };
        let is_root = cur.eat_keyword("AS") && cur.eat_keyword("ROOT");
        return Ok(Statement::CreateUser(CreateUserStatement {
            username,
            password,
            is_root,
        }));
    }
    Err(EngineError::Parse("expected TABLE, INDEX, DATABASE or USER after CREATE".into()))
}

fn insert(cur: &mut Cursor) -> Result<Statement> {
    cur.expect_keyword("INTO")?;
    let table = cur.ident()?;
    let mut columns = Vec::new();
    if cur.peek() == Some(&Token::LParen) {
        columns = column_list_in_parens(cur)?;
    }
    cur.expect_keyword("VALUES")?;
    let mut rows = Vec::new();
    loop {
        cur.expect_punct(&Token::LParen)?;
        let mut row = Vec::new();
        loop {
            row.push(literal(cur)?);
            if cur.eat_punct(&Token::Comma) {
                continue;
            }
            break;
        }
        cur.expect_punct(&Token::RParen)?;
        rows.push(row);
        if cur.eat_punct(&Token::Comma) {
            continue;
        }
        break;
    }
    Ok(Statement::Insert(InsertStatement { table, columns, rows }))
}

fn update(cur: &mut Cursor) -> Result<Statement> {
    let table = cur.ident()?;
    cur.expect_keyword("SET")?;
    let mut assignments = Vec::new();
    loop {
        let col = cur.ident()?;
        cur.expect_punct(&Token::Eq)?;
        let value = literal(cur)?;
        assignments.push((col, value));
        if cur.eat_punct(&Token::Comma) {
            continue;
        }
        break;
    }
    let predicate = if cur.eat_keyword("WHERE") {
        predicate(cur)?
    } else {
        Predicate::always_true()
    };
    Ok(Statement::Update(UpdateStatement {
        table,
        assignments,
        predicate,
    }))
}

fn delete(cur: &mut Cursor) -> Result<Statement> {
    cur.expect_keyword("FROM")?;
    let table = cur.ident()?;
    let predicate = if cur.eat_keyword("WHERE") {
        predicate(cur)?
    } else {
        Predicate::always_true()
    };
    Ok(Statement::Delete(DeleteStatement { table, predicate }))
}

fn agg_function(name: &str) -> Option<AggFunc> {
    match name.to_uppercase().as_str() {
        "COUNT" => Some(AggFunc::Count),
        "SUM" => Some(AggFunc::Sum),
        "AVG" => Some(AggFunc::Avg),
        "MIN" => Some(AggFunc::Min),
        "MAX" => Some(AggFunc::Max),
        _ => None,
    }
}

fn select_list(cur: &mut Cursor) -> Result<(Vec<String>, Vec<AggSpec>)> {
    let mut columns = Vec::new();
    let mut aggregates = Vec::new();
    loop {
        if cur.eat_punct(&Token::Mul) {
            // SELECT * — leave `columns` empty to mean "every column"
        } else {
            let name = cur.ident()?;
            if cur.eat_punct(&Token::LParen) {
                let func = agg_function(&name)
                    .ok_or_else(|| EngineError::Parse(format!("unknown function {name}")))?;
                let column = if cur.eat_punct(&Token::Mul) {
                    None
                } else {
                    Some(cur.ident()?)
                };
                cur.expect_punct(&Token::RParen)?;
                aggregates.push(AggSpec { func, column });
            } else {
                columns.push(name);
            }
        }
        if cur.eat_punct(&Token::Comma) {
            continue;
        }
        break;
    }
    Ok((columns, aggregates))
}

fn join_type_keyword(cur: &mut Cursor) -> Option<JoinType> {
    if cur.eat_keyword("INNER") {
        cur.eat_keyword("JOIN");
        return Some(JoinType::Inner);
    }
    if cur.eat_keyword("LEFT") {
        cur.eat_keyword("OUTER");
        cur.eat_keyword("JOIN");
        return Some(JoinType::Left);
    }
    if cur.eat_keyword("RIGHT") {
        cur.eat_keyword("OUTER");
        cur.eat_keyword("JOIN");
        return Some(JoinType::Right);
    }
    if cur.eat_keyword("FULL") {
        cur.eat_keyword("OUTER");
        cur.eat_keyword("JOIN");
        return Some(JoinType::Full);
    }
    if cur.eat_keyword("CROSS") {
        cur.eat_keyword("JOIN");
        return Some(JoinType::Cross);
    }
    if cur.eat_keyword("JOIN") {
        return Some(JoinType::Inner);
    }
    None
}

fn select(cur: &mut Cursor) -> Result<Statement> {
    let distinct = cur.eat_keyword("DISTINCT");
    let (columns, aggregates) = select_list(cur)?;
    cur.expect_keyword("FROM")?;
    let table = cur.ident()?;

    let mut joins = Vec::new();
    while let Some(join_type) = join_type_keyword(cur) {
        let join_table = cur.ident()?;
        cur.expect_keyword("ON")?;
        let predicate = predicate(cur)?;
        joins.push(JoinClause {
            table: join_table,
            join_type,
            predicate,
        });
    }

    let predicate = if cur.eat_keyword("WHERE") {
        predicate(cur)?
    } else {
        Predicate::always_true()
    };

    let mut group_by = Vec::new();
    if cur.eat_keyword("GROUP") {
        cur.expect_keyword("BY")?;
        loop {
            group_by.push(cur.ident()?);
            if cur.eat_punct(&Token::Comma) {
                continue;
            }
            break;
        }
    }

    let mut order_by = Vec::new();
    if cur.eat_keyword("ORDER") {
        cur.expect_keyword("BY")?;
        loop {
            let column = cur.ident()?;
            let direction = if cur.eat_keyword("DESC") {
                SortDirection::Desc
            } else {
                cur.eat_keyword("ASC");
                SortDirection::Asc
            };
            order_by.push(SortKey { column, direction });
            if cur.eat_punct(&Token::Comma) {
                continue;
            }
            break;
        }
    }

    let mut limit = None;
    if cur.eat_keyword("LIMIT") {
        match cur.advance() {
            Some(Token::Number(n, _)) => {
                limit = Some(n.parse().map_err(|_| EngineError::Parse(format!("bad LIMIT {n}")))?)
            }
            other => return Err(EngineError::Parse(format!("expected a number after LIMIT, found {other:?}"))),
        }
    }
    let mut offset = 0;
    if cur.eat_keyword("OFFSET") {
        match cur.advance() {
            Some(Token::Number(n, _)) => {
                offset = n.parse().map_err(|_| EngineError::Parse(format!("bad OFFSET {n}")))?
            }
            other => return Err(EngineError::Parse(format!("expected a number after OFFSET, found {other:?}"))),
        }
    }

    let mut as_of = None;
    if cur.eat_keyword("AS") {
        cur.expect_keyword("OF")?;
        as_of = Some(timestamp_literal(cur)?);
    }

    Ok(Statement::Select(SelectStatement {
        table,
        joins,
        columns,
        predicate,
        group_by,
        aggregates,
        distinct,
        order_by,
        limit,
        offset,
        as_of,
    }))
}

/// `RECOVER TO`/`AS OF` both take a microsecond-epoch integer or a
/// quoted ISO-ish string the engine does not itself interpret further
/// than "what's already in the log" — callers pass the same timestamp
/// unit the Checkpoint Manager's snapshots were written in.
fn timestamp_literal(cur: &mut Cursor) -> Result<i64> {
    match cur.advance() {
        Some(Token::Number(n, _)) => n.parse().map_err(|_| EngineError::Parse(format!("bad timestamp {n}"))),
        Some(Token::SingleQuotedString(s)) => s
            .parse()
            .map_err(|_| EngineError::Parse(format!("bad timestamp literal {s}"))),
        other => Err(EngineError::Parse(format!("expected a timestamp, found {other:?}"))),
    }
}

fn rest_as_string(cur: &mut Cursor) -> String {
    let mut parts = Vec::new();
    while !cur.at_end() {
        if let Some(Token::Word(w)) = cur.advance() {
            parts.push(w.value);
        }
    }
    parts.join(" ")
}

pub fn parse(sql: &str) -> Result<Statement> {
    let sql = sql.trim().trim_end_matches(';');
    let tokens = tokenize(sql)?;
    let mut cur = Cursor::new(tokens);
    if cur.at_end() {
        return Err(EngineError::Parse("empty statement".into()));
    }

    if cur.eat_keyword("SELECT") {
        return select(&mut cur);
    }
    if cur.eat_keyword("INSERT") {
        return insert(&mut cur);
    }
    if cur.eat_keyword("UPDATE") {
        return update(&mut cur);
    }
    if cur.eat_keyword("DELETE") {
        return delete(&mut cur);
    }
    if cur.eat_keyword("CREATE") {
        return create(&mut cur);
    }
    if cur.eat_keyword("DROP") {
        if cur.eat_keyword("TABLE") {
            return Ok(Statement::Drop(cur.ident()?));
        }
        if cur.eat_keyword("DATABASE") {
            return Ok(Statement::DropDatabase(cur.ident()?));
        }
        if cur.eat_keyword("USER") {
            return Ok(Statement::DropUser(cur.ident()?));
        }
        return Err(EngineError::Parse("expected TABLE, DATABASE or USER after DROP".into()));
    }
    if cur.eat_keyword("USE") {
        cur.eat_keyword("DATABASE");
        return Ok(Statement::UseDatabase(cur.ident()?));
    }
    if cur.eat_keyword("BEGIN") {
        return Ok(Statement::Begin);
    }
    if cur.eat_keyword("COMMIT") {
        return Ok(Statement::Commit);
    }
    if cur.eat_keyword("ROLLBACK") {
        return Ok(Statement::Rollback);
    }
    if cur.eat_keyword("CHECKPOINT") {
        return Ok(Statement::Checkpoint);
    }
    if cur.eat_keyword("RECOVER") {
        cur.expect_keyword("TO")?;
        return Ok(Statement::RecoverTo(timestamp_literal(&mut cur)?));
    }
    if cur.eat_keyword("SHOW") {
        return Ok(Statement::Show(rest_as_string(&mut cur)));
    }
    if cur.eat_keyword("PRAGMA") {
        return Ok(Statement::Pragma(rest_as_string(&mut cur)));
    }
    if cur.eat_keyword("EXPLAIN") {
        let rest = cur.tokens[cur.pos..].to_vec();
        let remainder = rest
            .iter()
            .map(token_text)
            .collect::<Vec<_>>()
            .join(" ");
        return Ok(Statement::Explain(Box::new(parse(&remainder)?)));
    }

    Err(EngineError::Parse(format!(
        "unrecognised statement starting at {:?}",
        cur.peek()
    )))
}

fn token_text(tok: &Token) -> String {
    match tok {
        Token::Word(w) => w.value.clone(),
        Token::Number(n, _) => n.clone(),
        Token::SingleQuotedString(s) => format!("'{s}'"),
        Token::Comma => ",".to_string(),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
        Token::Eq => "=".to_string(),
        Token::Neq => "!=".to_string(),
        Token::Lt => "<".to_string(),
        Token::Gt => ">".to_string(),
        Token::LtEq => "<=".to_string(),
        Token::GtEq => ">=".to_string(),
        other => format!("{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_with_constraints() {
        let stmt = parse("CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(32) NOT NULL)").unwrap();
        match stmt {
            Statement::CreateTable(ct) => {
                assert_eq!(ct.table, "users");
                assert_eq!(ct.columns.len(), 2);
                assert!(ct.columns[0].primary_key);
                assert!(!ct.columns[1].nullable);
            }
            other => panic!("expected CreateTable, got {other:?}"),
        }
    }

    #[test]
    fn parses_insert_with_explicit_columns() {
        let stmt = parse("INSERT INTO users (id, name) VALUES (1, 'bob')").unwrap();
        match stmt {
            Statement::Insert(ins) => {
                assert_eq!(ins.table, "users");
                assert_eq!(ins.columns, vec!["id".to_string(), "name".to_string()]);
                assert_eq!(ins.rows.len(), 1);
            }
            _ => panic!("expected Insert"),
        }
    }

    #[test]
    fn parses_select_with_where_order_and_limit() {
        let stmt = parse("SELECT id, name FROM users WHERE id = 5 ORDER BY name DESC LIMIT 10 OFFSET 2").unwrap();
        match stmt {
            Statement::Select(sel) => {
                assert_eq!(sel.table, "users");
                assert_eq!(sel.columns, vec!["id".to_string(), "name".to_string()]);
                assert_eq!(sel.predicate.clauses.len(), 1);
                assert_eq!(sel.order_by.len(), 1);
                assert_eq!(sel.limit, Some(10));
                assert_eq!(sel.offset, 2);
            }
            _ => panic!("expected Select"),
        }
    }

    #[test]
    fn parses_select_as_of() {
        let stmt = parse("SELECT * FROM users AS OF 1700000000").unwrap();
        match stmt {
            Statement::Select(sel) => assert_eq!(sel.as_of, Some(1700000000)),
            _ => panic!("expected Select"),
        }
    }

    #[test]
    fn parses_recover_to() {
        let stmt = parse("RECOVER TO 1700000000").unwrap();
        match stmt {
            Statement::RecoverTo(ts) => assert_eq!(ts, 1700000000),
            _ => panic!("expected RecoverTo"),
        }
    }
}
