//! Black-box end-to-end scenarios driven entirely through `Engine`'s
//! public statement interface, the way a client would see them.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use franco_engine::config::Config;
use franco_engine::engine::StatementOutcome;
use franco_engine::sql;
use franco_engine::types::Value;
use franco_engine::Engine;

fn config(dir: &std::path::Path) -> Config {
    Config {
        data_directory: dir.to_string_lossy().to_string(),
        root_username: "root".into(),
        root_password: "toor".into(),
        ..Config::default()
    }
}

fn run(engine: &Engine, active_txn: &mut Option<u64>, sql: &str) -> StatementOutcome {
    engine.execute(active_txn, sql::parse(sql).unwrap()).unwrap()
}

fn rows_of(outcome: StatementOutcome) -> Vec<Vec<Value>> {
    match outcome {
        StatementOutcome::Rows { rows, .. } => rows,
        _ => panic!("expected a row set"),
    }
}

fn now_us() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_micros() as i64
}

#[test]
fn scenario_a_basic_crud() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config(dir.path()), "main").unwrap();
    let mut txn = None;

    run(&engine, &mut txn, "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(50), age INT)");
    run(&engine, &mut txn, "INSERT INTO users VALUES (1,'Alice',25)");
    run(&engine, &mut txn, "INSERT INTO users VALUES (2,'Bob',30)");

    let rows = rows_of(run(&engine, &mut txn, "SELECT * FROM users WHERE age > 20"));
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::Varchar("Alice".into()), Value::Integer(25)],
            vec![Value::Integer(2), Value::Varchar("Bob".into()), Value::Integer(30)],
        ]
    );

    run(&engine, &mut txn, "UPDATE users SET age=26 WHERE id=1");
    let rows = rows_of(run(&engine, &mut txn, "SELECT age FROM users WHERE id=1"));
    assert_eq!(rows, vec![vec![Value::Integer(26)]]);

    run(&engine, &mut txn, "DELETE FROM users WHERE id=2");
    let rows = rows_of(run(&engine, &mut txn, "SELECT * FROM users"));
    assert_eq!(
        rows,
        vec![vec![Value::Integer(1), Value::Varchar("Alice".into()), Value::Integer(26)]]
    );
}

#[test]
fn scenario_c_crash_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());

    {
        let engine = Engine::open(cfg.clone(), "main").unwrap();
        let mut txn = None;
        run(&engine, &mut txn, "CREATE TABLE t (id INT PRIMARY KEY)");

        run(&engine, &mut txn, "BEGIN");
        run(&engine, &mut txn, "INSERT INTO t VALUES(1)");
        run(&engine, &mut txn, "COMMIT");

        run(&engine, &mut txn, "BEGIN");
        run(&engine, &mut txn, "INSERT INTO t VALUES(2)");
        // simulated crash: `engine` (and its unfinished T2) is dropped here
        // with neither a COMMIT nor a ROLLBACK ever issued.
    }

    let engine = Engine::open(cfg, "main").unwrap();
    let mut txn = None;
    let rows = rows_of(run(&engine, &mut txn, "SELECT * FROM t"));
    assert_eq!(rows, vec![vec![Value::Integer(1)]]);
}

#[test]
fn scenario_d_time_travel() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config(dir.path()), "main").unwrap();
    let mut txn = None;

    run(&engine, &mut txn, "CREATE TABLE bank (id INT PRIMARY KEY, money INT)");
    run(&engine, &mut txn, "INSERT INTO bank VALUES (1, 1000000)");

    thread::sleep(Duration::from_millis(5));
    let t0 = now_us();
    thread::sleep(Duration::from_millis(5));

    run(&engine, &mut txn, "UPDATE bank SET money=0 WHERE id=1");

    let rows = rows_of(run(&engine, &mut txn, &format!("SELECT * FROM bank AS OF {t0}")));
    assert_eq!(rows, vec![vec![Value::Integer(1), Value::Integer(1000000)]]);

    run(&engine, &mut txn, &format!("RECOVER TO {t0}"));
    let rows = rows_of(run(&engine, &mut txn, "SELECT * FROM bank"));
    assert_eq!(rows, vec![vec![Value::Integer(1), Value::Integer(1000000)]]);
}

#[test]
fn a_statement_error_does_not_end_the_open_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config(dir.path()), "main").unwrap();
    let mut txn = None;

    run(&engine, &mut txn, "CREATE TABLE t (id INT PRIMARY KEY)");
    run(&engine, &mut txn, "BEGIN");
    run(&engine, &mut txn, "INSERT INTO t VALUES(1)");

    // a reference to a table that doesn't exist fails the statement but
    // — per the execution-error contract — does not itself end the
    // already-open transaction.
    let err = engine.execute(&mut txn, sql::parse("INSERT INTO nope VALUES(2)").unwrap());
    assert!(err.is_err());
    assert!(txn.is_some());

    run(&engine, &mut txn, "COMMIT");
    let rows = rows_of(run(&engine, &mut txn, "SELECT * FROM t"));
    assert_eq!(rows, vec![vec![Value::Integer(1)]]);
}

#[test]
fn secondary_index_permits_duplicate_values() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(config(dir.path()), "main").unwrap();
    let mut txn = None;

    run(&engine, &mut txn, "CREATE TABLE orders (id INT PRIMARY KEY, status VARCHAR(20))");
    run(&engine, &mut txn, "INSERT INTO orders VALUES (1, 'open')");
    run(&engine, &mut txn, "CREATE INDEX orders_status_idx ON orders (status)");

    // two more rows share the already-indexed value "open" — this used to
    // hard-fail the INSERT once a secondary index existed on the column.
    run(&engine, &mut txn, "INSERT INTO orders VALUES (2, 'open')");
    run(&engine, &mut txn, "INSERT INTO orders VALUES (3, 'closed')");

    let rows = rows_of(run(&engine, &mut txn, "SELECT id FROM orders WHERE status='open'"));
    let mut ids: Vec<i64> = rows
        .into_iter()
        .map(|r| match r[0] {
            Value::Integer(i) => i,
            _ => unreachable!(),
        })
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    run(&engine, &mut txn, "DELETE FROM orders WHERE id=1");
    let rows = rows_of(run(&engine, &mut txn, "SELECT id FROM orders WHERE status='open'"));
    assert_eq!(rows, vec![vec![Value::Integer(2)]]);
}
