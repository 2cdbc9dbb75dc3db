use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::rc::Rc;

use kitbag_sql::*;

/// Records what the database handle asks of it and fails on cue.
#[derive(Default)]
struct Script {
    connects: usize,
    disconnects: usize,
    begins: usize,
    commits: usize,
    rollbacks: usize,
    aborts_on_error: bool,
    executed: Vec<String>,
    /// Fails the next statement containing the pattern, or any statement.
    failures: VecDeque<(Option<&'static str>, DbError)>,
    results: VecDeque<Vec<Row>>,
    tables: HashMap<String, Vec<String>>,
}

#[derive(Clone, Default)]
struct Scripted(Rc<RefCell<Script>>);

impl Scripted {
    fn fail_next(&self, err: DbError) {
        self.0.borrow_mut().failures.push_back((None, err));
    }

    fn fail_on(&self, pattern: &'static str, err: DbError) {
        self.0.borrow_mut().failures.push_back((Some(pattern), err));
    }

    fn answer(&self, rows: Vec<Row>) {
        self.0.borrow_mut().results.push_back(rows);
    }

    /// Behave like PostgreSQL, where a failed statement aborts the
    /// transaction.
    fn aborting() -> Self {
        let backend = Self::default();
        backend.0.borrow_mut().aborts_on_error = true;
        backend
    }

    fn state(&self) -> std::cell::Ref<'_, Script> {
        self.0.borrow()
    }
}

impl Backend for Scripted {
    type Conn = usize;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn connect(&mut self) -> Result<usize, DbError> {
        let mut s = self.0.borrow_mut();
        s.connects += 1;
        Ok(s.connects)
    }

    fn disconnect(&mut self, _conn: usize) -> Result<(), DbError> {
        self.0.borrow_mut().disconnects += 1;
        Ok(())
    }

    fn execute(
        &mut self,
        _conn: &mut usize,
        sql: &str,
        _params: &[Value],
        fetch: bool,
    ) -> Result<Vec<Row>, DbError> {
        let mut s = self.0.borrow_mut();
        let fails = match s.failures.front() {
            Some((pattern, _)) => pattern.is_none_or(|p| sql.contains(p)),
            None => false,
        };
        if fails {
            if let Some((_, err)) = s.failures.pop_front() {
                return Err(err);
            }
        }
        s.executed.push(sql.to_string());
        if fetch {
            return Ok(s.results.pop_front().unwrap_or_default());
        }
        Ok(Vec::new())
    }

    fn begin(&mut self, _conn: &mut usize) -> Result<(), DbError> {
        self.0.borrow_mut().begins += 1;
        Ok(())
    }

    fn commit(&mut self, _conn: &mut usize) -> Result<(), DbError> {
        self.0.borrow_mut().commits += 1;
        Ok(())
    }

    fn rollback(&mut self, _conn: &mut usize) -> Result<(), DbError> {
        self.0.borrow_mut().rollbacks += 1;
        Ok(())
    }

    fn aborts_transaction_on_error(&self) -> bool {
        self.0.borrow().aborts_on_error
    }

    fn table_columns(
        &mut self,
        _conn: &mut usize,
        table: &str,
    ) -> Result<Option<Vec<String>>, DbError> {
        Ok(self.0.borrow().tables.get(table).cloned())
    }
}

fn connection_reset() -> DbError {
    DbError::Io(std::io::Error::from(ErrorKind::ConnectionReset))
}

fn open(backend: &Scripted, options: DatabaseOptions) -> Database<Scripted> {
    Database::new(backend.clone(), options).unwrap()
}

#[test]
fn lost_connection_is_retried_once() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default());
    backend.fail_next(connection_reset());

    db.exec("SELECT 1", &[], true).unwrap();

    let s = backend.state();
    assert_eq!(s.connects, 2);
    assert_eq!(s.disconnects, 1);
    assert_eq!(s.executed, ["SELECT 1;"]);
}

#[test]
fn second_loss_propagates() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default());
    backend.fail_next(connection_reset());
    backend.fail_next(connection_reset());

    let err = db.exec("SELECT 1", &[], true).unwrap_err();
    assert!(err.is_connection_lost());
    assert!(!db.is_connected());
    assert_eq!(backend.state().connects, 2);
    assert!(backend.state().executed.is_empty());

    // The next call starts over with a fresh connection
    db.exec("SELECT 1", &[], true).unwrap();
    assert_eq!(backend.state().connects, 3);
}

#[test]
fn statement_errors_are_not_retried() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default());
    backend.fail_next(DbError::invalid_schema("syntax error"));

    let err = db.exec("SELEC 1", &[], false).unwrap_err();
    assert!(matches!(err, DbError::InvalidSchema(_)));
    assert!(db.is_connected());
    assert_eq!(backend.state().connects, 1);
    assert_eq!(backend.state().disconnects, 0);
}

#[test]
fn retry_can_be_disabled() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default());
    backend.fail_next(connection_reset());

    let err = db.exec_with("SELECT 1", &[], true, false).unwrap_err();
    assert!(err.is_connection_lost());
    assert!(!db.is_connected());
    assert_eq!(backend.state().connects, 1);
}

#[test]
fn migration_runs_once_across_reconnects() {
    let backend = Scripted::default();
    let schema = Schema::new().table("items", [("id", "INTEGER")]);
    let mut db = open(&backend, DatabaseOptions::default().with_schema(schema));
    assert_eq!(
        backend.state().executed,
        ["CREATE TABLE IF NOT EXISTS items (id INTEGER);"]
    );

    backend.fail_next(connection_reset());
    db.exec("SELECT 1", &[], true).unwrap();

    let s = backend.state();
    assert_eq!(s.connects, 2);
    assert_eq!(s.executed.len(), 2);
    assert_eq!(s.executed[1], "SELECT 1;");
}

#[test]
fn reconnect_during_migration_does_not_recurse() {
    let backend = Scripted::default();
    backend.fail_next(connection_reset());
    let schema = Schema::new().table("items", [("id", "INTEGER")]);
    let db = open(&backend, DatabaseOptions::default().with_schema(schema));

    let s = backend.state();
    assert_eq!(s.connects, 2);
    assert_eq!(
        s.executed,
        ["CREATE TABLE IF NOT EXISTS items (id INTEGER);"]
    );
    drop(s);
    drop(db);
}

#[test]
fn existing_table_only_gains_missing_columns() {
    let backend = Scripted::default();
    backend
        .0
        .borrow_mut()
        .tables
        .insert("items".to_string(), vec!["id".to_string()]);
    let schema = Schema::new().table("items", [("id", "INTEGER"), ("name", "TEXT")]);
    let _db = open(&backend, DatabaseOptions::default().with_schema(schema));

    assert_eq!(
        backend.state().executed,
        ["ALTER TABLE items ADD COLUMN name TEXT;"]
    );
}

#[test]
fn manual_save_wraps_statements_in_one_transaction() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default().manual_save());

    db.exec("INSERT INTO items DEFAULT VALUES", &[], false).unwrap();
    db.exec("INSERT INTO items DEFAULT VALUES", &[], false).unwrap();
    assert_eq!(backend.state().begins, 1);
    assert_eq!(backend.state().commits, 0);

    db.save().unwrap();
    assert_eq!(backend.state().commits, 1);

    // Nothing pending, nothing to commit
    db.save().unwrap();
    assert_eq!(backend.state().commits, 1);

    db.set_autosave(true);
    db.exec("SELECT 1", &[], true).unwrap();
    assert_eq!(backend.state().begins, 1);
}

#[test]
fn drop_closes_the_connection() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default().manual_save());
    db.exec("INSERT INTO items DEFAULT VALUES", &[], false).unwrap();
    drop(db);

    let s = backend.state();
    assert_eq!(s.commits, 1);
    assert_eq!(s.disconnects, 1);
}

#[test]
fn close_without_save_rolls_back() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default().manual_save());
    db.exec("INSERT INTO items DEFAULT VALUES", &[], false).unwrap();
    assert_eq!(db.pending(), 1);
    db.close(false).unwrap();

    let s = backend.state();
    assert_eq!(s.commits, 0);
    assert_eq!(s.rollbacks, 1);
    assert_eq!(s.disconnects, 1);
}

#[test]
fn statements_without_transaction_take_no_savepoint() {
    let backend = Scripted::aborting();
    let mut db = open(&backend, DatabaseOptions::default());
    db.exec("INSERT INTO items DEFAULT VALUES", &[], false).unwrap();

    assert_eq!(backend.state().executed, ["INSERT INTO items DEFAULT VALUES;"]);
}

#[test]
fn failed_statement_keeps_earlier_work() {
    let backend = Scripted::aborting();
    let mut db = open(&backend, DatabaseOptions::default().manual_save());
    db.exec("INSERT INTO items VALUES (1)", &[], false).unwrap();
    backend.fail_on("VALUES (2)", DbError::invalid_schema("duplicate key"));

    let err = db.exec("INSERT INTO items VALUES (2)", &[], false).unwrap_err();
    assert!(matches!(err, DbError::InvalidSchema(_)));
    assert_eq!(db.pending(), 1);

    db.exec("INSERT INTO items VALUES (3)", &[], false).unwrap();
    db.save().unwrap();

    let s = backend.state();
    assert_eq!(s.begins, 1);
    assert_eq!(s.commits, 1);
    assert_eq!(s.rollbacks, 0);
    assert_eq!(
        s.executed,
        [
            "SAVEPOINT kitbag_stmt;",
            "INSERT INTO items VALUES (1);",
            "RELEASE SAVEPOINT kitbag_stmt;",
            "SAVEPOINT kitbag_stmt;",
            "ROLLBACK TO SAVEPOINT kitbag_stmt;",
            "SAVEPOINT kitbag_stmt;",
            "INSERT INTO items VALUES (3);",
            "RELEASE SAVEPOINT kitbag_stmt;",
        ]
    );
}

#[test]
fn failed_savepoint_rollback_reports_lost_work() {
    let backend = Scripted::aborting();
    let mut db = open(&backend, DatabaseOptions::default().manual_save());
    db.exec("INSERT INTO items VALUES (1)", &[], false).unwrap();
    backend.fail_on("VALUES (2)", DbError::invalid_schema("duplicate key"));
    backend.fail_on("ROLLBACK TO", DbError::invalid_schema("no such savepoint"));

    let err = db.exec("INSERT INTO items VALUES (2)", &[], false).unwrap_err();
    match err {
        DbError::TransactionRolledBack { discarded, source } => {
            assert_eq!(discarded, 1);
            assert!(matches!(*source, DbError::InvalidSchema(_)));
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    assert_eq!(backend.state().rollbacks, 1);
    assert_eq!(db.pending(), 0);

    // Nothing left to commit; the next statement opens a new transaction
    db.save().unwrap();
    assert_eq!(backend.state().commits, 0);
    db.exec("INSERT INTO items VALUES (3)", &[], false).unwrap();
    assert_eq!(backend.state().begins, 2);
    assert!(db.is_connected());
}

#[test]
fn lost_connection_inside_transaction_is_not_rolled_back_to_savepoint() {
    let backend = Scripted::aborting();
    let mut db = open(&backend, DatabaseOptions::default().manual_save());
    db.exec("INSERT INTO items VALUES (1)", &[], false).unwrap();
    backend.fail_on("VALUES (2)", connection_reset());

    db.exec("INSERT INTO items VALUES (2)", &[], false).unwrap();

    let s = backend.state();
    assert_eq!(s.connects, 2);
    assert_eq!(s.begins, 2);
    // The old transaction is abandoned along with its connection
    assert_eq!(s.rollbacks, 1);
    assert!(!s.executed.iter().any(|sql| sql.starts_with("ROLLBACK TO")));
}

#[test]
fn count_reads_the_integer_result() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default());
    backend.answer(vec![vec![Value::Integer(3)]]);

    assert_eq!(db.select_count::<&str>("items", &[]).unwrap(), 3);
}

#[test]
fn count_rejects_a_non_integer_result() {
    let backend = Scripted::default();
    let mut db = open(&backend, DatabaseOptions::default());

    backend.answer(vec![vec![Value::from("three")]]);
    let err = db.select_count::<&str>("items", &[]).unwrap_err();
    assert!(matches!(err, DbError::UnexpectedResult(_)));
    assert!(err.to_string().contains("three"));

    backend.answer(vec![vec![Value::Integer(-1)]]);
    let err = db.select_count::<&str>("items", &[]).unwrap_err();
    assert!(matches!(err, DbError::UnexpectedResult(_)));

    // No row at all
    let err = db.select_count::<&str>("items", &[]).unwrap_err();
    assert!(matches!(err, DbError::UnexpectedResult(_)));
}
