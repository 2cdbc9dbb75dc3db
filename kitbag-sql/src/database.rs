//! The database handle: one live connection, lazy schema migration, and the
//! row-level operations every backend shares.

use std::borrow::Cow;

use crate::backend::Backend;
use crate::error::DbError;
use crate::schema::{self, Schema, SchemaReport};
use crate::statement::{self, Statement};
use crate::value::{Row, Value};

const SAVEPOINT: &str = "SAVEPOINT kitbag_stmt;";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT kitbag_stmt;";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT kitbag_stmt;";

/// Construction options for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Commit after every statement. When off, statements accumulate in a
    /// transaction until [`Database::save`].
    pub autosave: bool,
    /// Connect (and migrate) inside [`Database::new`].
    pub connect_on_init: bool,
    /// Applied once, on the first connection.
    pub schema: Option<Schema>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            autosave: true,
            connect_on_init: true,
            schema: None,
        }
    }
}

impl DatabaseOptions {
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.connect_on_init = false;
        self
    }

    pub fn manual_save(mut self) -> Self {
        self.autosave = false;
        self
    }
}

/// A handle owning at most one live connection.
///
/// `Disconnected -> Connected -> (migrated) -> ... -> Closed`. Closing is
/// terminal. Dropping the handle commits and disconnects. Not safe for
/// concurrent use; wrap it yourself if several callers share it.
pub struct Database<B: Backend> {
    backend: B,
    conn: Option<B::Conn>,
    schema: Option<Schema>,
    autosave: bool,
    closed: bool,
    in_transaction: bool,
    /// Statements that succeeded inside the open transaction.
    pending: usize,
    need_schema_update: bool,
    updating_schema: bool,
}

impl<B: Backend> Database<B> {
    pub fn new(backend: B, options: DatabaseOptions) -> Result<Self, DbError> {
        let mut db = Self {
            backend,
            conn: None,
            schema: options.schema,
            autosave: options.autosave,
            closed: false,
            in_transaction: false,
            pending: 0,
            need_schema_update: true,
            updating_schema: false,
        };
        if options.connect_on_init {
            db.connect()?;
        }
        Ok(db)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn autosave(&self) -> bool {
        self.autosave
    }

    pub fn set_autosave(&mut self, autosave: bool) {
        self.autosave = autosave;
    }

    /// Open the connection if needed, running schema migration the first
    /// time. Fails once the handle is closed.
    pub fn connect(&mut self) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::Closed);
        }
        if self.conn.is_some() {
            return Ok(());
        }
        log::debug!("{}: connecting", self.backend.name());
        self.conn = Some(self.backend.connect()?);
        if self.need_schema_update {
            self.update_schema(None)?;
        }
        Ok(())
    }

    /// Drop the connection without committing. An open transaction is
    /// rolled back first.
    pub fn disconnect(&mut self) -> Result<(), DbError> {
        let in_transaction = std::mem::take(&mut self.in_transaction);
        let discarded = std::mem::take(&mut self.pending);
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if in_transaction {
            if discarded > 0 {
                log::warn!(
                    "{}: discarding {discarded} uncommitted statement(s)",
                    self.backend.name()
                );
            }
            if let Err(e) = self.backend.rollback(&mut conn) {
                log::debug!("{}: rollback before disconnect failed: {e}", self.backend.name());
            }
        }
        log::debug!("{}: disconnecting", self.backend.name());
        self.backend.disconnect(conn)
    }

    /// Successful statements waiting for [`save`](Self::save).
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Commit the open transaction, if any.
    pub fn save(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Ok(());
        }
        if let Some(conn) = self.conn.as_mut() {
            self.backend.commit(conn)?;
        }
        self.in_transaction = false;
        self.pending = 0;
        Ok(())
    }

    /// Optionally commit, then disconnect. The handle cannot be used again.
    pub fn close(&mut self, save: bool) -> Result<(), DbError> {
        if self.closed {
            return Ok(());
        }
        let saved = if save { self.save() } else { Ok(()) };
        let disconnected = self.disconnect();
        self.closed = true;
        saved.and(disconnected)
    }

    /// Migrate to `schema`, or to the schema given at construction.
    ///
    /// A call made while a migration is already running is a no-op.
    pub fn update_schema(&mut self, schema: Option<&Schema>) -> Result<SchemaReport, DbError> {
        if self.updating_schema {
            return Ok(SchemaReport::default());
        }
        let schema = match schema.or(self.schema.as_ref()) {
            Some(s) => s.clone(),
            None => {
                self.need_schema_update = false;
                return Ok(SchemaReport::default());
            }
        };
        self.updating_schema = true;
        let result = schema::apply(self, &schema);
        self.updating_schema = false;
        let report = result?;
        self.need_schema_update = false;
        if !report.is_noop() {
            log::debug!(
                "{}: created {} table(s), added {} column(s)",
                self.backend.name(),
                report.tables_created.len(),
                report.columns_added.len()
            );
        }
        Ok(report)
    }

    /// Column names of `table`, or `None` if it does not exist.
    pub fn table_columns(&mut self, table: &str) -> Result<Option<Vec<String>>, DbError> {
        statement::validate_identifier(table)?;
        self.connect()?;
        let conn = self.conn.as_mut().ok_or(DbError::Closed)?;
        self.backend.table_columns(conn, table)
    }

    /// Run raw SQL with bound parameters, reconnecting once if the
    /// connection turns out to be lost.
    pub fn exec(&mut self, sql: &str, params: &[Value], fetch: bool) -> Result<Vec<Row>, DbError> {
        self.exec_with(sql, params, fetch, true)
    }

    /// Like [`exec`](Self::exec), with the single reconnect optional.
    ///
    /// Only connection-class errors are retried. Statement errors
    /// (constraints, syntax, missing tables) propagate unchanged.
    pub fn exec_with(
        &mut self,
        sql: &str,
        params: &[Value],
        fetch: bool,
        reconnect: bool,
    ) -> Result<Vec<Row>, DbError> {
        let sql = terminated(sql);
        match self.try_exec(&sql, params, fetch) {
            Err(e) if self.backend.is_connection_lost(&e) => {
                let _ = self.disconnect();
                if !reconnect {
                    return Err(e);
                }
                log::warn!("{}: connection lost ({e}), reconnecting", self.backend.name());
                self.exec_with(&sql, params, fetch, false)
            }
            other => other,
        }
    }

    fn try_exec(&mut self, sql: &str, params: &[Value], fetch: bool) -> Result<Vec<Row>, DbError> {
        self.connect()?;
        let conn = self.conn.as_mut().ok_or(DbError::Closed)?;
        if !self.autosave && !self.in_transaction {
            self.backend.begin(conn)?;
            self.in_transaction = true;
            self.pending = 0;
        }
        // A failed statement must not take the rest of the transaction with it
        let guarded = self.in_transaction && self.backend.aborts_transaction_on_error();
        if guarded {
            self.backend.execute(conn, SAVEPOINT, &[], false)?;
        }
        log::debug!("{}: {sql}", self.backend.name());
        let rows = match self.backend.execute(conn, sql, params, fetch) {
            Ok(rows) => rows,
            Err(e) if guarded && !self.backend.is_connection_lost(&e) => {
                return Err(self.undo_statement(e));
            }
            Err(e) => return Err(e),
        };
        if guarded {
            self.backend.execute(conn, RELEASE_SAVEPOINT, &[], false)?;
        }
        if self.in_transaction {
            self.pending += 1;
        }
        if self.autosave {
            self.save()?;
        }
        Ok(rows)
    }

    /// Roll back to the savepoint taken before the failed statement. If
    /// that fails too the whole transaction is rolled back and the lost
    /// statements are reported.
    fn undo_statement(&mut self, err: DbError) -> DbError {
        let Some(conn) = self.conn.as_mut() else {
            return err;
        };
        let undo = match self.backend.execute(conn, ROLLBACK_TO_SAVEPOINT, &[], false) {
            Ok(_) => return err,
            Err(undo) => undo,
        };
        log::warn!(
            "{}: rollback to savepoint failed ({undo}), rolling back transaction",
            self.backend.name()
        );
        if let Err(e) = self.backend.rollback(conn) {
            log::warn!("{}: rollback failed: {e}", self.backend.name());
        }
        self.in_transaction = false;
        DbError::TransactionRolledBack {
            discarded: std::mem::take(&mut self.pending),
            source: Box::new(err),
        }
    }

    fn run(&mut self, stmt: Statement, fetch: bool) -> Result<Vec<Row>, DbError> {
        self.exec(&stmt.sql, &stmt.params, fetch)
    }

    pub fn insert<K: AsRef<str>>(&mut self, table: &str, values: &[(K, Value)]) -> Result<(), DbError> {
        let stmt = statement::insert(&self.backend, table, values)?;
        self.run(stmt, false).map(drop)
    }

    /// Rows matching every `column = value` pair in `filter`.
    pub fn select<C, K>(
        &mut self,
        table: &str,
        columns: &[C],
        filter: &[(K, Value)],
    ) -> Result<Vec<Row>, DbError>
    where
        C: AsRef<str>,
        K: AsRef<str>,
    {
        let stmt = statement::select(&self.backend, table, columns, filter)?;
        self.run(stmt, true)
    }

    /// The single matching row. Zero matches is an error; so is more than
    /// one when `max_error` is set (otherwise the first row is returned).
    pub fn select_one<C, K>(
        &mut self,
        table: &str,
        columns: &[C],
        filter: &[(K, Value)],
        max_error: bool,
    ) -> Result<Row, DbError>
    where
        C: AsRef<str>,
        K: AsRef<str>,
    {
        let mut rows = self.select(table, columns, filter)?;
        if rows.is_empty() {
            return Err(DbError::NoRows {
                table: table.to_string(),
            });
        }
        if max_error && rows.len() > 1 {
            return Err(DbError::TooManyRows {
                table: table.to_string(),
                count: rows.len(),
            });
        }
        Ok(rows.swap_remove(0))
    }

    pub fn select_count<K: AsRef<str>>(
        &mut self,
        table: &str,
        filter: &[(K, Value)],
    ) -> Result<u64, DbError> {
        let stmt = statement::count(&self.backend, table, filter)?;
        let rows = self.run(stmt, true)?;
        let value = rows.first().and_then(|r| r.first());
        value
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                let got = value.map_or_else(|| "no row".to_string(), Value::to_string);
                DbError::UnexpectedResult(format!("count of '{table}' returned {got}"))
            })
    }

    /// Set `values` on every row matching `filter`. An empty filter is
    /// rejected.
    pub fn update<K, W>(
        &mut self,
        table: &str,
        values: &[(K, Value)],
        filter: &[(W, Value)],
    ) -> Result<(), DbError>
    where
        K: AsRef<str>,
        W: AsRef<str>,
    {
        let stmt = statement::update(&self.backend, table, values, filter)?;
        self.run(stmt, false).map(drop)
    }

    /// Delete every row matching `filter`. An empty filter is rejected.
    pub fn delete<K: AsRef<str>>(&mut self, table: &str, filter: &[(K, Value)]) -> Result<(), DbError> {
        let stmt = statement::delete(&self.backend, table, filter)?;
        self.run(stmt, false).map(drop)
    }
}

impl<B: Backend> Drop for Database<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close(true) {
            log::error!("{}: failed to close database: {e}", self.backend.name());
        }
    }
}

fn terminated(sql: &str) -> Cow<'_, str> {
    if sql.trim_end().ends_with(';') {
        Cow::Borrowed(sql)
    } else {
        Cow::Owned(format!("{sql};"))
    }
}
