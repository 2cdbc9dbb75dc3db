//! SQLite backend over rusqlite.

use std::path::{Path, PathBuf};

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};

use crate::backend::Backend;
use crate::error::DbError;
use crate::value::{Row, Value};

/// Path that selects a private in-memory database.
pub const MEMORY: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    /// A file-backed database. The parent directory is created on connect.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// An in-memory database. Every connection starts empty, so contents do
    /// not survive a reconnect.
    pub fn in_memory() -> Self {
        Self::open(MEMORY)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY
    }
}

impl Backend for SqliteBackend {
    type Conn = Connection;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn connect(&mut self) -> Result<Connection, DbError> {
        if self.is_memory() {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;
            return Ok(conn);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    fn disconnect(&mut self, conn: Connection) -> Result<(), DbError> {
        conn.close().map_err(|(_, e)| DbError::from(e))
    }

    fn execute(
        &mut self,
        conn: &mut Connection,
        sql: &str,
        params: &[Value],
        fetch: bool,
    ) -> Result<Vec<Row>, DbError> {
        let mut stmt = conn.prepare(sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        // Statements run to completion even when nothing is fetched.
        while let Some(row) = rows.next()? {
            if !fetch {
                continue;
            }
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn begin(&mut self, conn: &mut Connection) -> Result<(), DbError> {
        conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self, conn: &mut Connection) -> Result<(), DbError> {
        conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self, conn: &mut Connection) -> Result<(), DbError> {
        conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn table_columns(
        &mut self,
        conn: &mut Connection,
        table: &str,
    ) -> Result<Option<Vec<String>>, DbError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if columns.is_empty() { None } else { Some(columns) })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let v = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
            Value::Bool(b) => ValueRef::Integer(i64::from(*b)),
            other => {
                let text = other.to_text().unwrap_or_default();
                return Ok(ToSqlOutput::Owned(SqlValue::Text(text)));
            }
        };
        Ok(ToSqlOutput::Borrowed(v))
    }
}

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> (SqliteBackend, Connection) {
        let mut backend = SqliteBackend::in_memory();
        let conn = backend.connect().unwrap();
        (backend, conn)
    }

    #[test]
    fn test_execute_binds_and_fetches() {
        let (mut backend, mut conn) = memory_conn();
        backend
            .execute(&mut conn, "CREATE TABLE t (a INTEGER, b TEXT, c BLOB, d REAL);", &[], false)
            .unwrap();
        backend
            .execute(
                &mut conn,
                "INSERT INTO t (a,b,c,d) VALUES (?,?,?,?);",
                &[
                    Value::Bool(true),
                    Value::from("héllo"),
                    Value::Blob(vec![0, 255]),
                    Value::Real(1.5),
                ],
                false,
            )
            .unwrap();
        let rows = backend
            .execute(&mut conn, "SELECT a,b,c,d FROM t;", &[], true)
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::Integer(1),
                Value::Text("héllo".into()),
                Value::Blob(vec![0, 255]),
                Value::Real(1.5),
            ]]
        );
    }

    #[test]
    fn test_typed_values_stored_as_text() {
        let (mut backend, mut conn) = memory_conn();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let rows = backend
            .execute(
                &mut conn,
                "SELECT ?, ?;",
                &[Value::Date(day), Value::Uuid(uuid::Uuid::nil())],
                true,
            )
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::from("2024-02-29"),
                Value::from("00000000-0000-0000-0000-000000000000"),
            ]]
        );
    }

    #[test]
    fn test_unfetched_rows_are_discarded() {
        let (mut backend, mut conn) = memory_conn();
        let rows = backend.execute(&mut conn, "SELECT 1;", &[], false).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_table_columns() {
        let (mut backend, mut conn) = memory_conn();
        assert_eq!(backend.table_columns(&mut conn, "missing").unwrap(), None);
        conn.execute_batch("CREATE TABLE t (id INTEGER, name TEXT);")
            .unwrap();
        assert_eq!(
            backend.table_columns(&mut conn, "t").unwrap(),
            Some(vec!["id".to_string(), "name".to_string()])
        );
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("db.sqlite");
        let mut backend = SqliteBackend::open(&path);
        assert!(!backend.is_memory());
        let conn = backend.connect().unwrap();
        backend.disconnect(conn).unwrap();
        assert!(path.exists());
    }
}
