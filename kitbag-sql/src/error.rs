use std::io::ErrorKind;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database closed")]
    Closed,
    #[error("No rows in '{table}' match the filter")]
    NoRows { table: String },
    #[error("Expected exactly one row in '{table}', found {count}")]
    TooManyRows { table: String, count: usize },
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Refusing to {action} every row of '{table}': filter is empty")]
    EmptyFilter { action: &'static str, table: String },
    #[error("Record {0} has been deleted from the database")]
    RecordDeleted(String),
    #[error("Unsupported type {type_name} for column '{column}'")]
    UnsupportedColumnType { column: String, type_name: String },
    #[error("Update of '{table}' sets no columns")]
    EmptyValues { table: String },
    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),
    #[error("Transaction rolled back, {discarded} uncommitted statement(s) lost: {source}")]
    TransactionRolledBack {
        discarded: usize,
        source: Box<DbError>,
    },
}

/// SQLSTATE codes reporting that the server ended or refused the session:
/// class 08 (connection exception) and the 57P0x shutdown codes
/// (admin shutdown, crash shutdown, cannot connect now).
pub fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

impl DbError {
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Whether the error means the connection itself is unusable, as opposed
    /// to a problem with one statement.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::CannotOpen | ErrorCode::SystemIoFailure)
            }
            DbError::Postgres(sqlx::Error::Database(db)) => db
                .code()
                .is_some_and(|code| is_connection_sqlstate(&code)),
            DbError::Postgres(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            DbError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
