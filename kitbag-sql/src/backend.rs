use crate::error::DbError;
use crate::value::{Row, Value};

/// What a concrete database driver has to provide.
///
/// Backends only know how to open and close connections, run one
/// parameterized statement, manage transactions and introspect existing
/// tables. Statement assembly and migration planning live in the shared
/// layer ([`crate::statement`], [`crate::schema`]).
pub trait Backend {
    /// A live driver connection.
    type Conn;

    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Placeholder token for the parameter at 1-based position `index`.
    fn placeholder(&self, index: usize) -> String;

    fn connect(&mut self) -> Result<Self::Conn, DbError>;

    fn disconnect(&mut self, conn: Self::Conn) -> Result<(), DbError>;

    /// Run one statement with bound parameters. Rows are only collected
    /// when `fetch` is set.
    fn execute(
        &mut self,
        conn: &mut Self::Conn,
        sql: &str,
        params: &[Value],
        fetch: bool,
    ) -> Result<Vec<Row>, DbError>;

    fn begin(&mut self, conn: &mut Self::Conn) -> Result<(), DbError>;

    fn commit(&mut self, conn: &mut Self::Conn) -> Result<(), DbError>;

    fn rollback(&mut self, conn: &mut Self::Conn) -> Result<(), DbError>;

    /// Column names of `table`, or `None` if the table does not exist.
    fn table_columns(
        &mut self,
        conn: &mut Self::Conn,
        table: &str,
    ) -> Result<Option<Vec<String>>, DbError>;

    /// DDL adding one column to an existing table.
    fn add_column_sql(&self, table: &str, column: &str, sql_type: &str) -> String {
        format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}")
    }

    /// Whether one failed statement poisons the whole open transaction
    /// (PostgreSQL). When set, statements inside a manual-save transaction
    /// run under a savepoint so a failure only undoes that statement.
    fn aborts_transaction_on_error(&self) -> bool {
        false
    }

    /// Whether `err` means the connection has to be re-opened.
    fn is_connection_lost(&self, err: &DbError) -> bool {
        err.is_connection_lost()
    }
}
