//! A small generic row store over SQLite and PostgreSQL.
//!
//! [`Database`] owns one connection through a [`Backend`], renders flat
//! equality-filtered CRUD statements, migrates an additive [`Schema`] on
//! first connect, and retries a statement once after a lost connection.
//! [`Record`] wraps a single row addressed by its index columns.

pub mod backend;
pub mod database;
pub mod error;
pub mod postgres;
pub mod record;
pub mod schema;
pub mod settings;
pub mod sqlite;
pub mod statement;
pub mod value;

pub use backend::Backend;
pub use database::{Database, DatabaseOptions};
pub use error::DbError;
pub use postgres::{PostgresBackend, PostgresConfig};
pub use record::Record;
pub use schema::{ColumnDef, Schema, SchemaReport, TableDef};
pub use settings::{BackendConfig, ConfigError, DatabaseConfig, settings_path};
pub use sqlite::SqliteBackend;
pub use statement::{Statement, validate_identifier};
pub use value::{Row, Value};
