//! PostgreSQL backend over sqlx.
//!
//! sqlx is async; the backend owns a current-thread tokio runtime and
//! drives one `PgConnection` on it, so callers see the same blocking API
//! as the SQLite backend.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::decode::Decode;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgConnectOptions, PgConnection, PgHasArrayType, PgRow,
    PgTypeInfo, Postgres,
};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Column, Connection, Executor, Row as _, Type, TypeInfo};
use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::backend::Backend;
use crate::database::Database;
use crate::error::DbError;
use crate::statement::validate_identifier;
use crate::value::{Row, Value};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5432
}

/// Connection parameters. The database name defaults to the user name.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl PostgresConfig {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: user.into(),
            password: password.into(),
            name: None,
        }
    }

    pub fn database(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.user)
    }

    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(self.database());
        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug)]
pub struct PostgresBackend {
    config: PostgresConfig,
    runtime: Runtime,
}

impl PostgresBackend {
    pub fn new(config: PostgresConfig) -> Result<Self, DbError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { config, runtime })
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }
}

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

impl Backend for PostgresBackend {
    type Conn = PgConnection;

    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn connect(&mut self) -> Result<PgConnection, DbError> {
        let options = self.config.connect_options();
        log::debug!(
            "postgres: {}@{}:{}/{}",
            self.config.user,
            self.config.host,
            self.config.port,
            self.config.database()
        );
        Ok(self.runtime.block_on(PgConnection::connect_with(&options))?)
    }

    fn disconnect(&mut self, conn: PgConnection) -> Result<(), DbError> {
        self.runtime.block_on(conn.close())?;
        Ok(())
    }

    fn execute(
        &mut self,
        conn: &mut PgConnection,
        sql: &str,
        params: &[Value],
        fetch: bool,
    ) -> Result<Vec<Row>, DbError> {
        log::trace!(
            "postgres: parameter types [{}]",
            params
                .iter()
                .map(|v| param_type(v).map_or("NULL".to_string(), |t| t.name().to_string()))
                .collect::<Vec<_>>()
                .join(",")
        );
        // Unprepared, so cached plans never outlive an ALTER TABLE.
        let query = params
            .iter()
            .fold(sqlx::query(sql).persistent(false), bind_value);
        if fetch {
            let rows = self.runtime.block_on(query.fetch_all(&mut *conn))?;
            rows.iter().map(decode_row).collect()
        } else {
            self.runtime.block_on(query.execute(&mut *conn))?;
            Ok(Vec::new())
        }
    }

    fn begin(&mut self, conn: &mut PgConnection) -> Result<(), DbError> {
        self.runtime.block_on(conn.execute("BEGIN"))?;
        Ok(())
    }

    fn commit(&mut self, conn: &mut PgConnection) -> Result<(), DbError> {
        self.runtime.block_on(conn.execute("COMMIT"))?;
        Ok(())
    }

    fn rollback(&mut self, conn: &mut PgConnection) -> Result<(), DbError> {
        self.runtime.block_on(conn.execute("ROLLBACK"))?;
        Ok(())
    }

    fn aborts_transaction_on_error(&self) -> bool {
        true
    }

    fn table_columns(
        &mut self,
        conn: &mut PgConnection,
        table: &str,
    ) -> Result<Option<Vec<String>>, DbError> {
        // Unquoted identifiers fold to lower case in PostgreSQL.
        let table = table.to_ascii_lowercase();
        let columns: Vec<String> = self.runtime.block_on(
            sqlx::query_scalar(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position",
            )
            .bind(&table)
            .fetch_all(&mut *conn),
        )?;
        Ok(if columns.is_empty() { None } else { Some(columns) })
    }

    fn add_column_sql(&self, table: &str, column: &str, sql_type: &str) -> String {
        format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {sql_type}")
    }
}

/// SQL NULL sent with an unspecified type, so the server infers it from
/// the column it is compared with or assigned to.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn bind_value<'q>(query: PgQuery<'q>, value: &'q Value) -> PgQuery<'q> {
    match value {
        Value::Null => query.bind(UntypedNull),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Blob(b) => query.bind(b.as_slice()),
        Value::Bool(b) => query.bind(*b),
        Value::Timestamp(t) => query.bind(*t),
        Value::TimestampTz(t) => query.bind(*t),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::Uuid(u) => query.bind(*u),
        Value::Numeric(n) => query.bind(*n),
        Value::Json(j) => query.bind(Json(j)),
    }
}

/// The wire type [`bind_value`] sends for `value`; `None` leaves it to the
/// server.
fn param_type(value: &Value) -> Option<PgTypeInfo> {
    let info = match value {
        Value::Null => return None,
        Value::Integer(_) => <i64 as Type<Postgres>>::type_info(),
        Value::Real(_) => <f64 as Type<Postgres>>::type_info(),
        Value::Text(_) => <&str as Type<Postgres>>::type_info(),
        Value::Blob(_) => <&[u8] as Type<Postgres>>::type_info(),
        Value::Bool(_) => <bool as Type<Postgres>>::type_info(),
        Value::Timestamp(_) => <NaiveDateTime as Type<Postgres>>::type_info(),
        Value::TimestampTz(_) => <DateTime<Utc> as Type<Postgres>>::type_info(),
        Value::Date(_) => <NaiveDate as Type<Postgres>>::type_info(),
        Value::Time(_) => <NaiveTime as Type<Postgres>>::type_info(),
        Value::Uuid(_) => <Uuid as Type<Postgres>>::type_info(),
        Value::Numeric(_) => <Decimal as Type<Postgres>>::type_info(),
        Value::Json(_) => <Json<&serde_json::Value> as Type<Postgres>>::type_info(),
    };
    Some(info)
}

/// A one-dimensional array column as a JSON array.
fn json_array<T>(row: &PgRow, index: usize) -> Result<Option<Value>, DbError>
where
    T: for<'a> Decode<'a, Postgres> + Type<Postgres> + PgHasArrayType + Into<serde_json::Value>,
{
    let items = row.try_get::<Option<Vec<Option<T>>>, _>(index)?;
    Ok(items.map(|items| {
        Value::Json(serde_json::Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(serde_json::Value::Null, Into::into))
                .collect(),
        ))
    }))
}

fn decode_row(row: &PgRow) -> Result<Row, DbError> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::Bool),
            "INT2" => row.try_get::<Option<i16>, _>(i)?.map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(i)?.map(Value::from),
            "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::Integer),
            "FLOAT4" => row.try_get::<Option<f32>, _>(i)?.map(Value::from),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(Value::Real),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "UNKNOWN" => {
                row.try_get::<Option<String>, _>(i)?.map(Value::Text)
            }
            "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(i)?.map(Value::Blob),
            "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(i)?.map(Value::Timestamp),
            "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(i)?.map(Value::TimestampTz),
            "DATE" => row.try_get::<Option<NaiveDate>, _>(i)?.map(Value::Date),
            "TIME" => row.try_get::<Option<NaiveTime>, _>(i)?.map(Value::Time),
            "UUID" => row.try_get::<Option<Uuid>, _>(i)?.map(Value::Uuid),
            "NUMERIC" => row.try_get::<Option<Decimal>, _>(i)?.map(Value::Numeric),
            "JSON" | "JSONB" => row
                .try_get::<Option<Json<serde_json::Value>>, _>(i)?
                .map(|j| Value::Json(j.0)),
            "BOOL[]" => json_array::<bool>(row, i)?,
            "INT2[]" => json_array::<i16>(row, i)?,
            "INT4[]" => json_array::<i32>(row, i)?,
            "INT8[]" => json_array::<i64>(row, i)?,
            "FLOAT4[]" => json_array::<f32>(row, i)?,
            "FLOAT8[]" => json_array::<f64>(row, i)?,
            "TEXT[]" | "VARCHAR[]" => json_array::<String>(row, i)?,
            "VOID" => None,
            other => {
                return Err(DbError::UnsupportedColumnType {
                    column: column.name().to_string(),
                    type_name: other.to_string(),
                });
            }
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}

// ── Triggers ──

impl Database<PostgresBackend> {
    /// Fill `column` with a random UUID (as text) on insert when it is left
    /// NULL. Adds the column if it does not exist. Needs PostgreSQL 13+.
    pub fn install_uuid_trigger(&mut self, table: &str, column: &str) -> Result<(), DbError> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        let function = format!("{table}_{column}_uuid");
        self.exec(
            &format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} TEXT"),
            &[],
            false,
        )?;
        self.exec(
            &format!(
                "CREATE OR REPLACE FUNCTION {function}() RETURNS trigger LANGUAGE plpgsql AS $$ \
                 BEGIN \
                 IF NEW.{column} IS NULL THEN NEW.{column} := gen_random_uuid()::text; END IF; \
                 RETURN NEW; \
                 END; $$"
            ),
            &[],
            false,
        )?;
        self.replace_trigger(table, &function, "INSERT")?;
        self.save()
    }

    /// Stamp `created` on insert and `edited` on every insert and update.
    /// Adds both columns as `TIMESTAMP` if they do not exist.
    pub fn install_timestamp_triggers(
        &mut self,
        table: &str,
        created: &str,
        edited: &str,
    ) -> Result<(), DbError> {
        validate_identifier(table)?;
        validate_identifier(created)?;
        validate_identifier(edited)?;
        for column in [created, edited] {
            self.exec(
                &format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} TIMESTAMP"),
                &[],
                false,
            )?;
        }

        let on_insert = format!("{table}_{created}_created");
        self.exec(
            &format!(
                "CREATE OR REPLACE FUNCTION {on_insert}() RETURNS trigger LANGUAGE plpgsql AS $$ \
                 BEGIN NEW.{created} := NOW(); NEW.{edited} := NOW(); RETURN NEW; END; $$"
            ),
            &[],
            false,
        )?;
        self.replace_trigger(table, &on_insert, "INSERT")?;

        let on_update = format!("{table}_{edited}_edited");
        self.exec(
            &format!(
                "CREATE OR REPLACE FUNCTION {on_update}() RETURNS trigger LANGUAGE plpgsql AS $$ \
                 BEGIN NEW.{edited} := NOW(); RETURN NEW; END; $$"
            ),
            &[],
            false,
        )?;
        self.replace_trigger(table, &on_update, "UPDATE")?;
        self.save()
    }

    fn replace_trigger(&mut self, table: &str, function: &str, event: &str) -> Result<(), DbError> {
        self.exec(
            &format!("DROP TRIGGER IF EXISTS {function} ON {table}"),
            &[],
            false,
        )?;
        self.exec(
            &format!(
                "CREATE TRIGGER {function} BEFORE {event} ON {table} \
                 FOR EACH ROW EXECUTE FUNCTION {function}()"
            ),
            &[],
            false,
        )?;
        Ok(())
    }
}
