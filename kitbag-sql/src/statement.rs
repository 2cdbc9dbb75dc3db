//! Statement rendering shared by every backend.
//!
//! Filters are flat equality conjunctions (`a=? AND b=?`); there is no
//! support for OR, ranges or joins. Only placeholders differ per backend.

use crate::backend::Backend;
use crate::error::DbError;
use crate::value::Value;

/// Rendered SQL text plus its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Table and column names are interpolated into SQL text, so they are
/// restricted to plain identifiers.
pub fn validate_identifier(name: &str) -> Result<(), DbError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

/// Accumulates parameters while rendering `column=<placeholder>` pairs.
struct Renderer<'a, B: Backend + ?Sized> {
    backend: &'a B,
    params: Vec<Value>,
}

impl<'a, B: Backend + ?Sized> Renderer<'a, B> {
    fn new(backend: &'a B) -> Self {
        Self {
            backend,
            params: Vec::new(),
        }
    }

    fn push(&mut self, value: &Value) -> String {
        self.params.push(value.clone());
        self.backend.placeholder(self.params.len())
    }

    fn assignments<K: AsRef<str>>(
        &mut self,
        pairs: &[(K, Value)],
        sep: &str,
    ) -> Result<String, DbError> {
        let mut parts = Vec::with_capacity(pairs.len());
        for (column, value) in pairs {
            let column = column.as_ref();
            validate_identifier(column)?;
            let placeholder = self.push(value);
            parts.push(format!("{column}={placeholder}"));
        }
        Ok(parts.join(sep))
    }

    fn where_clause<K: AsRef<str>>(&mut self, filter: &[(K, Value)]) -> Result<String, DbError> {
        if filter.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" WHERE {}", self.assignments(filter, " AND ")?))
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

pub fn insert<B, K>(backend: &B, table: &str, values: &[(K, Value)]) -> Result<Statement, DbError>
where
    B: Backend + ?Sized,
    K: AsRef<str>,
{
    validate_identifier(table)?;
    let mut r = Renderer::new(backend);
    if values.is_empty() {
        return Ok(r.finish(format!("INSERT INTO {table} DEFAULT VALUES")));
    }
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (column, value) in values {
        let column = column.as_ref();
        validate_identifier(column)?;
        columns.push(column);
        placeholders.push(r.push(value));
    }
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(","),
        placeholders.join(",")
    );
    Ok(r.finish(sql))
}

/// An empty `columns` list selects `*`; an empty filter selects every row.
pub fn select<B, C, K>(
    backend: &B,
    table: &str,
    columns: &[C],
    filter: &[(K, Value)],
) -> Result<Statement, DbError>
where
    B: Backend + ?Sized,
    C: AsRef<str>,
    K: AsRef<str>,
{
    validate_identifier(table)?;
    let column_list = if columns.is_empty() {
        "*".to_string()
    } else {
        let mut names = Vec::with_capacity(columns.len());
        for c in columns {
            validate_identifier(c.as_ref())?;
            names.push(c.as_ref());
        }
        names.join(",")
    };
    let mut r = Renderer::new(backend);
    let where_sql = r.where_clause(filter)?;
    Ok(r.finish(format!("SELECT {column_list} FROM {table}{where_sql}")))
}

pub fn count<B, K>(backend: &B, table: &str, filter: &[(K, Value)]) -> Result<Statement, DbError>
where
    B: Backend + ?Sized,
    K: AsRef<str>,
{
    validate_identifier(table)?;
    let mut r = Renderer::new(backend);
    let where_sql = r.where_clause(filter)?;
    Ok(r.finish(format!("SELECT COUNT(*) FROM {table}{where_sql}")))
}

/// `SET` parameters come first, then the filter's.
pub fn update<B, K, W>(
    backend: &B,
    table: &str,
    values: &[(K, Value)],
    filter: &[(W, Value)],
) -> Result<Statement, DbError>
where
    B: Backend + ?Sized,
    K: AsRef<str>,
    W: AsRef<str>,
{
    validate_identifier(table)?;
    if filter.is_empty() {
        return Err(DbError::EmptyFilter {
            action: "update",
            table: table.to_string(),
        });
    }
    if values.is_empty() {
        return Err(DbError::EmptyValues {
            table: table.to_string(),
        });
    }
    let mut r = Renderer::new(backend);
    let set_sql = r.assignments(values, ",")?;
    let where_sql = r.where_clause(filter)?;
    Ok(r.finish(format!("UPDATE {table} SET {set_sql}{where_sql}")))
}

pub fn delete<B, K>(backend: &B, table: &str, filter: &[(K, Value)]) -> Result<Statement, DbError>
where
    B: Backend + ?Sized,
    K: AsRef<str>,
{
    validate_identifier(table)?;
    if filter.is_empty() {
        return Err(DbError::EmptyFilter {
            action: "delete",
            table: table.to_string(),
        });
    }
    let mut r = Renderer::new(backend);
    let where_sql = r.where_clause(filter)?;
    Ok(r.finish(format!("DELETE FROM {table}{where_sql}")))
}
