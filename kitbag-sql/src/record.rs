//! One logical row addressed by its index columns.

use std::fmt;

use crate::backend::Backend;
use crate::database::Database;
use crate::error::DbError;
use crate::statement::validate_identifier;
use crate::value::Value;

/// A row identified by an index (usually the primary key columns).
///
/// Index columns are cached and served locally; any other column is read
/// from the database on every [`get`](Record::get). The record does not
/// hold the database handle, so one handle can back many records.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table: String,
    index: Vec<(String, Value)>,
    deleted: bool,
}

impl Record {
    pub fn new<K: Into<String>>(
        table: impl Into<String>,
        index: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Self, DbError> {
        let table = table.into();
        validate_identifier(&table)?;
        let index: Vec<(String, Value)> = index.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if index.is_empty() {
            return Err(DbError::EmptyFilter {
                action: "address",
                table,
            });
        }
        for (column, _) in &index {
            validate_identifier(column)?;
        }
        Ok(Self {
            table,
            index,
            deleted: false,
        })
    }

    /// Like [`new`](Record::new), inserting the index values as a new row
    /// when no row matches yet.
    pub fn open_or_insert<B, K>(
        db: &mut Database<B>,
        table: impl Into<String>,
        index: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Self, DbError>
    where
        B: Backend,
        K: Into<String>,
    {
        let record = Self::new(table, index)?;
        if !record.exists(db)? {
            log::debug!("inserting {record}");
            db.insert(&record.table, &record.index)?;
        }
        Ok(record)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn index(&self) -> &[(String, Value)] {
        &self.index
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn ensure_live(&self) -> Result<(), DbError> {
        if self.deleted {
            Err(DbError::RecordDeleted(self.to_string()))
        } else {
            Ok(())
        }
    }

    fn cached(&self, column: &str) -> Option<&Value> {
        self.index
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn exists<B: Backend>(&self, db: &mut Database<B>) -> Result<bool, DbError> {
        self.ensure_live()?;
        let first = [self.index[0].0.as_str()];
        Ok(!db.select(&self.table, &first, &self.index)?.is_empty())
    }

    pub fn get<B: Backend>(&self, db: &mut Database<B>, column: &str) -> Result<Value, DbError> {
        self.ensure_live()?;
        if let Some(v) = self.cached(column) {
            return Ok(v.clone());
        }
        let mut row = db.select_one(&self.table, &[column], &self.index, true)?;
        Ok(row.pop().unwrap_or(Value::Null))
    }

    /// Write one column. Changing an index column re-addresses the record.
    pub fn set<B: Backend>(
        &mut self,
        db: &mut Database<B>,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<(), DbError> {
        self.ensure_live()?;
        let value = value.into();
        db.update(&self.table, &[(column, value.clone())], &self.index)?;
        if let Some((_, cached)) = self.index.iter_mut().find(|(c, _)| c == column) {
            *cached = value;
        }
        Ok(())
    }

    /// Set a column to NULL.
    pub fn clear<B: Backend>(&mut self, db: &mut Database<B>, column: &str) -> Result<(), DbError> {
        self.set(db, column, Value::Null)
    }

    /// Delete the row. The record cannot be used afterwards.
    pub fn delete<B: Backend>(&mut self, db: &mut Database<B>) -> Result<(), DbError> {
        self.ensure_live()?;
        db.delete(&self.table, &self.index)?;
        self.deleted = true;
        Ok(())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.table)?;
        for (i, (column, value)) in self.index.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{column}={value}")?;
        }
        f.write_str(")")
    }
}
