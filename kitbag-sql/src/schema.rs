//! Declared table layouts and additive migration.
//!
//! A [`Schema`] is authoritative but additive-only: migration creates missing
//! tables and adds missing columns, and never drops or alters anything that
//! already exists. Column type strings go into the DDL verbatim.

use crate::backend::Backend;
use crate::database::Database;
use crate::error::DbError;
use crate::statement::validate_identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Backend-native type, e.g. `"TEXT"` or `"INTEGER PRIMARY KEY"`.
    pub sql_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

/// Tables and their columns, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<TableDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. Declaring the same table twice appends any new
    /// columns to the earlier declaration.
    pub fn table<I, N, T>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        let name = name.into();
        let idx = match self.tables.iter().position(|t| t.name == name) {
            Some(i) => i,
            None => {
                self.tables.push(TableDef {
                    name,
                    columns: Vec::new(),
                });
                self.tables.len() - 1
            }
        };
        let table = &mut self.tables[idx];
        for (col, ty) in columns {
            let col = col.into();
            if !table.columns.iter().any(|c| c.name == col) {
                table.columns.push(ColumnDef {
                    name: col,
                    sql_type: ty.into(),
                });
            }
        }
        self
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn get(&self, table: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == table)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Check names before any DDL is issued.
    pub fn validate(&self) -> Result<(), DbError> {
        for table in &self.tables {
            validate_identifier(&table.name)?;
            if table.columns.is_empty() {
                return Err(DbError::invalid_schema(format!(
                    "table '{}' declares no columns",
                    table.name
                )));
            }
            for col in &table.columns {
                validate_identifier(&col.name)?;
            }
        }
        Ok(())
    }
}

/// DDL issued by one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub tables_created: Vec<String>,
    /// `(table, column)` pairs
    pub columns_added: Vec<(String, String)>,
}

impl SchemaReport {
    /// True when the live database already matched the schema.
    pub fn is_noop(&self) -> bool {
        self.tables_created.is_empty() && self.columns_added.is_empty()
    }
}

/// Bring the live database up to `schema`, creating what is missing.
pub(crate) fn apply<B: Backend>(
    db: &mut Database<B>,
    schema: &Schema,
) -> Result<SchemaReport, DbError> {
    schema.validate()?;
    let mut report = SchemaReport::default();

    for table in schema.tables() {
        match db.table_columns(&table.name)? {
            None => {
                let columns = table
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.sql_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!("CREATE TABLE IF NOT EXISTS {} ({columns})", table.name);
                log::debug!("migrate: {sql}");
                db.exec(&sql, &[], false)?;
                report.tables_created.push(table.name.clone());
            }
            Some(existing) => {
                for col in &table.columns {
                    if existing.iter().any(|e| e.eq_ignore_ascii_case(&col.name)) {
                        continue;
                    }
                    let sql = db
                        .backend()
                        .add_column_sql(&table.name, &col.name, &col.sql_type);
                    log::debug!("migrate: {sql}");
                    db.exec(&sql, &[], false)?;
                    report
                        .columns_added
                        .push((table.name.clone(), col.name.clone()));
                }
            }
        }
    }

    db.save()?;
    Ok(report)
}
