//! Database settings file.
//!
//! The default location is `~/.config/kitbag/database.toml`:
//!
//! ```toml
//! autosave = true
//! connect_on_init = true
//!
//! [backend]
//! kind = "sqlite"
//! path = "/var/lib/app/app.db"
//!
//! [schema.users]
//! id = "INTEGER PRIMARY KEY"
//! name = "TEXT"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::database::DatabaseOptions;
use crate::postgres::PostgresConfig;
use crate::schema::Schema;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid settings: {0}")]
    Invalid(String),
    #[error("No configuration directory on this platform")]
    NoConfigDir,
}

/// Canonical path to the settings file: `~/.config/kitbag/database.toml`.
pub fn settings_path() -> Result<PathBuf, ConfigError> {
    let config = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(config.join("kitbag").join("database.toml"))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Sqlite { path: PathBuf },
    Postgres(PostgresConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_true")]
    pub autosave: bool,
    #[serde(default = "default_true")]
    pub connect_on_init: bool,
    pub backend: BackendConfig,
    /// `[schema.<table>]` tables of `column = "TYPE"`, in file order.
    #[serde(default)]
    pub schema: toml::Table,
}

impl DatabaseConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.schema()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load from [`settings_path`].
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&settings_path()?)
    }

    /// The `[schema]` section as a [`Schema`], or `None` when it is empty.
    pub fn schema(&self) -> Result<Option<Schema>, ConfigError> {
        if self.schema.is_empty() {
            return Ok(None);
        }
        let mut schema = Schema::new();
        for (table, columns) in &self.schema {
            let columns = columns
                .as_table()
                .ok_or_else(|| ConfigError::Invalid(format!("schema.{table} is not a table")))?;
            let mut defs = Vec::with_capacity(columns.len());
            for (column, ty) in columns {
                let ty = ty.as_str().ok_or_else(|| {
                    ConfigError::Invalid(format!("schema.{table}.{column} must be a type string"))
                })?;
                defs.push((column.clone(), ty.to_string()));
            }
            schema = schema.table(table.clone(), defs);
        }
        schema
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Some(schema))
    }

    pub fn options(&self) -> Result<DatabaseOptions, ConfigError> {
        Ok(DatabaseOptions {
            autosave: self.autosave,
            connect_on_init: self.connect_on_init,
            schema: self.schema()?,
        })
    }
}
