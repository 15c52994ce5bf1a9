//! Resolved runtime configuration.

use std::path::PathBuf;

use encoding_rs::Encoding;
use log::LevelFilter;

use crate::{cli::Settings, error::EtlError, io_utils};

pub const DATABASE_EXTENSION: &str = "sqlite3";

/// Server connection variables that have no meaning for the SQLite file.
pub const IGNORED_DATABASE_VARS: [&str; 4] = ["DB_HOST", "DB_PORT", "DB_USER", "DB_PASSWORD"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub dir: PathBuf,
    pub name: String,
}

impl DatabaseConfig {
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.{DATABASE_EXTENSION}", self.name))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_folder: PathBuf,
    pub batch_size: usize,
    pub encoding: &'static Encoding,
    pub database: DatabaseConfig,
}

impl Settings {
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            dir: self.db_dir.clone(),
            name: self.db_name.clone(),
        }
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, EtlError> {
        if self.batch_size == 0 {
            return Err(EtlError::Configuration(
                "batch size must be greater than zero".to_string(),
            ));
        }
        Ok(PipelineConfig {
            data_folder: self.data_folder.clone(),
            batch_size: self.batch_size,
            encoding: io_utils::resolve_encoding(Some(self.input_encoding.as_str()))?,
            database: self.database(),
        })
    }
}

/// Returns the names from [`IGNORED_DATABASE_VARS`] for which `is_set` holds.
pub fn ignored_database_settings(is_set: impl Fn(&str) -> bool) -> Vec<&'static str> {
    IGNORED_DATABASE_VARS
        .into_iter()
        .filter(|name| is_set(*name))
        .collect()
}

/// Maps level names, including the `WARNING`/`CRITICAL` spellings common in
/// existing `.env` files. Unknown names fall back to `Info`.
pub fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_ascii_uppercase().as_str() {
        "WARNING" => LevelFilter::Warn,
        "CRITICAL" | "FATAL" => LevelFilter::Error,
        other => other.parse().unwrap_or(LevelFilter::Info),
    }
}
