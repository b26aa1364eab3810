//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (SQLite file).
    pub source: SourceConfig,

    /// Target database configuration (MySQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationOptions,
}

/// Source database (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

/// Target database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host (default: localhost).
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// How rows violating a uniqueness constraint are made consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStrategy {
    /// Delete every row in a violating group except the keeper.
    #[default]
    Remove,
    /// Append `_dup_N` to the first constraint column of non-keeper rows.
    Rename,
}

impl fmt::Display for DuplicateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateStrategy::Remove => write!(f, "remove"),
            DuplicateStrategy::Rename => write!(f, "rename"),
        }
    }
}

impl FromStr for DuplicateStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remove" => Ok(DuplicateStrategy::Remove),
            "rename" => Ok(DuplicateStrategy::Rename),
            other => Err(format!(
                "unknown duplicate strategy '{}', expected 'remove' or 'rename'",
                other
            )),
        }
    }
}

/// Per-run migration options. Immutable once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Transfer row data (false = schema only).
    #[serde(default = "default_true")]
    pub include_data: bool,

    /// Run duplicate resolution against the source before transfer.
    #[serde(default = "default_true")]
    pub resolve_duplicates: bool,

    /// Strategy used by duplicate resolution.
    #[serde(default)]
    pub duplicate_strategy: DuplicateStrategy,

    /// Rows per insert batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Keep migrating remaining tables after a table fails.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Where the JSON report is written at run end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            include_data: true,
            resolve_duplicates: true,
            duplicate_strategy: DuplicateStrategy::default(),
            batch_size: default_batch_size(),
            continue_on_error: false,
            report_path: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    crate::transfer::DEFAULT_BATCH_SIZE
}
