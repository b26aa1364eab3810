//! # sqlite-mysql-migrate
//!
//! SQLite to MySQL migration library.
//!
//! This library migrates the schema and contents of a SQLite database into
//! MySQL with support for:
//!
//! - **Type mapping** from SQLite's free-form declared types to MySQL types
//! - **Duplicate resolution** for uniqueness SQLite never enforced
//! - **Batched transfer** inside one MySQL transaction per table
//! - **Validation** of row counts and domain sanity checks
//! - **SQL export** of the same DDL and data as an offline script
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_mysql_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_mysql_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run().await?;
//!     println!("{}", report.render_text());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod duplicates;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod report;
pub mod source;
pub mod state;
pub mod target;
pub mod transfer;
pub mod typemap;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, DuplicateStrategy, MigrationOptions, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use export::{ExportSummary, ScriptSink, SqlExporter};
pub use orchestrator::{HealthCheckResult, Orchestrator, ProgressUpdate};
pub use report::{MigrationReport, RunStatus, TableReport, TableStatus};
pub use source::{SqliteSource, TableSummary};
pub use state::{RunHandle, RunRegistry, RunSnapshot};
pub use target::MysqlTarget;
pub use typemap::map_type;
pub use verify::{CheckStatus, SanityCheck, ValidationResult};
