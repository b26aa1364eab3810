//! Core traits for the migration engine.
//!
//! [`StatementSink`] is the seam between DDL synthesis and where the
//! statements end up: a live MySQL connection during a migration, or a SQL
//! script during an offline export. Both paths run the same synthesis code.

use async_trait::async_trait;

use crate::error::Result;

/// Destination for synthesized SQL statements.
#[async_trait]
pub trait StatementSink: Send {
    /// Execute (or record) one statement.
    ///
    /// Implementations return an error when the target rejects the
    /// statement; callers decide whether that is fatal.
    async fn execute(&mut self, statement: &str) -> Result<()>;

    /// Short name for logs (e.g. "mysql", "script").
    fn sink_type(&self) -> &str;
}
