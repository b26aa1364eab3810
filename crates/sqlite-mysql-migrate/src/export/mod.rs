//! Offline SQL script export.
//!
//! Emits the same DDL a live migration executes, followed by one literal
//! INSERT per row, so the script can be replayed with the `mysql` client.

use std::io::Write;

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use tracing::info;

use crate::core::schema::TableDescriptor;
use crate::core::traits::StatementSink;
use crate::error::{MigrateError, Result};
use crate::source::{select_all_sql, SqliteSource};
use crate::target::{quote_ident, SchemaSynthesizer, SESSION_SETUP};

/// Writes statements to a script, one per line group, `;`-terminated.
pub struct ScriptSink<W: Write + Send> {
    writer: W,
    statements: u64,
}

impl<W: Write + Send> ScriptSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            statements: 0,
        }
    }

    /// Write a `-- ` comment line.
    pub fn comment(&mut self, text: &str) -> Result<()> {
        writeln!(self.writer, "-- {}", text)?;
        Ok(())
    }

    pub fn blank_line(&mut self) -> Result<()> {
        writeln!(self.writer)?;
        Ok(())
    }

    pub fn statements(&self) -> u64 {
        self.statements
    }

    /// Flush and return the writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_statement(&mut self, statement: &str) -> Result<()> {
        writeln!(self.writer, "{};", statement)?;
        self.statements += 1;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> StatementSink for ScriptSink<W> {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        self.write_statement(statement)
    }

    fn sink_type(&self) -> &str {
        "script"
    }
}

/// Counts from one export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub tables: usize,
    pub rows: u64,
}

/// Renders a SQLite database as a MySQL script.
pub struct SqlExporter<'a> {
    source: &'a SqliteSource,
    include_data: bool,
}

impl<'a> SqlExporter<'a> {
    pub fn new(source: &'a SqliteSource) -> Self {
        Self {
            source,
            include_data: true,
        }
    }

    /// Emit DDL only.
    pub fn schema_only(mut self) -> Self {
        self.include_data = false;
        self
    }

    /// Write the script for every table to `sink`.
    pub async fn export<W: Write + Send>(&self, sink: &mut ScriptSink<W>) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();

        sink.comment("Migration from SQLite to MySQL")?;
        sink.comment(&format!("Generated: {}", Utc::now().to_rfc3339()))?;
        sink.blank_line()?;
        for statement in SESSION_SETUP {
            sink.write_statement(statement)?;
        }
        sink.blank_line()?;

        for name in self.source.list_tables().await? {
            let table = self.source.describe_table(&name).await?;

            sink.comment(&format!("Table: {}", table.name))?;
            SchemaSynthesizer::apply_table(sink, &table).await?;

            if self.include_data {
                summary.rows += self.export_rows(sink, &table).await?;
            }

            for stmt in SchemaSynthesizer::build_indexes(&table) {
                sink.execute(&stmt.sql).await?;
            }
            sink.blank_line()?;
            summary.tables += 1;
        }

        info!(
            "Exported {} tables and {} rows as {} statements",
            summary.tables,
            summary.rows,
            sink.statements()
        );
        Ok(summary)
    }

    async fn export_rows<W: Write + Send>(
        &self,
        sink: &mut ScriptSink<W>,
        table: &TableDescriptor,
    ) -> Result<u64> {
        let cols: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let prefix = format!("INSERT INTO {} ({}) VALUES", quote_ident(&table.name), cols.join(", "));

        let sql = select_all_sql(table);
        let mut rows = self.source.stream_rows(&sql, table.columns.len());
        let mut count = 0u64;

        while let Some(row) = rows.try_next().await.map_err(|e| {
            MigrateError::source_unavailable(e, format!("reading rows from {}", table.name))
        })? {
            let values: Vec<String> = row.iter().map(|v| v.to_sql_literal()).collect();
            sink.write_statement(&format!("{} ({})", prefix, values.join(", ")))?;
            count += 1;
        }

        Ok(count)
    }
}
