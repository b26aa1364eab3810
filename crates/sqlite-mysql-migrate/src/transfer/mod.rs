//! Batched row transfer from SQLite to MySQL.
//!
//! Rows stream from the source in declaration column order and are written in
//! fixed-size batches through one prepared INSERT. Every batch for a table
//! runs inside the caller's transaction, so a failure anywhere leaves the
//! caller free to roll the whole table back.

use std::time::{Duration, Instant};

use futures::TryStreamExt;
use mysql_async::prelude::*;
use mysql_async::{Statement, Transaction};
use tracing::debug;

use crate::core::schema::TableDescriptor;
use crate::core::value::Batch;
use crate::error::{MigrateError, Result};
use crate::source::{select_all_sql, SqliteSource};
use crate::target::{quote_ident, sql_value_to_mysql};

/// Rows per INSERT batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Statistics from transferring one table.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Total rows written.
    pub rows: u64,

    /// Batches executed.
    pub batches: u64,

    /// Time spent reading from the source.
    pub read_time: Duration,

    /// Time spent writing to the target.
    pub write_time: Duration,
}

/// Moves a table's rows into an open MySQL transaction.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    batch_size: usize,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl TransferEngine {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Transfer every row of `table`. A table with no rows is a no-op.
    pub async fn transfer(
        &self,
        table: &TableDescriptor,
        source: &SqliteSource,
        tx: &mut Transaction<'_>,
    ) -> Result<TransferStats> {
        let mut stats = TransferStats::default();
        let insert_sql = build_insert_sql(table);
        let select_sql = select_all_sql(table);

        let mut rows = source.stream_rows(&select_sql, table.columns.len());
        let mut stmt: Option<Statement> = None;
        let mut batch = Batch::with_capacity(self.batch_size);

        loop {
            let read_start = Instant::now();
            let next = rows.try_next().await.map_err(|e| {
                MigrateError::source_unavailable(e, format!("reading rows from {}", table.name))
            })?;
            stats.read_time += read_start.elapsed();

            let Some(row) = next else {
                break;
            };
            batch.rows.push(row);

            if batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Batch::with_capacity(self.batch_size));
                self.write_batch(tx, &mut stmt, &insert_sql, &table.name, full, &mut stats)
                    .await?;
            }
        }

        if !batch.is_empty() {
            self.write_batch(tx, &mut stmt, &insert_sql, &table.name, batch, &mut stats)
                .await?;
        }

        debug!(
            "{}: {} rows in {} batches (read {:?}, write {:?})",
            table.name, stats.rows, stats.batches, stats.read_time, stats.write_time
        );
        Ok(stats)
    }

    async fn write_batch(
        &self,
        tx: &mut Transaction<'_>,
        stmt: &mut Option<Statement>,
        insert_sql: &str,
        table: &str,
        batch: Batch,
        stats: &mut TransferStats,
    ) -> Result<()> {
        let write_start = Instant::now();

        // Prepared on first use so empty tables never touch the target
        let prepared = match stmt {
            Some(s) => s.clone(),
            None => {
                let s = tx
                    .prep(insert_sql)
                    .await
                    .map_err(|e| MigrateError::transfer(table, format!("preparing INSERT: {}", e)))?;
                *stmt = Some(s.clone());
                s
            }
        };

        let count = batch.len() as u64;
        let params = batch
            .rows
            .into_iter()
            .map(|row| row.iter().map(sql_value_to_mysql).collect::<Vec<_>>());

        tx.exec_batch(&prepared, params).await.map_err(|e| {
            MigrateError::transfer(table, format!("INSERT batch {}: {}", stats.batches + 1, e))
        })?;

        stats.rows += count;
        stats.batches += 1;
        stats.write_time += write_start.elapsed();
        Ok(())
    }
}

/// Parameterized INSERT covering every column in declaration order.
pub fn build_insert_sql(table: &TableDescriptor) -> String {
    let cols: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders = vec!["?"; cols.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table.name),
        cols.join(", "),
        placeholders
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::fixtures::user_table;

    #[test]
    fn test_build_insert_sql() {
        assert_eq!(
            build_insert_sql(&user_table()),
            "INSERT INTO `user` (`id`, `login`, `email`, `is_admin`) VALUES (?, ?, ?, ?)"
        );
    }

    #[test]
    fn test_batch_size_floor() {
        assert_eq!(TransferEngine::new(0).batch_size(), 1);
        assert_eq!(TransferEngine::default().batch_size(), DEFAULT_BATCH_SIZE);
    }
}
