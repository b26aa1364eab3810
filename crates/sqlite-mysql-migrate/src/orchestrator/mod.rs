//! Migration orchestrator - main workflow coordinator.
//!
//! A run moves `pending -> migrating -> completed | failed` and processes
//! tables one at a time in listing order:
//!
//! 1. introspect the source
//! 2. resolve duplicates in the source (optional)
//! 3. per table: drop and create, transfer rows in one transaction, create indexes
//! 4. validate row counts and run sanity checks
//! 5. finish the report
//!
//! Each table's rows commit or roll back as a unit. Tables already committed
//! stay migrated when a later table fails.

use std::time::Instant;

use mysql_async::TxOpts;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::schema::TableDescriptor;
use crate::duplicates::DuplicateResolver;
use crate::error::{MigrateError, Result};
use crate::report::{MigrationReport, RunStatus, TableStatus};
use crate::source::{SqliteSource, TableSummary};
use crate::state::RunHandle;
use crate::target::{MysqlSink, MysqlTarget, SchemaSynthesizer};
use crate::transfer::TransferEngine;
use crate::verify::{ValidationResult, Validator};

/// Progress update emitted as tables finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub run_id: String,
    /// Current phase: "introspect", "resolve", "migrate", "validate", "done".
    pub phase: String,
    /// Table just processed, if any.
    pub table: Option<String>,
    pub tables_completed: usize,
    pub tables_total: usize,
    /// Tables fully processed as a percentage.
    pub percent: u8,
}

/// Connectivity of both databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Percentage of `total` represented by `done`; an empty run is complete.
pub fn percent_complete(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: SqliteSource,
    target: MysqlTarget,
    run_handle: Option<RunHandle>,
    progress: bool,
}

impl Orchestrator {
    /// Open the source and connect to the target.
    pub async fn new(config: Config) -> Result<Self> {
        let source = SqliteSource::open(&config.source.path).await?;
        let target = MysqlTarget::connect(&config.target).await?;
        Ok(Self::from_parts(config, source, target))
    }

    /// Build from already-open connections.
    pub fn from_parts(config: Config, source: SqliteSource, target: MysqlTarget) -> Self {
        Self {
            config,
            source,
            target,
            run_handle: None,
            progress: false,
        }
    }

    /// Publish status, progress and log lines to a run registry entry.
    pub fn with_run_handle(mut self, handle: RunHandle) -> Self {
        self.run_handle = Some(handle);
        self
    }

    /// Print progress updates as JSON lines to stderr.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn source(&self) -> &SqliteSource {
        &self.source
    }

    pub fn target(&self) -> &MysqlTarget {
        &self.target
    }

    /// Test both connections independently, timing each.
    pub async fn health_check(config: &Config) -> HealthCheckResult {
        let start = Instant::now();
        let source_error = match SqliteSource::open(&config.source.path).await {
            Ok(source) => source.test_connection().await.err(),
            Err(e) => Some(e),
        };
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target_error = match MysqlTarget::connect(&config.target).await {
            Ok(target) => {
                let result = target.test_connection().await.err();
                if let Err(e) = target.close().await {
                    warn!("{}", e);
                }
                result
            }
            Err(e) => Some(e),
        };
        let target_latency_ms = start.elapsed().as_millis() as u64;

        HealthCheckResult {
            source_connected: source_error.is_none(),
            source_latency_ms,
            target_connected: target_error.is_none(),
            target_latency_ms,
            healthy: source_error.is_none() && target_error.is_none(),
            source_error: source_error.map(|e| e.to_string()),
            target_error: target_error.map(|e| e.to_string()),
        }
    }

    /// Source schema summary with record counts.
    pub async fn inspect(&self) -> Result<Vec<TableSummary>> {
        self.source.summarize().await
    }

    /// Compare row counts for every source table.
    pub async fn validate(&self) -> Result<Vec<(String, ValidationResult)>> {
        let validator = Validator::new(&self.source, &self.target);
        let mut results = Vec::new();
        for table in self.source.list_tables().await? {
            let result = validator.validate_counts(&table).await?;
            results.push((table, result));
        }
        Ok(results)
    }

    /// Run the migration.
    ///
    /// Failures after the run starts end in a report with status `failed`
    /// rather than an error; only a failure to save the report is returned.
    pub async fn run(self) -> Result<MigrationReport> {
        let run_id = self
            .run_handle
            .as_ref()
            .map(|h| h.run_id().to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut report = MigrationReport::new(&run_id);
        report.status = RunStatus::Migrating;
        if let Some(handle) = &self.run_handle {
            handle.set_status(RunStatus::Migrating);
        }
        self.log(&format!("Starting migration run: {}", run_id));

        let status = match self.execute(&mut report).await {
            Ok(()) if report.tables.iter().all(|t| t.status == TableStatus::Success) => {
                RunStatus::Completed
            }
            Ok(()) => RunStatus::Failed,
            Err(e) => {
                error!("Migration failed: {}", e);
                report.errors.push(e.to_string());
                RunStatus::Failed
            }
        };
        report.finish(status);

        let totals = report.totals();
        self.log(&format!(
            "Migration {}: {}/{} tables, {} rows in {:.1}s",
            report.status,
            totals.tables_succeeded,
            totals.tables_total,
            totals.rows_transferred,
            report.duration_seconds().unwrap_or_default()
        ));

        if let Some(handle) = &self.run_handle {
            handle.finish(&report);
        }
        if self.progress {
            let done = totals.tables_total;
            self.emit_progress(&run_id, "done", None, done, done);
        }
        if let Some(path) = &self.config.migration.report_path {
            report.save(path)?;
            info!("Report written to {}", path.display());
        }

        Ok(report)
    }

    async fn execute(&self, report: &mut MigrationReport) -> Result<()> {
        let opts = &self.config.migration;

        // Phase 1: introspect
        info!("Phase 1: Reading source schema");
        let mut tables = Vec::new();
        for name in self.source.list_tables().await? {
            tables.push(self.source.describe_table(&name).await?);
        }
        self.log(&format!("Found {} tables to migrate", tables.len()));
        self.emit_progress(&report.run_id, "introspect", None, 0, tables.len());

        // Phase 2: resolve duplicates in the source
        if opts.resolve_duplicates {
            self.log(&format!(
                "Phase 2: Resolving duplicates (strategy: {})",
                opts.duplicate_strategy
            ));
            let resolver = DuplicateResolver::new(&self.source);
            for table in &tables {
                let outcome = resolver.resolve_table(table, opts.duplicate_strategy).await?;
                for action in outcome.actions {
                    self.log(&action.to_string());
                    report.duplicate_resolutions.push(action.to_string());
                }
                for e in outcome.errors {
                    report.errors.push(e.to_string());
                }
            }
            self.emit_progress(&report.run_id, "resolve", None, 0, tables.len());
        }

        // Phase 3: schema and data per table
        info!("Phase 3: Migrating {} tables", tables.len());
        let engine = TransferEngine::new(opts.batch_size);
        let mut stopped = false;
        for (i, table) in tables.iter().enumerate() {
            match self.migrate_table(table, &engine, opts.include_data).await {
                Ok((rows, warnings)) => {
                    self.log(&format!("Migrated {} ({} rows)", table.name, rows));
                    report.table_succeeded(&table.name, rows);
                    report.warnings.extend(warnings);
                }
                Err(e) => {
                    error!("Table {} failed: {}", table.name, e);
                    self.log(&format!("Table {} failed: {}", table.name, e));
                    report.table_failed(&table.name, &e);
                    if !opts.continue_on_error {
                        stopped = true;
                    }
                }
            }

            let percent = percent_complete(i + 1, tables.len());
            if let Some(handle) = &self.run_handle {
                handle.set_progress(percent);
            }
            self.emit_progress(&report.run_id, "migrate", Some(&table.name), i + 1, tables.len());

            if stopped {
                warn!("Stopping after failed table {}", table.name);
                return Ok(());
            }
        }

        // Phase 4: validate
        info!("Phase 4: Validating");
        let validator = Validator::new(&self.source, &self.target);
        let migrated: Vec<String> = report
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Success)
            .map(|t| t.name.clone())
            .collect();
        for name in &migrated {
            let result = validator.validate_counts(name).await?;
            if let ValidationResult::CountMismatch {
                source_count,
                target_count,
            } = result
            {
                let finding = MigrateError::ValidationMismatch {
                    table: name.clone(),
                    source_count,
                    target_count,
                };
                self.log(&finding.to_string());
                report.warnings.push(finding.to_string());
            }
            report.set_validation(name, result);
        }
        report.validation_results = validator.run_sanity_checks().await;
        self.emit_progress(&report.run_id, "validate", None, tables.len(), tables.len());

        Ok(())
    }

    /// Create one table, load its rows and build its indexes.
    ///
    /// Returns rows transferred and any index fallback warnings.
    async fn migrate_table(
        &self,
        table: &TableDescriptor,
        engine: &TransferEngine,
        include_data: bool,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.target.get_conn().await?;

        // MySQL commits DDL implicitly, so the table exists before the data
        // transaction opens and indexes are built after it commits.
        SchemaSynthesizer::apply_table(&mut MysqlSink::new(&mut conn), table).await?;

        let mut rows = 0;
        if include_data {
            let mut tx = conn
                .start_transaction(TxOpts::default())
                .await
                .map_err(|e| MigrateError::transfer(&table.name, e))?;

            match engine.transfer(table, &self.source, &mut tx).await {
                Ok(stats) => {
                    tx.commit()
                        .await
                        .map_err(|e| MigrateError::transfer(&table.name, e))?;
                    rows = stats.rows;
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!("Rollback of {} failed: {}", table.name, rollback_err);
                    }
                    return Err(e);
                }
            }
        }

        let warnings = SchemaSynthesizer::apply_indexes(&mut MysqlSink::new(&mut conn), table).await?;
        Ok((rows, warnings))
    }

    fn log(&self, message: &str) {
        info!("{}", message);
        if let Some(handle) = &self.run_handle {
            handle.log(message);
        }
    }

    fn emit_progress(
        &self,
        run_id: &str,
        phase: &str,
        table: Option<&str>,
        tables_completed: usize,
        tables_total: usize,
    ) {
        if !self.progress {
            return;
        }
        let update = ProgressUpdate {
            run_id: run_id.to_string(),
            phase: phase.to_string(),
            table: table.map(str::to_string),
            tables_completed,
            tables_total,
            percent: percent_complete(tables_completed, tables_total),
        };
        match serde_json::to_string(&update) {
            Ok(line) => eprintln!("{}", line),
            Err(e) => warn!("Failed to serialize progress: {}", e),
        }
    }
}
