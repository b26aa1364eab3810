//! sqlite-mysql-migrate CLI - SQLite to MySQL migration.

use clap::{Parser, Subcommand};
use sqlite_mysql_migrate::{
    Config, DuplicateStrategy, MigrateError, Orchestrator, RunRegistry, RunStatus, ScriptSink,
    SqlExporter, SqliteSource, ValidationResult,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlite-mysql-migrate")]
#[command(about = "SQLite to MySQL migration with duplicate resolution")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new migration
    Run {
        /// Resolve duplicate rows in the source before migrating
        #[arg(long, conflicts_with = "no_resolve_duplicates")]
        resolve_duplicates: bool,

        /// Skip duplicate resolution
        #[arg(long)]
        no_resolve_duplicates: bool,

        /// Duplicate strategy: remove or rename
        #[arg(long)]
        strategy: Option<DuplicateStrategy>,

        /// Create tables and indexes without transferring rows
        #[arg(long)]
        schema_only: bool,

        /// Keep migrating remaining tables after a table fails
        #[arg(long)]
        continue_on_error: bool,

        /// Write the JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,

    /// Show source tables, columns and record counts
    Inspect,

    /// Show rows from a source table
    Preview {
        /// Table name
        table: String,

        /// Maximum rows to show
        #[arg(long, default_value = "10")]
        limit: u32,

        /// Rows to skip
        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Write the migration as a MySQL script instead of executing it
    ExportSql {
        /// Output path [default: migration_<timestamp>.sql]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit DDL only, without INSERT statements
        #[arg(long)]
        schema_only: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            resolve_duplicates,
            no_resolve_duplicates,
            strategy,
            schema_only,
            continue_on_error,
            report,
        } => {
            // Apply overrides
            if resolve_duplicates {
                config.migration.resolve_duplicates = true;
            }
            if no_resolve_duplicates {
                config.migration.resolve_duplicates = false;
            }
            if let Some(s) = strategy {
                config.migration.duplicate_strategy = s;
            }
            if schema_only {
                config.migration.include_data = false;
            }
            if continue_on_error {
                config.migration.continue_on_error = true;
            }
            if report.is_some() {
                config.migration.report_path = report;
            }

            let registry = RunRegistry::new();
            let handle = registry.create(&uuid::Uuid::new_v4().to_string())?;

            let orchestrator = Orchestrator::new(config)
                .await?
                .with_run_handle(handle)
                .with_progress(cli.progress);

            let report = orchestrator.run().await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\n{}", report.render_text());
            }

            if report.status == RunStatus::Failed {
                return Err(MigrateError::RunFailed {
                    run_id: report.run_id.clone(),
                    message: report
                        .errors
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "one or more tables failed".to_string()),
                });
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await?;

            if cli.output_json {
                let json: serde_json::Map<String, serde_json::Value> = results
                    .iter()
                    .map(|(t, r)| Ok((t.clone(), serde_json::to_value(r)?)))
                    .collect::<Result<_, serde_json::Error>>()?;
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                for (table, result) in &results {
                    println!("  {:<30} {}", table, result.label());
                }
            }

            for (table, result) in &results {
                if let ValidationResult::CountMismatch {
                    source_count,
                    target_count,
                } = result
                {
                    return Err(MigrateError::ValidationMismatch {
                        table: table.clone(),
                        source_count: *source_count,
                        target_count: *target_count,
                    });
                }
            }
            println!("Validation completed successfully");
        }

        Commands::HealthCheck => {
            let result = Orchestrator::health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (SQLite): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (MySQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.source_connected {
                return Err(MigrateError::source_unavailable(
                    result.source_error.unwrap_or_default(),
                    "health check",
                ));
            }
            if !result.target_connected {
                return Err(MigrateError::target_unavailable(
                    result.target_error.unwrap_or_default(),
                    "health check",
                ));
            }
        }

        Commands::Inspect => {
            let source = SqliteSource::open(&config.source.path).await?;
            let tables = source.summarize().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for table in &tables {
                    println!("{} ({} records)", table.name, table.record_count);
                    for col in &table.columns {
                        println!(
                            "  {:<30} {:<20} {}{}",
                            col.name,
                            col.declared_type,
                            if col.not_null { "NOT NULL" } else { "NULL" },
                            if col.is_primary_key() { " PK" } else { "" }
                        );
                    }
                }
            }
        }

        Commands::Preview {
            table,
            limit,
            offset,
        } => {
            let source = SqliteSource::open(&config.source.path).await?;
            let descriptor = source.describe_table(&table).await?;
            let rows = source.preview(&descriptor, limit, offset).await?;

            if cli.output_json {
                let rows: Vec<Vec<String>> = rows
                    .iter()
                    .map(|r| r.iter().map(|v| v.to_string()).collect())
                    .collect();
                let json = serde_json::json!({
                    "table": table,
                    "columns": descriptor.column_names(),
                    "rows": rows,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("{}", descriptor.column_names().join(" | "));
                for row in &rows {
                    let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    println!("{}", values.join(" | "));
                }
            }
        }

        Commands::ExportSql {
            output,
            schema_only,
        } => {
            let output = output.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "migration_{}.sql",
                    chrono::Local::now().format("%Y%m%d_%H%M%S")
                ))
            });

            let source = SqliteSource::open(&config.source.path).await?;
            let mut exporter = SqlExporter::new(&source);
            if schema_only || !config.migration.include_data {
                exporter = exporter.schema_only();
            }

            let mut sink = ScriptSink::new(BufWriter::new(File::create(&output)?));
            let summary = exporter.export(&mut sink).await?;
            sink.into_inner()?;

            println!(
                "Exported {} tables ({} rows) to {}",
                summary.tables,
                summary.rows,
                output.display()
            );
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    // RUST_LOG takes precedence over --verbosity
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
