//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database could not be opened or queried
    #[error("Source database unavailable: {message}\n  Context: {context}")]
    SourceUnavailable { message: String, context: String },

    /// Target database could not be opened or authenticated
    #[error("Target database unavailable: {message}\n  Context: {context}")]
    TargetUnavailable { message: String, context: String },

    /// Source catalog is inconsistent (e.g. table vanished after listing)
    #[error("Introspection failed for table {table}: {message}")]
    Introspection { table: String, message: String },

    /// A single constraint group could not be resolved (non-fatal)
    #[error("Duplicate resolution failed for {table} {columns:?}: {message}")]
    DuplicateResolution {
        table: String,
        columns: Vec<String>,
        message: String,
    },

    /// DDL rejected by the target
    #[error("Schema synthesis failed for table {table}: {message}")]
    SchemaSynthesis { table: String, message: String },

    /// Insert batch rejected by the target
    #[error("Data transfer failed for table {table}: {message}")]
    DataTransfer { table: String, message: String },

    /// Row counts differ between source and target (non-fatal)
    #[error("Row count mismatch for table {table}: source={source_count} target={target_count}")]
    ValidationMismatch {
        table: String,
        source_count: i64,
        target_count: i64,
    },

    /// The run finished with status `failed`
    #[error("Migration run {run_id} failed: {message}")]
    RunFailed { run_id: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a SourceUnavailable error with context about where it occurred
    pub fn source_unavailable(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::SourceUnavailable {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a TargetUnavailable error with context about where it occurred
    pub fn target_unavailable(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::TargetUnavailable {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an Introspection error
    pub fn introspection(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Introspection {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a DuplicateResolution error
    pub fn resolution(table: impl Into<String>, columns: &[String], message: impl ToString) -> Self {
        MigrateError::DuplicateResolution {
            table: table.into(),
            columns: columns.to_vec(),
            message: message.to_string(),
        }
    }

    /// Create a SchemaSynthesis error
    pub fn schema(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SchemaSynthesis {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a DataTransfer error
    pub fn transfer(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::DataTransfer {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error aborts the phase it occurred in.
    ///
    /// Resolution and validation findings are recorded and the run continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MigrateError::DuplicateResolution { .. } | MigrateError::ValidationMismatch { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::SourceUnavailable { .. } => 2,
            MigrateError::TargetUnavailable { .. } => 3,
            MigrateError::Introspection { .. } => 4,
            MigrateError::DuplicateResolution { .. }
            | MigrateError::SchemaSynthesis { .. }
            | MigrateError::DataTransfer { .. }
            | MigrateError::RunFailed { .. } => 5,
            MigrateError::ValidationMismatch { .. } => 6,
            MigrateError::Io(_) | MigrateError::Json(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
