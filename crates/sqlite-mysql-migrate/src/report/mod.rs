//! Migration report.
//!
//! Created when a run starts, updated by every phase and returned as an
//! immutable snapshot when the run ends. Serializes to JSON for the report
//! file and renders as text for humans.

use std::fmt::{self, Write as _};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::verify::{SanityCheck, ValidationResult};

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Migrating,
    Completed,
    Failed,
}

impl RunStatus {
    /// Whether the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Migrating => "migrating",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-table outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    Failed,
}

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub name: String,
    pub status: TableStatus,
    pub rows_transferred: u64,
    /// Absent when validation did not run for this table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured result of a migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,

    /// Tables in processing order.
    pub tables: Vec<TableReport>,

    /// Human-readable resolution log.
    pub duplicate_resolutions: Vec<String>,

    /// Domain sanity checks against the target.
    pub validation_results: Vec<SanityCheck>,

    /// Recovered problems, such as index fallbacks.
    #[serde(default)]
    pub warnings: Vec<String>,

    pub errors: Vec<String>,
}

/// Totals derived from the table list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub tables_total: usize,
    pub tables_succeeded: usize,
    pub tables_failed: usize,
    pub count_mismatches: usize,
    pub rows_transferred: u64,
}

impl MigrationReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Pending,
            tables: Vec::new(),
            duplicate_resolutions: Vec::new(),
            validation_results: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record a table whose schema and data committed.
    pub fn table_succeeded(&mut self, name: &str, rows_transferred: u64) {
        self.tables.push(TableReport {
            name: name.to_string(),
            status: TableStatus::Success,
            rows_transferred,
            validation: None,
            error: None,
        });
    }

    /// Record a failed table and its error.
    pub fn table_failed(&mut self, name: &str, error: impl fmt::Display) {
        let message = error.to_string();
        self.errors.push(message.clone());
        self.tables.push(TableReport {
            name: name.to_string(),
            status: TableStatus::Failed,
            rows_transferred: 0,
            validation: None,
            error: Some(message),
        });
    }

    /// Attach a validation result to a recorded table.
    pub fn set_validation(&mut self, name: &str, result: ValidationResult) {
        if let Some(table) = self.tables.iter_mut().find(|t| t.name == name) {
            table.validation = Some(result);
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Set the terminal status and end time.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn totals(&self) -> ReportTotals {
        let succeeded = self
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Success)
            .count();
        ReportTotals {
            tables_total: self.tables.len(),
            tables_succeeded: succeeded,
            tables_failed: self.tables.len() - succeeded,
            count_mismatches: self
                .tables
                .iter()
                .filter(|t| t.validation.as_ref().is_some_and(|v| !v.is_ok()))
                .count(),
            rows_transferred: self.tables.iter().map(|t| t.rows_transferred).sum(),
        }
    }

    /// Pretty JSON including the derived totals.
    pub fn to_json(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.insert("totals".to_string(), serde_json::to_value(self.totals())?);
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Write the JSON report (atomic write via a temp file).
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Human-readable rendering.
    pub fn render_text(&self) -> String {
        let totals = self.totals();
        let mut out = String::new();

        let _ = writeln!(out, "Migration {} - {}", self.run_id, self.status);
        let _ = writeln!(out, "Started:  {}", self.started_at.to_rfc3339());
        if let Some(end) = self.completed_at {
            let _ = writeln!(out, "Finished: {}", end.to_rfc3339());
        }
        let _ = writeln!(
            out,
            "Tables: {} succeeded, {} failed, {} count mismatch(es); {} rows transferred",
            totals.tables_succeeded,
            totals.tables_failed,
            totals.count_mismatches,
            totals.rows_transferred
        );

        if !self.tables.is_empty() {
            out.push_str("\nTables:\n");
            for t in &self.tables {
                let status = match t.status {
                    TableStatus::Success => "migrated",
                    TableStatus::Failed => "FAILED",
                };
                let validation = match &t.validation {
                    Some(ValidationResult::Ok { .. }) => "validated".to_string(),
                    Some(ValidationResult::CountMismatch {
                        source_count,
                        target_count,
                    }) => format!(
                        "COUNT MISMATCH (source={}, target={})",
                        source_count, target_count
                    ),
                    None => "not validated".to_string(),
                };
                let _ = write!(
                    out,
                    "  {:<30} {:<9} {:>10} rows  {}",
                    t.name, status, t.rows_transferred, validation
                );
                if let Some(err) = &t.error {
                    let _ = write!(out, "  ({})", err);
                }
                out.push('\n');
            }
        }

        if !self.duplicate_resolutions.is_empty() {
            out.push_str("\nDuplicate resolutions:\n");
            for entry in &self.duplicate_resolutions {
                let _ = writeln!(out, "  - {}", entry);
            }
        }

        if !self.validation_results.is_empty() {
            out.push_str("\nSanity checks:\n");
            for check in &self.validation_results {
                let _ = writeln!(out, "  [{:?}] {}: {}", check.status, check.name, check.message);
            }
        }

        if !self.warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for w in &self.warnings {
                let _ = writeln!(out, "  - {}", w);
            }
        }

        if !self.errors.is_empty() {
            out.push_str("\nErrors:\n");
            for e in &self.errors {
                let _ = writeln!(out, "  - {}", e);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::CheckStatus;

    fn sample_report() -> MigrationReport {
        let mut report = MigrationReport::new("run-1");
        report.status = RunStatus::Migrating;
        report.table_succeeded("user", 2);
        report.table_succeeded("dashboard", 5);
        report.table_failed("alert", "Data transfer failed for table alert: boom");
        report.set_validation("user", ValidationResult::from_counts(2, 2));
        report.set_validation("dashboard", ValidationResult::from_counts(5, 6));
        report
            .duplicate_resolutions
            .push("Removed 1 duplicate(s) from user for (login) = (admin)".into());
        report.validation_results.push(SanityCheck {
            name: "Admin User Check".into(),
            status: CheckStatus::Pass,
            message: "Found 1 admins".into(),
        });
        report.finish(RunStatus::Failed);
        report
    }

    #[test]
    fn test_totals() {
        let totals = sample_report().totals();
        assert_eq!(totals.tables_total, 3);
        assert_eq!(totals.tables_succeeded, 2);
        assert_eq!(totals.tables_failed, 1);
        assert_eq!(totals.count_mismatches, 1);
        assert_eq!(totals.rows_transferred, 7);
    }

    #[test]
    fn test_table_failure_is_recorded_as_error() {
        let report = sample_report();
        assert_eq!(report.errors.len(), 1);
        let alert = report.table("alert").unwrap();
        assert_eq!(alert.status, TableStatus::Failed);
        assert!(alert.error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&sample_report().to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["tables"][0]["status"], "success");
        assert_eq!(json["tables"][1]["validation"]["result"], "count_mismatch");
        assert_eq!(json["validation_results"][0]["status"], "pass");
        assert_eq!(json["totals"]["tables_failed"], 1);
        assert!(json["completed_at"].is_string());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration_report.json");
        let report = sample_report();
        report.save(&path).unwrap();

        let loaded: MigrationReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn test_render_text_distinguishes_outcomes() {
        let text = sample_report().render_text();
        assert!(text.contains("Migration run-1 - failed"));
        assert!(text.contains("validated"));
        assert!(text.contains("COUNT MISMATCH (source=5, target=6)"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("Duplicate resolutions:"));
        assert!(text.contains("[Pass] Admin User Check: Found 1 admins"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunStatus::Migrating.to_string(), "migrating");
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }
}
