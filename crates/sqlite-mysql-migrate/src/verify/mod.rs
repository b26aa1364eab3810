//! Post-migration validation.
//!
//! Row counts are compared per table; a mismatch is a finding recorded in the
//! report, not an error. Domain sanity checks run against the target only and
//! a check whose query fails is left out of the results.

use mysql_async::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::source::SqliteSource;
use crate::target::MysqlTarget;

/// Outcome of comparing a table's row counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ValidationResult {
    Ok {
        count: i64,
    },
    CountMismatch {
        source_count: i64,
        target_count: i64,
    },
}

impl ValidationResult {
    pub fn from_counts(source_count: i64, target_count: i64) -> Self {
        if source_count == target_count {
            ValidationResult::Ok {
                count: source_count,
            }
        } else {
            ValidationResult::CountMismatch {
                source_count,
                target_count,
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ValidationResult::Ok { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ValidationResult::Ok { .. } => "ok",
            ValidationResult::CountMismatch { .. } => "count_mismatch",
        }
    }
}

/// Sanity check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
}

/// Result of one sanity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanityCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

/// A count query that should return at least one row.
struct CheckDefinition {
    name: &'static str,
    sql: &'static str,
    subject: &'static str,
}

/// Grafana checks: an admin account and at least one dashboard survived.
const SANITY_CHECKS: &[CheckDefinition] = &[
    CheckDefinition {
        name: "Admin User Check",
        sql: "SELECT COUNT(*) FROM `user` WHERE is_admin = 1",
        subject: "admins",
    },
    CheckDefinition {
        name: "Dashboard Check",
        sql: "SELECT COUNT(*) FROM `dashboard`",
        subject: "dashboards",
    },
];

impl CheckDefinition {
    fn evaluate(&self, count: i64) -> SanityCheck {
        SanityCheck {
            name: self.name.to_string(),
            status: if count > 0 {
                CheckStatus::Pass
            } else {
                CheckStatus::Warn
            },
            message: format!("Found {} {}", count, self.subject),
        }
    }
}

/// Compares source and target after transfer.
pub struct Validator<'a> {
    source: &'a SqliteSource,
    target: &'a MysqlTarget,
}

impl<'a> Validator<'a> {
    pub fn new(source: &'a SqliteSource, target: &'a MysqlTarget) -> Self {
        Self { source, target }
    }

    /// Compare `COUNT(*)` on both sides. Connection failures are errors.
    pub async fn validate_counts(&self, table: &str) -> Result<ValidationResult> {
        let source_count = self.source.row_count(table).await?;
        let target_count = self.target.row_count(table).await?;

        let result = ValidationResult::from_counts(source_count, target_count);
        if result.is_ok() {
            debug!("{}: {} rows on both sides", table, source_count);
        } else {
            warn!(
                "Row count mismatch for {}: source={} target={}",
                table, source_count, target_count
            );
        }
        Ok(result)
    }

    /// Run the domain sanity checks, omitting any that cannot be evaluated.
    pub async fn run_sanity_checks(&self) -> Vec<SanityCheck> {
        let mut conn = match self.target.get_conn().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Skipping sanity checks: {}", e);
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(SANITY_CHECKS.len());
        for check in SANITY_CHECKS {
            match conn.query_first::<i64, _>(check.sql).await {
                Ok(count) => {
                    let result = check.evaluate(count.unwrap_or(0));
                    info!("{}: {:?} ({})", result.name, result.status, result.message);
                    results.push(result);
                }
                Err(e) => debug!("{} skipped: {}", check.name, e),
            }
        }
        results
    }
}
