//! Duplicate detection and resolution against the SQLite source.
//!
//! SQLite never enforced some of the uniqueness the MySQL schema will, so
//! violating rows are resolved in the source before any target work starts.
//! Each table is resolved in one source transaction. A failure in one
//! constraint group is recorded and the next group is still processed.

use std::collections::HashSet;
use std::fmt;

use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::config::DuplicateStrategy;
use crate::core::schema::TableDescriptor;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::source::{decode_value, execute_on, fetch_all_on, quote_ident, RowKey, SqliteSource};

/// Column groups that Grafana treats as unique, whether or not an index
/// backs them in the SQLite file.
pub const KNOWN_UNIQUE_GROUPS: &[(&str, &[&[&str]])] = &[
    ("user", &[&["login"], &["email"]]),
    ("dashboard", &[&["uid"], &["slug", "org_id"]]),
    ("org", &[&["name"]]),
    ("data_source", &[&["uid", "org_id"], &["name", "org_id"]]),
    ("team", &[&["name", "org_id"]]),
    ("folder", &[&["uid"], &["title", "org_id"]]),
];

/// Columns whose combined values must be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintGroup {
    /// Backing index name, or a synthetic name for supplementary groups.
    pub name: String,
    pub columns: Vec<String>,
}

/// Rows sharing one violating value combination.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub table: String,
    pub columns: Vec<String>,
    /// The tied values, one per column.
    pub values: Vec<SqlValue>,
    /// Ordering keys of every row in the group, ascending.
    pub row_keys: Vec<SqlValue>,
    /// Lowest ordering key; this row is never modified.
    pub keeper: SqlValue,
}

impl DuplicateGroup {
    /// Rows other than the keeper, in ascending key order.
    pub fn losers(&self) -> impl Iterator<Item = &SqlValue> {
        self.row_keys.iter().filter(move |k| **k != self.keeper)
    }
}

/// One resolution applied to the source.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionAction {
    Removed {
        table: String,
        columns: Vec<String>,
        values: Vec<SqlValue>,
        count: u64,
    },
    Renamed {
        table: String,
        column: String,
        from: String,
        to: String,
    },
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionAction::Removed {
                table,
                columns,
                values,
                count,
            } => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(
                    f,
                    "Removed {} duplicate(s) from {} for ({}) = ({})",
                    count,
                    table,
                    columns.join(", "),
                    values.join(", ")
                )
            }
            ResolutionAction::Renamed {
                table,
                column,
                from,
                to,
            } => write!(f, "Renamed duplicate in {}.{}: {} -> {}", table, column, from, to),
        }
    }
}

/// What resolving one table produced.
#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    pub actions: Vec<ResolutionAction>,
    /// Per-group failures; never fatal.
    pub errors: Vec<MigrateError>,
}

impl ResolutionOutcome {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.errors.is_empty()
    }
}

/// Resolves uniqueness violations in a SQLite source.
pub struct DuplicateResolver<'a> {
    source: &'a SqliteSource,
}

impl<'a> DuplicateResolver<'a> {
    pub fn new(source: &'a SqliteSource) -> Self {
        Self { source }
    }

    /// Constraint groups checked for a table: every unique index, plus each
    /// known group whose columns all exist and no unique index already covers.
    pub fn constraint_groups(table: &TableDescriptor) -> Vec<ConstraintGroup> {
        let mut groups: Vec<ConstraintGroup> = table
            .unique_indexes()
            .map(|idx| ConstraintGroup {
                name: idx.name.clone(),
                columns: idx.columns.clone(),
            })
            .collect();

        let known = KNOWN_UNIQUE_GROUPS
            .iter()
            .find(|(name, _)| *name == table.name)
            .map(|(_, groups)| *groups)
            .unwrap_or(&[]);

        for columns in known {
            if !table.has_columns(columns) {
                continue;
            }
            let wanted: HashSet<&str> = columns.iter().copied().collect();
            let covered = groups.iter().any(|g| {
                g.columns.iter().map(String::as_str).collect::<HashSet<_>>() == wanted
            });
            if !covered {
                groups.push(ConstraintGroup {
                    name: format!("known_{}", columns.join("_")),
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                });
            }
        }

        groups
    }

    /// Find every violating value combination for one group.
    pub async fn find_duplicates(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        columns: &[String],
        key: &RowKey,
    ) -> Result<Vec<DuplicateGroup>> {
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let cols = cols.join(", ");
        let sql = format!(
            "SELECT {cols} FROM {} GROUP BY {cols} HAVING COUNT(*) > 1",
            quote_ident(table),
        );

        let rows = fetch_all_on(conn, &sql, &[])
            .await
            .map_err(|e| MigrateError::resolution(table, columns, e))?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let values = (0..columns.len())
                .map(|i| decode_value(&row, i))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| MigrateError::resolution(table, columns, e))?;

            let (predicate, params) = match_predicate(columns, &values);
            let key_sql = format!(
                "SELECT {key} FROM {} WHERE {predicate} ORDER BY {key}",
                quote_ident(table),
                key = key.expr(),
            );
            let key_rows = fetch_all_on(conn, &key_sql, &params)
                .await
                .map_err(|e| MigrateError::resolution(table, columns, e))?;
            let row_keys = key_rows
                .iter()
                .map(|r| decode_value(r, 0))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| MigrateError::resolution(table, columns, e))?;

            // Rows may have changed under an earlier group in this table
            let Some(keeper) = row_keys.first().cloned() else {
                continue;
            };
            if row_keys.len() < 2 {
                continue;
            }

            groups.push(DuplicateGroup {
                table: table.to_string(),
                columns: columns.to_vec(),
                values,
                row_keys,
                keeper,
            });
        }

        Ok(groups)
    }

    /// Resolve every constraint group of a table with the given strategy,
    /// committing all successful mutations at the end.
    pub async fn resolve_table(
        &self,
        table: &TableDescriptor,
        strategy: DuplicateStrategy,
    ) -> Result<ResolutionOutcome> {
        let mut outcome = ResolutionOutcome::default();

        let groups = Self::constraint_groups(table);
        if groups.is_empty() {
            return Ok(outcome);
        }

        let key = match self.source.row_key(table).await {
            Ok(key) => key,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{}", e);
                outcome.errors.push(e);
                return Ok(outcome);
            }
        };

        let mut tx = self
            .source
            .pool()
            .begin()
            .await
            .map_err(|e| MigrateError::source_unavailable(e, "starting resolution transaction"))?;

        for group in &groups {
            debug!("Checking {} ({}) on {}", group.name, group.columns.join(", "), table.name);
            if let Err(e) = self
                .resolve_group(&mut tx, &table.name, &group.columns, &key, strategy, &mut outcome)
                .await
            {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("{}", e);
                outcome.errors.push(e);
            }
        }

        tx.commit()
            .await
            .map_err(|e| MigrateError::source_unavailable(e, "committing resolution transaction"))?;

        if !outcome.actions.is_empty() {
            info!(
                "{}: applied {} duplicate resolution(s)",
                table.name,
                outcome.actions.len()
            );
        }

        Ok(outcome)
    }

    async fn resolve_group(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        columns: &[String],
        key: &RowKey,
        strategy: DuplicateStrategy,
        outcome: &mut ResolutionOutcome,
    ) -> Result<()> {
        let duplicates = self.find_duplicates(conn, table, columns, key).await?;
        if duplicates.is_empty() {
            return Ok(());
        }

        warn!(
            "Found {} duplicate value combination(s) in {} for ({})",
            duplicates.len(),
            table,
            columns.join(", ")
        );

        // Applied changes stay in the log even when a later combination fails
        for dup in &duplicates {
            let result = match strategy {
                DuplicateStrategy::Remove => remove_losers(conn, dup, key)
                    .await
                    .map(|action| outcome.actions.push(action)),
                DuplicateStrategy::Rename => {
                    rename_losers(conn, dup, key, &mut outcome.actions).await
                }
            };
            if let Err(e) = result {
                warn!("{}", e);
                outcome.errors.push(e);
            }
        }
        Ok(())
    }
}

/// Row-selection predicate for a value combination: `IS NULL` for NULL
/// values, `= ?` otherwise. Returns the predicate and its bound parameters.
pub fn match_predicate(columns: &[String], values: &[SqlValue]) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::with_capacity(columns.len());
    let mut params = Vec::new();
    for (column, value) in columns.iter().zip(values) {
        if value.is_null() {
            clauses.push(format!("{} IS NULL", quote_ident(column)));
        } else {
            clauses.push(format!("{} = ?", quote_ident(column)));
            params.push(value.clone());
        }
    }
    (clauses.join(" AND "), params)
}

async fn remove_losers(
    conn: &mut SqliteConnection,
    dup: &DuplicateGroup,
    key: &RowKey,
) -> Result<ResolutionAction> {
    let (predicate, mut params) = match_predicate(&dup.columns, &dup.values);
    let sql = format!(
        "DELETE FROM {} WHERE {predicate} AND {} != ?",
        quote_ident(&dup.table),
        key.expr(),
    );
    params.push(dup.keeper.clone());

    let count = execute_on(conn, &sql, &params)
        .await
        .map_err(|e| MigrateError::resolution(&dup.table, &dup.columns, e))?;

    let action = ResolutionAction::Removed {
        table: dup.table.clone(),
        columns: dup.columns.clone(),
        values: dup.values.clone(),
        count,
    };
    info!("{}", action);
    Ok(action)
}

async fn rename_losers(
    conn: &mut SqliteConnection,
    dup: &DuplicateGroup,
    key: &RowKey,
    actions: &mut Vec<ResolutionAction>,
) -> Result<()> {
    let table = quote_ident(&dup.table);
    let column = &dup.columns[0];
    let select_sql = format!(
        "SELECT {} FROM {table} WHERE {} = ?",
        quote_ident(column),
        key.expr()
    );
    let update_sql = format!(
        "UPDATE {table} SET {} = ? WHERE {} = ?",
        quote_ident(column),
        key.expr()
    );

    let mut suffix = 0u64;
    for row_key in dup.losers() {
        let rows = fetch_all_on(conn, &select_sql, std::slice::from_ref(row_key))
            .await
            .map_err(|e| MigrateError::resolution(&dup.table, &dup.columns, e))?;
        let original = match rows.first().map(|r| decode_value(r, 0)).transpose() {
            Ok(Some(SqlValue::Null)) | Ok(None) => {
                return Err(MigrateError::resolution(
                    &dup.table,
                    &dup.columns,
                    format!("cannot rename NULL value in column {}", column),
                ))
            }
            Ok(Some(SqlValue::Blob(_))) => {
                return Err(MigrateError::resolution(
                    &dup.table,
                    &dup.columns,
                    format!("cannot rename BLOB value in column {}", column),
                ))
            }
            Ok(Some(v)) => v.to_string(),
            Err(e) => return Err(MigrateError::resolution(&dup.table, &dup.columns, e)),
        };

        // Advance past candidates another row already holds
        let renamed = loop {
            suffix += 1;
            let candidate = format!("{}_dup_{}", original, suffix);
            if !value_taken(conn, dup, &candidate).await? {
                break candidate;
            }
            debug!("{} already present in {}, trying next suffix", candidate, dup.table);
        };

        execute_on(
            conn,
            &update_sql,
            &[SqlValue::Text(renamed.clone()), row_key.clone()],
        )
        .await
        .map_err(|e| MigrateError::resolution(&dup.table, &dup.columns, e))?;

        let action = ResolutionAction::Renamed {
            table: dup.table.clone(),
            column: column.clone(),
            from: original,
            to: renamed,
        };
        info!("{}", action);
        actions.push(action);
    }

    Ok(())
}

/// Whether any row already holds the group's combination with the first
/// column replaced by `candidate`.
async fn value_taken(
    conn: &mut SqliteConnection,
    dup: &DuplicateGroup,
    candidate: &str,
) -> Result<bool> {
    let mut values = dup.values.clone();
    values[0] = SqlValue::Text(candidate.to_string());
    let (predicate, params) = match_predicate(&dup.columns, &values);
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {predicate}", quote_ident(&dup.table));

    let rows = fetch_all_on(conn, &sql, &params)
        .await
        .map_err(|e| MigrateError::resolution(&dup.table, &dup.columns, e))?;
    let count: i64 = match rows.first() {
        Some(row) => row
            .try_get(0)
            .map_err(|e| MigrateError::resolution(&dup.table, &dup.columns, e))?,
        None => 0,
    };
    Ok(count > 0)
}
