//! MySQL DDL synthesis from SQLite table descriptors.
//!
//! Statements are built as plain strings and applied through a
//! [`StatementSink`], so a live migration and a script export emit the same
//! DDL.

use tracing::{debug, info, warn};

use crate::core::schema::{ColumnDescriptor, TableDescriptor};
use crate::core::traits::StatementSink;
use crate::error::{MigrateError, Result};
use crate::typemap::{is_integer_type, is_lob_type, is_timestamp_type, map_type};

use super::quote_ident;

/// Table options appended to every CREATE TABLE.
pub const TABLE_OPTIONS: &str = "ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

/// Prefix length for indexing LONGTEXT/LONGBLOB columns.
const LOB_INDEX_PREFIX: u32 = 255;

/// Suffix of the non-unique index created when a unique one is rejected.
const NON_UNIQUE_SUFFIX: &str = "_non_unique";

/// MySQL's limit on identifier length, in characters.
const MAX_IDENTIFIER_LEN: usize = 64;

/// An index statement with its non-unique fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatement {
    pub name: String,
    pub sql: String,
    /// Present for unique indexes only.
    pub fallback: Option<String>,
}

/// Builds and applies MySQL DDL for a table.
pub struct SchemaSynthesizer;

impl SchemaSynthesizer {
    pub fn build_drop_table(table: &TableDescriptor) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&table.name))
    }

    /// Build the CREATE TABLE statement.
    pub fn build_create_table(table: &TableDescriptor) -> String {
        let pk = table.primary_key();
        let single_pk = pk.len() == 1;

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| Self::column_definition(c, single_pk))
            .collect();

        if !pk.is_empty() {
            let cols: Vec<String> = pk
                .iter()
                .map(|name| Self::key_part(table, name))
                .collect();
            defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        format!(
            "CREATE TABLE {} (\n  {}\n) {}",
            quote_ident(&table.name),
            defs.join(",\n  "),
            TABLE_OPTIONS
        )
    }

    /// One column definition: name, type, nullability, default, auto-increment.
    pub fn column_definition(column: &ColumnDescriptor, single_pk: bool) -> String {
        let mysql_type = map_type(&column.declared_type);

        // MySQL requires key columns to be NOT NULL
        let not_null = column.not_null || column.is_primary_key();
        let mut def = format!(
            "{} {} {}",
            quote_ident(&column.name),
            mysql_type,
            if not_null { "NOT NULL" } else { "NULL" }
        );

        if let Some(default) = column
            .default_value
            .as_deref()
            .and_then(|d| translate_default(d, &mysql_type))
        {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }

        if single_pk && column.is_primary_key() && is_integer_type(&mysql_type) {
            def.push_str(" AUTO_INCREMENT");
        }

        def
    }

    /// Index statements, skipping the index that backs the primary key.
    pub fn build_indexes(table: &TableDescriptor) -> Vec<IndexStatement> {
        let pk = table.primary_key();

        table
            .indexes
            .iter()
            .filter(|idx| !(idx.is_unique && idx.columns.len() == 1 && idx.columns == pk))
            .map(|idx| {
                let cols: Vec<String> = idx
                    .columns
                    .iter()
                    .map(|c| Self::key_part(table, c))
                    .collect();
                let cols = cols.join(", ");
                let on = quote_ident(&table.name);

                if idx.is_unique {
                    IndexStatement {
                        name: idx.name.clone(),
                        sql: format!(
                            "CREATE UNIQUE INDEX {} ON {} ({})",
                            quote_ident(&idx.name),
                            on,
                            cols
                        ),
                        fallback: Some(format!(
                            "CREATE INDEX {} ON {} ({})",
                            quote_ident(&fallback_index_name(&idx.name)),
                            on,
                            cols
                        )),
                    }
                } else {
                    IndexStatement {
                        name: idx.name.clone(),
                        sql: format!("CREATE INDEX {} ON {} ({})", quote_ident(&idx.name), on, cols),
                        fallback: None,
                    }
                }
            })
            .collect()
    }

    /// Quoted key column, with a prefix length when the column is a LOB.
    fn key_part(table: &TableDescriptor, column: &str) -> String {
        let quoted = quote_ident(column);
        match table.column(column) {
            Some(c) if is_lob_type(&map_type(&c.declared_type)) => {
                format!("{}({})", quoted, LOB_INDEX_PREFIX)
            }
            _ => quoted,
        }
    }

    /// Drop and recreate the table.
    pub async fn apply_table(sink: &mut dyn StatementSink, table: &TableDescriptor) -> Result<()> {
        for sql in [Self::build_drop_table(table), Self::build_create_table(table)] {
            sink.execute(&sql)
                .await
                .map_err(|e| for_table(&table.name, e))?;
        }
        debug!("Created table {} via {}", table.name, sink.sink_type());
        Ok(())
    }

    /// Create the table's indexes.
    ///
    /// A rejected unique index is retried as non-unique under a suffixed name;
    /// each such fallback is returned as a warning message. A rejected
    /// fallback or non-unique index is fatal.
    pub async fn apply_indexes(
        sink: &mut dyn StatementSink,
        table: &TableDescriptor,
    ) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        for stmt in Self::build_indexes(table) {
            let err = match sink.execute(&stmt.sql).await {
                Ok(()) => continue,
                Err(e) => e,
            };

            let Some(fallback) = &stmt.fallback else {
                return Err(for_table(&table.name, err));
            };

            let fallback_name = fallback_index_name(&stmt.name);
            warn!(
                "Unique index {} on {} rejected ({}), creating {} instead",
                stmt.name, table.name, err, fallback_name
            );
            sink.execute(fallback)
                .await
                .map_err(|e| for_table(&table.name, e))?;

            warnings.push(format!(
                "Index {} on {} created as non-unique {}: {}",
                stmt.name, table.name, fallback_name, err
            ));
        }

        info!("Created indexes for {}", table.name);
        Ok(warnings)
    }
}

/// Name of the non-unique index replacing a rejected unique one, truncated so
/// the suffixed name stays within MySQL's identifier limit.
pub fn fallback_index_name(name: &str) -> String {
    let keep = MAX_IDENTIFIER_LEN - NON_UNIQUE_SUFFIX.len();
    let base: String = name.chars().take(keep).collect();
    format!("{}{}", base, NON_UNIQUE_SUFFIX)
}

/// Translate a SQLite default to a MySQL default clause value.
///
/// Recognized: `CURRENT_TIMESTAMP` (datetime columns only), quoted strings and
/// integer literals. Anything else, and any default on a LOB column, is
/// dropped.
pub fn translate_default(raw: &str, mysql_type: &str) -> Option<String> {
    if is_lob_type(mysql_type) {
        return None;
    }

    let mut value = raw.trim();
    if value.len() >= 2 && value.starts_with('(') && value.ends_with(')') {
        value = value[1..value.len() - 1].trim();
    }

    if value.eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
        return is_timestamp_type(mysql_type).then(|| "CURRENT_TIMESTAMP".to_string());
    }

    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return Some(value.replace('\\', "\\\\"));
    }

    let digits = value.strip_prefix('-').unwrap_or(value);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return Some(value.to_string());
    }

    None
}

/// Attach the table name to a statement error.
fn for_table(table: &str, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::SchemaSynthesis { message, .. } => MigrateError::schema(table, message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::fixtures::{column, index, user_table};
    use async_trait::async_trait;

    /// Records statements and rejects those containing `reject`.
    struct FakeSink {
        executed: Vec<String>,
        reject: Vec<&'static str>,
    }

    #[async_trait]
    impl StatementSink for FakeSink {
        async fn execute(&mut self, statement: &str) -> Result<()> {
            if self.reject.iter().any(|r| statement.contains(r)) {
                return Err(MigrateError::schema("", "Duplicate entry 'admin'"));
            }
            self.executed.push(statement.to_string());
            Ok(())
        }

        fn sink_type(&self) -> &str {
            "fake"
        }
    }

    fn composite_table() -> TableDescriptor {
        TableDescriptor {
            name: "team_member".into(),
            columns: vec![
                column("team_id", "INTEGER", true, 1),
                column("user_id", "INTEGER", true, 2),
                column("permission", "SMALLINT", false, 0),
            ],
            indexes: vec![],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn test_single_integer_pk_is_auto_increment() {
        let ddl = SchemaSynthesizer::build_create_table(&user_table());
        assert!(ddl.contains("`id` INT NOT NULL AUTO_INCREMENT"), "{}", ddl);
        assert!(ddl.contains("`login` LONGTEXT NOT NULL"));
        assert!(ddl.contains("`email` LONGTEXT NULL"));
        assert!(ddl.contains("`is_admin` BOOLEAN NULL"));
        assert!(ddl.contains("PRIMARY KEY (`id`)"));
        assert!(ddl.ends_with(") ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"));
    }

    #[test]
    fn test_composite_pk_has_no_auto_increment() {
        let ddl = SchemaSynthesizer::build_create_table(&composite_table());
        assert!(!ddl.contains("AUTO_INCREMENT"), "{}", ddl);
        assert!(ddl.contains("PRIMARY KEY (`team_id`, `user_id`)"));
    }

    #[test]
    fn test_text_pk_gets_prefix_and_no_auto_increment() {
        let table = TableDescriptor {
            name: "kv_store".into(),
            columns: vec![column("key", "TEXT", false, 1), column("value", "TEXT", false, 0)],
            indexes: vec![],
            foreign_keys: vec![],
        };
        let ddl = SchemaSynthesizer::build_create_table(&table);
        assert!(ddl.contains("`key` LONGTEXT NOT NULL,"));
        assert!(ddl.contains("PRIMARY KEY (`key`(255))"));
        assert!(!ddl.contains("AUTO_INCREMENT"));
    }

    #[test]
    fn test_translate_default() {
        assert_eq!(
            translate_default("CURRENT_TIMESTAMP", "DATETIME").as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
        assert_eq!(translate_default("current_timestamp", "DATE"), None);
        assert_eq!(translate_default("'active'", "VARCHAR(20)").as_deref(), Some("'active'"));
        assert_eq!(translate_default("0", "BOOLEAN").as_deref(), Some("0"));
        assert_eq!(translate_default("(-1)", "INT").as_deref(), Some("-1"));
        assert_eq!(translate_default("'x'", "LONGTEXT"), None);
        assert_eq!(translate_default("datetime('now')", "DATETIME"), None);
        assert_eq!(translate_default("1.5", "DOUBLE"), None);
    }

    #[test]
    fn test_default_in_column_definition() {
        let mut col = column("created", "DATETIME", true, 0);
        col.default_value = Some("CURRENT_TIMESTAMP".into());
        assert_eq!(
            SchemaSynthesizer::column_definition(&col, true),
            "`created` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_build_indexes_skips_pk_index() {
        let mut table = user_table();
        table.indexes.push(index("sqlite_autoindex_user_1", true, &["id"]));
        table.indexes.push(index("idx_user_email", false, &["email"]));

        let stmts = SchemaSynthesizer::build_indexes(&table);
        let names: Vec<_> = stmts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["idx_user_login", "idx_user_email"]);

        assert_eq!(
            stmts[0].sql,
            "CREATE UNIQUE INDEX `idx_user_login` ON `user` (`login`(255))"
        );
        assert_eq!(
            stmts[0].fallback.as_deref(),
            Some("CREATE INDEX `idx_user_login_non_unique` ON `user` (`login`(255))")
        );
        assert!(stmts[1].fallback.is_none());
    }

    #[test]
    fn test_fallback_index_name_fits_identifier_limit() {
        assert_eq!(fallback_index_name("idx_user_login"), "idx_user_login_non_unique");

        let long = format!("UQE_{}", "dashboard_version_".repeat(4));
        let name = fallback_index_name(&long);
        assert_eq!(name.chars().count(), 64);
        assert!(name.ends_with("_non_unique"));
        assert!(name.starts_with("UQE_dashboard_version_"));

        // Counts characters, not bytes
        let wide = "é".repeat(60);
        assert_eq!(fallback_index_name(&wide).chars().count(), 64);
    }

    #[test]
    fn test_long_unique_index_fallback_is_truncated() {
        let mut table = user_table();
        let long = "uq_".to_string() + &"x".repeat(61);
        table.indexes = vec![index(&long, true, &["login"])];

        let stmts = SchemaSynthesizer::build_indexes(&table);
        let fallback = stmts[0].fallback.as_deref().unwrap();
        let expected = format!("`{}_non_unique`", &long[..53]);
        assert!(fallback.contains(&expected), "{}", fallback);
    }

    #[tokio::test]
    async fn test_apply_table_drops_first() {
        let mut sink = FakeSink {
            executed: vec![],
            reject: vec![],
        };
        SchemaSynthesizer::apply_table(&mut sink, &user_table())
            .await
            .unwrap();
        assert_eq!(sink.executed.len(), 2);
        assert_eq!(sink.executed[0], "DROP TABLE IF EXISTS `user`");
        assert!(sink.executed[1].starts_with("CREATE TABLE `user`"));
    }

    #[tokio::test]
    async fn test_unique_index_falls_back_to_non_unique() {
        let mut sink = FakeSink {
            executed: vec![],
            reject: vec!["CREATE UNIQUE INDEX"],
        };
        let warnings = SchemaSynthesizer::apply_indexes(&mut sink, &user_table())
            .await
            .unwrap();

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("idx_user_login_non_unique"));
        assert_eq!(
            sink.executed,
            vec!["CREATE INDEX `idx_user_login_non_unique` ON `user` (`login`(255))"]
        );
    }

    #[tokio::test]
    async fn test_rejected_fallback_is_fatal() {
        let mut sink = FakeSink {
            executed: vec![],
            reject: vec!["INDEX"],
        };
        let err = SchemaSynthesizer::apply_indexes(&mut sink, &user_table())
            .await
            .unwrap_err();
        match err {
            MigrateError::SchemaSynthesis { table, .. } => assert_eq!(table, "user"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
