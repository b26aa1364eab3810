//! SQLite source: catalog introspection and row reading.
//!
//! All operations are read-only except those used by duplicate resolution,
//! which receive an explicit connection so the caller owns the transaction.

use std::path::Path;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::core::schema::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor,
};
use crate::core::value::{Row as ValueRow, SqlValue};
use crate::error::{MigrateError, Result};

/// Prefix of SQLite's internal tables, never migrated.
const SYSTEM_TABLE_PREFIX: &str = "sqlite_";

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Quote a SQLite identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Ordering key used to pick keeper rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKey {
    /// The implicit insertion-order `rowid`.
    RowId,
    /// Single-column primary key of a `WITHOUT ROWID` table.
    Column(String),
}

impl RowKey {
    /// SQL expression selecting the key.
    pub fn expr(&self) -> String {
        match self {
            RowKey::RowId => "rowid".to_string(),
            RowKey::Column(name) => quote_ident(name),
        }
    }
}

/// Summary of a table for previews (`inspect`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub record_count: i64,
}

/// SQLite source database.
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Open an existing SQLite database file.
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MigrateError::source_unavailable(
                format!("file not found: {}", path.display()),
                "opening SQLite source",
            ));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);

        // One connection: a run is sequential and resolution writes must not
        // race with reads on a second connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::source_unavailable(e, "opening SQLite source"))?;

        let source = Self::from_pool(pool);
        source.test_connection().await?;

        info!("Opened SQLite source: {}", path.display());
        Ok(source)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Test the database connection.
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT name FROM sqlite_master LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MigrateError::source_unavailable(e, "testing SQLite connection"))?;
        Ok(())
    }

    /// List user tables in catalog order, excluding SQLite's own tables.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE ? ORDER BY rowid",
        )
        .bind(format!("{}%", SYSTEM_TABLE_PREFIX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::source_unavailable(e, "listing tables"))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map_err(|e| MigrateError::source_unavailable(e, "listing tables"))
            })
            .collect()
    }

    /// Check whether a table exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MigrateError::source_unavailable(e, "checking table existence"))?;
        Ok(row.is_some())
    }

    async fn ensure_table_exists(&self, table: &str) -> Result<()> {
        if self.table_exists(table).await? {
            Ok(())
        } else {
            Err(MigrateError::introspection(table, "table not found in catalog"))
        }
    }

    /// Describe a table's columns in declaration order.
    pub async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows: Vec<SqliteRow> = sqlx::query(
            r#"SELECT name, type, "notnull", dflt_value, pk
               FROM pragma_table_info(?)
               ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

        if rows.is_empty() {
            return Err(MigrateError::introspection(table, "table has no columns in catalog"));
        }

        rows.iter()
            .map(|row| -> std::result::Result<ColumnDescriptor, sqlx::Error> {
                Ok(ColumnDescriptor {
                    name: row.try_get("name")?,
                    declared_type: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
                    not_null: row.try_get::<i64, _>("notnull")? != 0,
                    pk_position: row.try_get("pk")?,
                    default_value: row.try_get("dflt_value")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MigrateError::introspection(table, e))
    }

    /// Describe a table's indexes with their key columns.
    pub async fn describe_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        self.ensure_table_exists(table).await?;

        let rows: Vec<SqliteRow> = sqlx::query(
            r#"SELECT name, "unique" FROM pragma_index_list(?) ORDER BY seq"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row
                .try_get("name")
                .map_err(|e| MigrateError::introspection(table, e))?;
            let is_unique = row
                .try_get::<i64, _>("unique")
                .map_err(|e| MigrateError::introspection(table, e))?
                != 0;

            let col_rows: Vec<SqliteRow> =
                sqlx::query("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&name)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| MigrateError::introspection(table, e))?;

            // Expression index columns have a NULL name and cannot be recreated
            let columns: Vec<String> = col_rows
                .iter()
                .filter_map(|r| r.try_get::<Option<String>, _>("name").ok().flatten())
                .collect();

            if columns.len() != col_rows.len() || columns.is_empty() {
                debug!("Skipping expression index {} on {}", name, table);
                continue;
            }

            indexes.push(IndexDescriptor {
                name,
                is_unique,
                columns,
            });
        }

        Ok(indexes)
    }

    /// Describe a table's foreign keys.
    pub async fn describe_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        self.ensure_table_exists(table).await?;

        let rows: Vec<SqliteRow> = sqlx::query(
            r#"SELECT "table", "from", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::introspection(table, e))?;

        rows.iter()
            .map(|row| -> std::result::Result<ForeignKeyDescriptor, sqlx::Error> {
                Ok(ForeignKeyDescriptor {
                    ref_table: row.try_get("table")?,
                    column: row.try_get("from")?,
                    ref_column: row.try_get("to")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MigrateError::introspection(table, e))
    }

    /// Describe a table fully.
    pub async fn describe_table(&self, table: &str) -> Result<TableDescriptor> {
        let columns = self.describe_columns(table).await?;
        let indexes = self.describe_indexes(table).await?;
        let foreign_keys = self.describe_foreign_keys(table).await?;

        debug!(
            "{}: {} columns, {} indexes, {} foreign keys",
            table,
            columns.len(),
            indexes.len(),
            foreign_keys.len()
        );

        Ok(TableDescriptor {
            name: table.to_string(),
            columns,
            indexes,
            foreign_keys,
        })
    }

    /// Get the row count for a table.
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::source_unavailable(e, format!("counting rows in {}", table)))?;
        row.try_get::<i64, _>(0)
            .map_err(|e| MigrateError::source_unavailable(e, format!("counting rows in {}", table)))
    }

    /// Columns and record count per table, for previews.
    pub async fn summarize(&self) -> Result<Vec<TableSummary>> {
        let mut summaries = Vec::new();
        for name in self.list_tables().await? {
            let columns = self.describe_columns(&name).await?;
            let record_count = self.row_count(&name).await?;
            summaries.push(TableSummary {
                name,
                columns,
                record_count,
            });
        }
        Ok(summaries)
    }

    /// Read a page of rows, positionally ordered like the table's columns.
    pub async fn preview(
        &self,
        table: &TableDescriptor,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ValueRow>> {
        let sql = format!("{} LIMIT ? OFFSET ?", select_all_sql(table));
        let rows: Vec<SqliteRow> = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::source_unavailable(e, format!("previewing {}", table.name)))?;

        rows.iter()
            .map(|row| decode_row(row, table.columns.len()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| MigrateError::source_unavailable(e, format!("previewing {}", table.name)))
    }

    /// Stream every row produced by `sql`, decoding `width` columns per row.
    ///
    /// Build `sql` with [`select_all_sql`]; the caller owns the query text.
    pub fn stream_rows<'a>(
        &'a self,
        sql: &'a str,
        width: usize,
    ) -> BoxStream<'a, std::result::Result<ValueRow, sqlx::Error>> {
        sqlx::query(sql)
            .fetch(&self.pool)
            .map(move |row| row.and_then(|r| decode_row(&r, width)))
            .boxed()
    }

    /// Determine the ordering key used to pick keeper rows.
    pub async fn row_key(&self, table: &TableDescriptor) -> Result<RowKey> {
        let sql = format!("SELECT rowid FROM {} LIMIT 1", quote_ident(&table.name));
        match sqlx::query(&sql).fetch_optional(&self.pool).await {
            Ok(_) => return Ok(RowKey::RowId),
            // WITHOUT ROWID tables
            Err(sqlx::Error::Database(e)) if e.message().contains("no such column: rowid") => {
                debug!("{} has no rowid, ordering by primary key", table.name);
            }
            Err(e) => {
                return Err(MigrateError::source_unavailable(
                    e,
                    format!("reading rowid of {}", table.name),
                ))
            }
        }

        match table.primary_key().as_slice() {
            [pk] => Ok(RowKey::Column(pk.clone())),
            _ => Err(MigrateError::resolution(
                &table.name,
                &[],
                "table has neither a rowid nor a single-column primary key to order rows by",
            )),
        }
    }
}

/// `SELECT "a", "b" FROM "t"` in declaration order.
pub fn select_all_sql(table: &TableDescriptor) -> String {
    let cols: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    format!("SELECT {} FROM {}", cols.join(", "), quote_ident(&table.name))
}

/// Decode one row into storage-class values.
pub fn decode_row(row: &SqliteRow, width: usize) -> std::result::Result<ValueRow, sqlx::Error> {
    (0..width).map(|i| decode_value(row, i)).collect()
}

/// Decode a single column by the value's actual storage class.
pub fn decode_value(row: &SqliteRow, idx: usize) -> std::result::Result<SqlValue, sqlx::Error> {
    let storage = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SqlValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" => SqlValue::Real(row.try_get_unchecked::<f64, _>(idx)?),
        "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        _ => SqlValue::Text(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

/// Bind a value to a query.
pub fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Blob(b) => query.bind(b.clone()),
    }
}

/// Fetch rows on an explicit connection (used inside caller-owned transactions).
pub async fn fetch_all_on(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlValue],
) -> std::result::Result<Vec<SqliteRow>, sqlx::Error> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = bind_value(query, p);
    }
    query.fetch_all(&mut *conn).await
}

/// Execute a statement on an explicit connection, returning rows affected.
pub async fn execute_on(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlValue],
) -> std::result::Result<u64, sqlx::Error> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = bind_value(query, p);
    }
    Ok(query.execute(&mut *conn).await?.rows_affected())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory source with `script` applied.
    pub async fn memory_source(script: &str) -> SqliteSource {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(
                "sqlite::memory:"
                    .parse::<SqliteConnectOptions>()
                    .unwrap()
                    .foreign_keys(false),
            )
            .await
            .unwrap();
        sqlx::raw_sql(script).execute(&pool).await.unwrap();
        SqliteSource::from_pool(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::memory_source;
    use super::*;

    const GRAFANA_LIKE: &str = r#"
        CREATE TABLE "user" (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            login TEXT NOT NULL,
            email TEXT,
            is_admin BOOLEAN DEFAULT 0,
            created DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE UNIQUE INDEX idx_user_login ON "user"(login);
        CREATE TABLE dashboard (
            id INTEGER PRIMARY KEY,
            org_id INTEGER NOT NULL REFERENCES org(id),
            title VARCHAR(189),
            data BLOB
        );
        CREATE TABLE org (id INTEGER PRIMARY KEY, name TEXT);
        INSERT INTO "user"(login, email, is_admin) VALUES ('admin', 'a@x', 1), ('bob', NULL, 0);
        INSERT INTO dashboard(org_id, title, data) VALUES (1, 'Home', X'00FF'), (1, NULL, NULL);
    "#;

    #[tokio::test]
    async fn test_list_tables_excludes_system_tables() {
        let source = memory_source(GRAFANA_LIKE).await;
        let tables = source.list_tables().await.unwrap();
        // AUTOINCREMENT creates sqlite_sequence, which must be hidden
        assert_eq!(tables, vec!["user", "dashboard", "org"]);
    }

    #[tokio::test]
    async fn test_describe_table() {
        let source = memory_source(GRAFANA_LIKE).await;
        let user = source.describe_table("user").await.unwrap();

        assert_eq!(user.column_names(), vec!["id", "login", "email", "is_admin", "created"]);
        assert_eq!(user.primary_key(), vec!["id"]);
        assert!(user.column("login").unwrap().not_null);
        assert_eq!(
            user.column("created").unwrap().default_value.as_deref(),
            Some("CURRENT_TIMESTAMP")
        );
        assert_eq!(user.indexes.len(), 1);
        assert_eq!(user.indexes[0].name, "idx_user_login");
        assert!(user.indexes[0].is_unique);
        assert_eq!(user.indexes[0].columns, vec!["login"]);

        let dashboard = source.describe_table("dashboard").await.unwrap();
        assert_eq!(dashboard.foreign_keys.len(), 1);
        assert_eq!(dashboard.foreign_keys[0].ref_table, "org");
        assert_eq!(dashboard.foreign_keys[0].column, "org_id");
        assert_eq!(dashboard.foreign_keys[0].ref_column.as_deref(), Some("id"));
    }

    #[tokio::test]
    async fn test_describe_missing_table_is_introspection_error() {
        let source = memory_source(GRAFANA_LIKE).await;
        let err = source.describe_table("vanished").await.unwrap_err();
        assert!(matches!(err, MigrateError::Introspection { .. }));
    }

    #[tokio::test]
    async fn test_row_count_and_preview() {
        let source = memory_source(GRAFANA_LIKE).await;
        assert_eq!(source.row_count("user").await.unwrap(), 2);

        let dashboard = source.describe_table("dashboard").await.unwrap();
        let rows = source.preview(&dashboard, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][2], SqlValue::Text("Home".into()));
        assert_eq!(rows[0][3], SqlValue::Blob(vec![0x00, 0xFF]));
        assert_eq!(rows[1][2], SqlValue::Null);

        let page = source.preview(&dashboard, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0][0], SqlValue::Integer(2));
    }

    #[tokio::test]
    async fn test_stream_rows_decodes_storage_classes() {
        let source = memory_source(
            "CREATE TABLE m (a, b, c, d); INSERT INTO m VALUES (1, 2.5, 'x', NULL);",
        )
        .await;
        let table = source.describe_table("m").await.unwrap();
        let sql = select_all_sql(&table);
        let rows: Vec<_> = source
            .stream_rows(&sql, table.columns.len())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(rows.len(), 1);
        let row = rows.into_iter().next().unwrap().unwrap();
        assert_eq!(
            row,
            vec![
                SqlValue::Integer(1),
                SqlValue::Real(2.5),
                SqlValue::Text("x".into()),
                SqlValue::Null
            ]
        );
    }

    #[tokio::test]
    async fn test_row_key() {
        let source = memory_source(
            "CREATE TABLE a (x TEXT); CREATE TABLE b (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID;",
        )
        .await;
        let a = source.describe_table("a").await.unwrap();
        assert_eq!(source.row_key(&a).await.unwrap(), RowKey::RowId);

        let b = source.describe_table("b").await.unwrap();
        assert_eq!(source.row_key(&b).await.unwrap(), RowKey::Column("k".into()));
        assert_eq!(RowKey::Column("k".into()).expr(), "\"k\"");
    }

    #[tokio::test]
    async fn test_row_key_reports_other_failures_as_source_errors() {
        let source = memory_source("CREATE TABLE a (x TEXT);").await;
        let a = source.describe_table("a").await.unwrap();
        sqlx::raw_sql("DROP TABLE a").execute(source.pool()).await.unwrap();

        let err = source.row_key(&a).await.unwrap_err();
        assert!(
            matches!(err, MigrateError::SourceUnavailable { .. }),
            "unexpected error: {}",
            err
        );
        assert!(err.to_string().contains("no such table"));
    }

    #[tokio::test]
    async fn test_summarize() {
        let source = memory_source(GRAFANA_LIKE).await;
        let summary = source.summarize().await.unwrap();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].name, "user");
        assert_eq!(summary[0].record_count, 2);
        assert_eq!(summary[2].record_count, 0);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
