//! MySQL target connection.
//!
//! Uses mysql_async for connection pooling. DDL goes through a
//! [`StatementSink`]; row data goes through a prepared statement inside a
//! per-table transaction (see [`crate::transfer`]).

pub mod ddl;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::traits::StatementSink;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

pub use ddl::{IndexStatement, SchemaSynthesizer};

/// A run is sequential, so a small pool suffices.
const MAX_CONNECTIONS: usize = 2;

/// Statements run on every new session, and at the top of exported scripts.
///
/// `NO_AUTO_VALUE_ON_ZERO` makes an explicit 0 in an AUTO_INCREMENT column
/// store 0 instead of drawing the next sequence value.
pub const SESSION_SETUP: &[&str] = &[
    "SET NAMES utf8mb4",
    "SET SESSION sql_mode = CONCAT_WS(',', NULLIF(@@sql_mode, ''), 'NO_AUTO_VALUE_ON_ZERO')",
];

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// MySQL target database.
pub struct MysqlTarget {
    pool: Pool,
    database: String,
}

impl MysqlTarget {
    /// Connect and verify the target is reachable.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "prefer" | "require" => {
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
            "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => {
                Some(SslOpts::default())
            }
            other => {
                warn!("Unknown ssl_mode '{}', defaulting to prefer", other);
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            .init(SESSION_SETUP.to_vec());

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, MAX_CONNECTIONS).ok_or_else(|| {
            MigrateError::Config("invalid MySQL pool constraints".to_string())
        })?;
        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();

        let target = Self {
            pool: Pool::new(opts),
            database: config.database.clone(),
        };
        target.test_connection().await?;

        info!("Connected to MySQL target: {}", config.display_url());
        Ok(target)
    }

    /// Target database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Get a connection from the pool.
    pub async fn get_conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::target_unavailable(e, "getting MySQL connection"))
    }

    /// Test the database connection.
    pub async fn test_connection(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::target_unavailable(e, "testing MySQL connection"))?;
        Ok(())
    }

    /// Get the row count for a table.
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let mut conn = self.get_conn().await?;
        count_rows(&mut conn, table).await
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(self) -> Result<()> {
        self.pool
            .disconnect()
            .await
            .map_err(|e| MigrateError::target_unavailable(e, "closing MySQL pool"))
    }
}

/// `SELECT COUNT(*)` on an existing connection.
pub async fn count_rows(conn: &mut Conn, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let count: Option<i64> = conn
        .query_first(sql)
        .await
        .map_err(|e| MigrateError::target_unavailable(e, format!("counting rows in {}", table)))?;
    Ok(count.unwrap_or(0))
}

/// Convert a source value to a MySQL parameter.
pub fn sql_value_to_mysql(value: &SqlValue) -> mysql_async::Value {
    match value {
        SqlValue::Null => mysql_async::Value::NULL,
        SqlValue::Integer(i) => mysql_async::Value::from(*i),
        SqlValue::Real(f) => mysql_async::Value::from(*f),
        SqlValue::Text(s) => mysql_async::Value::from(s.as_str()),
        SqlValue::Blob(b) => mysql_async::Value::from(b.as_slice()),
    }
}

/// Executes statements on a live MySQL connection.
pub struct MysqlSink<'a> {
    conn: &'a mut Conn,
}

impl<'a> MysqlSink<'a> {
    pub fn new(conn: &'a mut Conn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StatementSink for MysqlSink<'_> {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        debug!("MySQL: {}", statement);
        self.conn
            .query_drop(statement)
            .await
            .map_err(|e| MigrateError::schema("", e))
    }

    fn sink_type(&self) -> &str {
        "mysql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("user"), "`user`");
        assert_eq!(quote_ident("odd`name"), "`odd``name`");
    }

    #[test]
    fn test_session_setup_keeps_zero_ids() {
        let sql_mode = SESSION_SETUP
            .iter()
            .find(|s| s.contains("sql_mode"))
            .unwrap();
        assert!(sql_mode.contains("NO_AUTO_VALUE_ON_ZERO"));
        // Appends to the server's mode rather than replacing it
        assert!(sql_mode.contains("@@sql_mode"));
    }

    #[test]
    fn test_sql_value_to_mysql() {
        assert_eq!(sql_value_to_mysql(&SqlValue::Null), mysql_async::Value::NULL);
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Integer(7)),
            mysql_async::Value::Int(7)
        );
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Real(1.5)),
            mysql_async::Value::Double(1.5)
        );
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Text("héllo".into())),
            mysql_async::Value::Bytes("héllo".as_bytes().to_vec())
        );
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Blob(vec![0, 255])),
            mysql_async::Value::Bytes(vec![0, 255])
        );
    }
}
