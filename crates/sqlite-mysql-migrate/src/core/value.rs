//! SQL value types carried from the SQLite source to the MySQL target.
//!
//! SQLite stores every value in one of five storage classes regardless of the
//! declared column type, so values are modelled by storage class rather than
//! by declared type.

use std::fmt;

/// A single SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,

    /// 64-bit signed integer (INTEGER storage class).
    Integer(i64),

    /// 64-bit float (REAL storage class).
    Real(f64),

    /// UTF-8 text (TEXT storage class).
    Text(String),

    /// Raw bytes (BLOB storage class), passed through unaltered.
    Blob(Vec<u8>),
}

/// One positional row, ordered like the table's columns.
pub type Row = Vec<SqlValue>;

/// A batch of rows read from the source.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub rows: Vec<Row>,
}

impl Batch {
    /// Create an empty batch with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render as a MySQL literal for offline scripts.
    ///
    /// Numbers are bare, text is single-quoted with `'` and `\` doubled,
    /// blobs become hex literals and NULL is the bare token.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) if v.is_finite() => v.to_string(),
            SqlValue::Real(_) => "NULL".to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
            SqlValue::Blob(b) => format!("X'{}'", hex::encode_upper(b)),
        }
    }
}

/// Human-readable rendering used in resolution log entries.
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
