//! Schema descriptors read from the source catalog.
//!
//! A [`TableDescriptor`] is introspected once per run and not mutated
//! afterwards; column order is the source's declaration order and rows are
//! positional tuples matched to it.

use serde::{Deserialize, Serialize};

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name (unique within a run).
    pub name: String,

    /// Columns in declaration order.
    pub columns: Vec<ColumnDescriptor>,

    /// Indexes declared on the table.
    pub indexes: Vec<IndexDescriptor>,

    /// Foreign keys declared on the table.
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl TableDescriptor {
    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Find a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check whether every named column exists.
    pub fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.column(n).is_some())
    }

    /// Primary key column names, ordered by their position in the key.
    pub fn primary_key(&self) -> Vec<String> {
        let mut pk: Vec<&ColumnDescriptor> =
            self.columns.iter().filter(|c| c.is_primary_key()).collect();
        pk.sort_by_key(|c| c.pk_position);
        pk.into_iter().map(|c| c.name.clone()).collect()
    }

    /// Check if the table has a single-column primary key.
    pub fn has_single_pk(&self) -> bool {
        self.primary_key().len() == 1
    }

    /// Unique indexes only.
    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexDescriptor> {
        self.indexes.iter().filter(|i| i.is_unique)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Declared source type, free-form (may be empty in SQLite).
    pub declared_type: String,

    /// Whether the column is declared NOT NULL.
    pub not_null: bool,

    /// 1-based position within the primary key, 0 when not part of it.
    pub pk_position: i64,

    /// Default value as source-dialect text.
    pub default_value: Option<String>,
}

impl ColumnDescriptor {
    pub fn is_primary_key(&self) -> bool {
        self.pk_position > 0
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,

    /// Whether the index enforces uniqueness.
    pub is_unique: bool,

    /// Indexed column names, in key order.
    pub columns: Vec<String>,
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Referenced table name.
    pub ref_table: String,

    /// Local column name.
    pub column: String,

    /// Referenced column name (SQLite allows it to be implicit).
    pub ref_column: Option<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn column(name: &str, declared_type: &str, not_null: bool, pk: i64) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            not_null,
            pk_position: pk,
            default_value: None,
        }
    }

    pub fn index(name: &str, unique: bool, columns: &[&str]) -> IndexDescriptor {
        IndexDescriptor {
            name: name.to_string(),
            is_unique: unique,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// `user(id PK, login TEXT, email TEXT, is_admin BOOLEAN)`.
    pub fn user_table() -> TableDescriptor {
        TableDescriptor {
            name: "user".to_string(),
            columns: vec![
                column("id", "INTEGER", false, 1),
                column("login", "TEXT", true, 0),
                column("email", "TEXT", false, 0),
                column("is_admin", "BOOLEAN", false, 0),
            ],
            indexes: vec![index("idx_user_login", true, &["login"])],
            foreign_keys: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_primary_key_ordered_by_position() {
        let table = TableDescriptor {
            name: "team_member".into(),
            columns: vec![
                column("user_id", "INTEGER", true, 2),
                column("team_id", "INTEGER", true, 1),
                column("role", "TEXT", false, 0),
            ],
            indexes: vec![],
            foreign_keys: vec![],
        };
        assert_eq!(table.primary_key(), vec!["team_id", "user_id"]);
        assert!(!table.has_single_pk());
    }

    #[test]
    fn test_has_columns() {
        let table = user_table();
        assert!(table.has_columns(&["login", "email"]));
        assert!(!table.has_columns(&["login", "org_id"]));
    }

    #[test]
    fn test_unique_indexes() {
        let mut table = user_table();
        table.indexes.push(index("idx_user_email", false, &["email"]));
        let names: Vec<_> = table.unique_indexes().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["idx_user_login"]);
    }
}
