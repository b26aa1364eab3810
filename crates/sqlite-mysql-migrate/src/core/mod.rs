//! Core types shared by every migration phase.
//!
//! - [`schema`]: table, column, index and foreign key descriptors
//! - [`value`]: SQLite storage-class values carried from source to target
//! - [`traits`]: the statement sink that synthesized DDL is written to

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor};
pub use traits::StatementSink;
pub use value::{Batch, Row, SqlValue};
