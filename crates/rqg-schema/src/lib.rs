//! Schema snapshots for schema-aware query generation.
//!
//! A [`SchemaView`] is an immutable snapshot of the target database's
//! tables, columns, constraints and indexes. It is built either by parsing
//! a DDL script ([`parse_ddl`]) or by introspecting a live
//! PostgreSQL-compatible endpoint ([`introspect_schema`]), and is shared
//! read-only with every generation worker for the duration of a run.

pub mod ddl;
pub mod introspect;
pub mod types;
pub mod view;

pub use ddl::parse_ddl;
pub use introspect::introspect_schema;
pub use types::TypeTag;
pub use view::{Column, ConstraintKind, Index, SchemaView, Table, TableConstraint};

/// Schema construction failures.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("DDL parse error: {0}")]
    Parse(String),
    #[error("introspection failed: {0}")]
    Introspection(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
