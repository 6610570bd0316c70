//! The immutable schema snapshot and its typed helper queries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

use crate::types::TypeTag;

/// One column of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// The SQL type name as written or reported.
    pub sql_type: String,
    pub type_tag: TypeTag,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        let sql_type = sql_type.into();
        let type_tag = TypeTag::from_sql_type(&sql_type);
        Self {
            name: name.into(),
            sql_type,
            type_tag,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }
}

/// Kind of a table-level constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

/// A table-level constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConstraint {
    pub name: Option<String>,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    /// CHECK expression or REFERENCES target, verbatim.
    pub expression: Option<String>,
}

/// An index over a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// One table of the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub constraints: Vec<TableConstraint>,
    pub indexes: Vec<Index>,
    /// Estimated row count (0 when unknown).
    pub row_count: u64,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            constraints: Vec::new(),
            indexes: Vec::new(),
            row_count: 0,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Immutable snapshot of the target database's tables.
///
/// Tables iterate in lexicographic name order so that RNG-driven picks stay
/// reproducible across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaView {
    tables: BTreeMap<String, Table>,
}

impl SchemaView {
    /// A snapshot with no tables; schema-aware elements fall back to
    /// defaults against it.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: Vec<Table>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|table| (table.name.clone(), table))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Tables in lexicographic name order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Columns of `table` with an integer or numeric tag, sorted by name.
    pub fn numeric_columns(&self, table: &str) -> Vec<&Column> {
        self.columns_where(table, |column| column.type_tag.is_numeric())
    }

    /// Character-typed columns of `table`, sorted by name.
    pub fn string_columns(&self, table: &str) -> Vec<&Column> {
        self.columns_where(table, |column| column.type_tag == TypeTag::Text)
    }

    /// Primary key columns of `table`, sorted by name.
    pub fn pk_columns(&self, table: &str) -> Vec<&Column> {
        self.columns_where(table, |column| column.primary_key)
    }

    /// Tables satisfying `predicate`, sorted by name.
    pub fn tables_matching(&self, predicate: impl Fn(&Table) -> bool) -> Vec<&Table> {
        self.tables().filter(|table| predicate(table)).collect()
    }

    fn columns_where(&self, table: &str, predicate: impl Fn(&Column) -> bool) -> Vec<&Column> {
        let mut columns: Vec<&Column> = match self.tables.get(table) {
            Some(table) => table.columns.iter().filter(|c| predicate(c)).collect(),
            None => Vec::new(),
        };
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        columns
    }

    /// Stable hex fingerprint of the snapshot's structure, recorded in
    /// checkpoints so a resume against a changed schema is detectable.
    pub fn fingerprint(&self) -> String {
        let mut signature = String::new();
        for table in self.tables.values() {
            signature.push_str(&table.name);
            signature.push('(');
            for column in &table.columns {
                signature.push_str(&column.name);
                signature.push(':');
                signature.push_str(&column.sql_type);
                if column.primary_key {
                    signature.push('!');
                }
                if !column.nullable {
                    signature.push('*');
                }
                signature.push(',');
            }
            signature.push(')');
        }
        format!("{:032x}", xxh3_128(signature.as_bytes()))
    }
}
