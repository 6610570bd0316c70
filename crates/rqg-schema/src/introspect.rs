//! Live schema introspection over `information_schema`.

use std::collections::HashMap;

use tokio_postgres::Client;

use crate::view::{Column, SchemaView, Table};
use crate::SchemaError;

const COLUMNS_QUERY: &str = "
    SELECT table_name, column_name, data_type, is_nullable, column_default
    FROM information_schema.columns
    WHERE table_schema = 'public'
    ORDER BY table_name, ordinal_position";

const CONSTRAINED_COLUMNS_QUERY: &str = "
    SELECT tc.table_name, kcu.column_name, tc.constraint_type
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    WHERE tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
        AND tc.table_schema = 'public'
    ORDER BY tc.table_name, kcu.ordinal_position";

const ROW_ESTIMATE_QUERY: &str = "
    SELECT t.table_name, c.reltuples::bigint
    FROM information_schema.tables t
    JOIN pg_class c ON c.relname = t.table_name
    JOIN pg_namespace n ON n.oid = c.relnamespace AND n.nspname = t.table_schema
    WHERE t.table_schema = 'public' AND t.table_type = 'BASE TABLE'";

/// Build a snapshot of every base table in the `public` schema.
pub async fn introspect_schema(client: &Client) -> Result<SchemaView, SchemaError> {
    let column_rows = client
        .query(COLUMNS_QUERY, &[])
        .await
        .map_err(|e| SchemaError::Introspection(e.to_string()))?;
    let constraint_rows = client
        .query(CONSTRAINED_COLUMNS_QUERY, &[])
        .await
        .map_err(|e| SchemaError::Introspection(e.to_string()))?;
    let estimate_rows = client
        .query(ROW_ESTIMATE_QUERY, &[])
        .await
        .map_err(|e| SchemaError::Introspection(e.to_string()))?;

    // (table, column) -> constraint kind; composite keys mark every member.
    let mut pk_columns: HashMap<(String, String), ()> = HashMap::new();
    let mut unique_columns: HashMap<(String, String), ()> = HashMap::new();
    for row in constraint_rows {
        let table: String = row.get(0);
        let column: String = row.get(1);
        let kind: String = row.get(2);
        if kind == "PRIMARY KEY" {
            pk_columns.insert((table, column), ());
        } else {
            unique_columns.insert((table, column), ());
        }
    }

    let mut row_counts: HashMap<String, u64> = HashMap::new();
    for row in estimate_rows {
        let table: String = row.get(0);
        let estimate: i64 = row.get(1);
        row_counts.insert(table, estimate.max(0) as u64);
    }

    let mut tables: HashMap<String, Table> = HashMap::new();
    for row in column_rows {
        let table_name: String = row.get(0);
        let column_name: String = row.get(1);
        let data_type: String = row.get(2);
        let is_nullable: String = row.get(3);
        let default: Option<String> = row.get(4);

        let mut column = Column::new(column_name.clone(), data_type);
        column.nullable = is_nullable == "YES";
        column.default = default;
        let key = (table_name.clone(), column_name);
        if pk_columns.contains_key(&key) {
            column.primary_key = true;
            column.nullable = false;
        }
        if unique_columns.contains_key(&key) {
            column.unique = true;
        }

        tables
            .entry(table_name.clone())
            .or_insert_with(|| {
                let mut table = Table::new(table_name.clone(), Vec::new());
                table.row_count = row_counts.get(&table_name).copied().unwrap_or(0);
                table
            })
            .columns
            .push(column);
    }

    let view = SchemaView::from_tables(tables.into_values().collect());
    tracing::info!(tables = view.len(), "introspected schema");
    Ok(view)
}
