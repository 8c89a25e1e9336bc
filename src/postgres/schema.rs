// ABOUTME: Schema introspection queries for PostgreSQL export sources
// ABOUTME: Lists base tables and describes key, text and full column lists

use crate::probe::{is_text_type, TableColumns};
use anyhow::{bail, Context, Result};
use tokio_postgres::Client;

/// Schema unqualified names resolve to for this session
pub async fn current_schema(client: &Client) -> Result<String> {
    let row = client
        .query_one("SELECT current_schema()::text", &[])
        .await
        .context("Failed to read current schema")?;
    let schema: Option<String> = row.get(0);
    schema.context("Session has no current schema; check search_path")
}

/// List base tables in `schema`, sorted by name
pub async fn list_tables(client: &Client, schema: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT tablename::text
             FROM pg_catalog.pg_tables
             WHERE schemaname = $1
             ORDER BY tablename",
            &[&schema],
        )
        .await
        .context("Failed to list tables")?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Describe one table's columns in ordinal order and its primary key in key order
pub async fn table_columns(client: &Client, schema: &str, table: &str) -> Result<TableColumns> {
    let rows = client
        .query(
            "SELECT a.attname::text, pg_catalog.format_type(a.atttypid, a.atttypmod)
             FROM pg_catalog.pg_attribute a
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1 AND c.relname = $2
               AND a.attnum > 0 AND NOT a.attisdropped
             ORDER BY a.attnum",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to list columns of '{}'", table))?;

    if rows.is_empty() {
        bail!("Table '{}.{}' not found", schema, table);
    }

    let mut columns = TableColumns::default();
    for row in &rows {
        let name: String = row.get(0);
        let data_type: String = row.get(1);
        if is_text_type(&data_type) {
            columns.text_columns.push(name.clone());
        }
        columns.all_columns.push(name);
    }

    let keys = client
        .query(
            "SELECT a.attname::text
             FROM pg_catalog.pg_index i
             JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
             JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
             WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to read primary key of '{}'", table))?;
    columns.primary_keys = keys.iter().map(|row| row.get(0)).collect();

    Ok(columns)
}

/// A sequence owned by a table column, serial or identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedSequence {
    pub schema: String,
    pub name: String,
    /// `None` until the sequence has handed out its first value
    pub last_value: Option<i64>,
}

/// Sequences owned by `table`, sorted by name
pub async fn owned_sequences(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<OwnedSequence>> {
    let rows = client
        .query(
            "SELECT s.schemaname::text, s.sequencename::text, s.last_value
             FROM pg_catalog.pg_depend d
             JOIN pg_catalog.pg_class t ON t.oid = d.refobjid
             JOIN pg_catalog.pg_namespace tn ON tn.oid = t.relnamespace
             JOIN pg_catalog.pg_class q ON q.oid = d.objid AND q.relkind = 'S'
             JOIN pg_catalog.pg_namespace qn ON qn.oid = q.relnamespace
             JOIN pg_catalog.pg_sequences s
               ON s.schemaname = qn.nspname AND s.sequencename = q.relname
             WHERE d.classid = 'pg_catalog.pg_class'::regclass
               AND d.refclassid = 'pg_catalog.pg_class'::regclass
               AND d.deptype IN ('a', 'i')
               AND tn.nspname = $1 AND t.relname = $2
             ORDER BY s.sequencename",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to list sequences owned by '{}'", table))?;

    Ok(rows
        .iter()
        .map(|row| OwnedSequence {
            schema: row.get(0),
            name: row.get(1),
            last_value: row.get(2),
        })
        .collect())
}
