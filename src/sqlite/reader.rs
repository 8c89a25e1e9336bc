// ABOUTME: SQLite database introspection
// ABOUTME: Functions to list tables, describe columns, read DDL and count rows

use crate::probe::{is_text_type, TableColumns};
use crate::utils::quote_ident;
use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};

/// List all user tables, temporary ones included
///
/// Queries sqlite_master and sqlite_temp_master. Excludes sqlite_* system
/// tables (sqlite_sequence, sqlite_stat1, etc.).
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    tracing::debug!("Listing tables from SQLite database");

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type='table' AND name NOT LIKE 'sqlite_%' \
             UNION \
             SELECT name FROM sqlite_temp_master \
             WHERE type='table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .context("Failed to prepare statement to list tables")?;

    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("Failed to query table list")?
        .collect::<Result<Vec<String>, _>>()
        .context("Failed to collect table names")?;

    tracing::debug!("Found {} tables in SQLite database", tables.len());

    Ok(tables)
}

/// Primary key, text and full column lists of a table
///
/// Primary key columns come back in key order. Text columns are those whose
/// declared type has TEXT affinity.
pub fn table_columns(conn: &Connection, table: &str) -> Result<TableColumns> {
    let mut stmt = conn
        .prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
        .context("Failed to prepare column listing")?;

    let rows = stmt
        .query_map([table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .with_context(|| format!("Failed to list columns of '{}'", table))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read columns of '{}'", table))?;

    if rows.is_empty() {
        bail!("Table '{}' not found in SQLite database", table);
    }

    let mut keyed: Vec<(i64, String)> = Vec::new();
    let mut columns = TableColumns::default();
    for (name, declared, pk) in rows {
        if pk > 0 {
            keyed.push((pk, name.clone()));
        }
        if is_text_type(&declared) {
            columns.text_columns.push(name.clone());
        }
        columns.all_columns.push(name);
    }
    keyed.sort();
    columns.primary_keys = keyed.into_iter().map(|(_, name)| name).collect();

    Ok(columns)
}

/// The CREATE TABLE statement a table was defined with
pub fn table_ddl(conn: &Connection, table: &str) -> Result<String> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type='table' AND name = ?1",
        [table],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .with_context(|| format!("Failed to read definition of '{}'", table))?
    .with_context(|| format!("Table '{}' not found in SQLite database", table))
}

/// Get row count for a specific table
pub fn get_table_row_count(conn: &Connection, table: &str) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let count: i64 = conn
        .query_row(&query, [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows in table '{}'", table))?;
    Ok(count as u64)
}

/// Rewrite a CREATE TABLE statement to create a temporary copy named `shadow`
///
/// Everything from the first parenthesis on (columns, constraints, table
/// options) is kept.
pub fn shadow_ddl(ddl: &str, shadow: &str) -> Result<String> {
    let Some(open) = column_list_start(ddl) else {
        bail!("Unexpected table definition without a column list: {}", ddl);
    };
    Ok(format!(
        "CREATE TEMP TABLE IF NOT EXISTS {} {}",
        quote_ident(shadow),
        &ddl[open..]
    ))
}

/// Byte offset of the first `(` outside a quoted name or string literal
fn column_list_start(ddl: &str) -> Option<usize> {
    let mut closing: Option<char> = None;
    let mut chars = ddl.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        match closing {
            Some(end) if c == end => {
                // A doubled quote is an escaped quote, not the end of the name
                if end != ']' && chars.peek().map(|&(_, next)| next) == Some(end) {
                    chars.next();
                } else {
                    closing = None;
                }
            }
            Some(_) => {}
            None => match c {
                '"' | '`' | '\'' => closing = Some(c),
                '[' => closing = Some(']'),
                '(' => return Some(index),
                _ => {}
            },
        }
    }
    None
}
