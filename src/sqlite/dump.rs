// ABOUTME: In-process SQL text dumper for SQLite databases
// ABOUTME: Writes schema DDL and per-table INSERT statements to artifact files

use crate::utils::{quote_ident, quote_literal};
use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Render one SQLite value as a SQL literal
///
/// - INTEGER → decimal
/// - REAL → shortest round-tripping form, always with a fractional part
/// - TEXT → quoted string with embedded quotes doubled
/// - BLOB → X'..' hex literal
/// - NULL → NULL
pub fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => {
            if f.is_finite() {
                format!("{:?}", f)
            } else if f.is_nan() {
                "NULL".to_string()
            } else if f > 0.0 {
                "9e999".to_string()
            } else {
                "-9e999".to_string()
            }
        }
        ValueRef::Text(bytes) => quote_literal(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for b in bytes {
                let _ = write!(hex, "{:02X}", b);
            }
            hex.push('\'');
            hex
        }
    }
}

/// Write the schema of every object not belonging to an `excluded` table
///
/// Tables come first, then indexes, triggers and views, each group by name.
pub fn dump_structure(conn: &Connection, excluded: &[String], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create structure dump {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let mut stmt = conn
        .prepare(
            "SELECT tbl_name, sql FROM sqlite_master \
             WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
             ORDER BY CASE type WHEN 'table' THEN 0 WHEN 'index' THEN 1 \
             WHEN 'trigger' THEN 2 ELSE 3 END, name",
        )
        .context("Failed to prepare schema listing")?;
    let objects = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .context("Failed to list schema objects")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read schema objects")?;

    writeln!(out, "PRAGMA foreign_keys=OFF;").context("Failed to write structure dump")?;
    let mut written = 0usize;
    for (table, sql) in objects {
        if excluded.iter().any(|e| *e == table) {
            continue;
        }
        writeln!(out, "{};", sql).context("Failed to write structure dump")?;
        written += 1;
    }
    out.flush().context("Failed to flush structure dump")?;

    tracing::debug!(
        "Wrote {} schema object(s) to {}",
        written,
        path.display()
    );
    Ok(())
}

/// Write one INSERT statement per row of `table`
pub fn dump_table_data(conn: &Connection, table: &str, path: &Path) -> Result<u64> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create data dump {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let target = quote_ident(table);
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {}", target))
        .with_context(|| format!("Failed to prepare data read for '{}'", table))?;
    let column_count = stmt.column_count();
    let mut rows = stmt
        .query([])
        .with_context(|| format!("Failed to read rows of '{}'", table))?;

    let mut count = 0u64;
    let mut line = String::new();
    while let Some(row) = rows
        .next()
        .with_context(|| format!("Failed to read rows of '{}'", table))?
    {
        line.clear();
        line.push_str("INSERT INTO ");
        line.push_str(&target);
        line.push_str(" VALUES(");
        for i in 0..column_count {
            if i > 0 {
                line.push(',');
            }
            let value = row
                .get_ref(i)
                .with_context(|| format!("Failed to read column {} of '{}'", i, table))?;
            line.push_str(&sql_literal(value));
        }
        line.push_str(");\n");
        out.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write data dump {}", path.display()))?;
        count += 1;
    }
    out.flush()
        .with_context(|| format!("Failed to flush data dump {}", path.display()))?;

    tracing::debug!("Dumped {} row(s) of '{}'", count, table);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn literals_cover_every_storage_class() {
        assert_eq!(sql_literal(ValueRef::Null), "NULL");
        assert_eq!(sql_literal(ValueRef::Integer(-7)), "-7");
        assert_eq!(sql_literal(ValueRef::Real(1.0)), "1.0");
        assert_eq!(sql_literal(ValueRef::Real(0.1)), "0.1");
        assert_eq!(sql_literal(ValueRef::Text(b"it's")), "'it''s'");
        assert_eq!(sql_literal(ValueRef::Blob(&[0x00, 0xab])), "X'00AB'");
    }

    #[test]
    fn dumped_data_reloads_identically() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, raw BLOB);
             INSERT INTO t VALUES (1, 'a''b', 2.5, X'01FF'), (2, NULL, NULL, NULL);",
        )
        .unwrap();
        let dir = tempdir().unwrap();
        let schema = dir.path().join("schema.sql");
        let data = dir.path().join("data.sql");
        dump_structure(&conn, &[], &schema).unwrap();
        assert_eq!(dump_table_data(&conn, "t", &data).unwrap(), 2);

        let copy = Connection::open_in_memory().unwrap();
        copy.execute_batch(&std::fs::read_to_string(&schema).unwrap())
            .unwrap();
        copy.execute_batch(&std::fs::read_to_string(&data).unwrap())
            .unwrap();
        let (name, score, raw): (String, f64, Vec<u8>) = copy
            .query_row("SELECT name, score, raw FROM t WHERE id = 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(name, "a'b");
        assert_eq!(score, 2.5);
        assert_eq!(raw, vec![0x01, 0xff]);
    }

    #[test]
    fn structure_skips_excluded_tables_and_their_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE keep (id INTEGER PRIMARY KEY);
             CREATE TABLE drop_me (id INTEGER PRIMARY KEY, v TEXT);
             CREATE INDEX drop_me_v ON drop_me (v);",
        )
        .unwrap();
        let dir = tempdir().unwrap();
        let schema = dir.path().join("schema.sql");
        dump_structure(&conn, &["drop_me".to_string()], &schema).unwrap();
        let content = std::fs::read_to_string(&schema).unwrap();
        assert!(content.contains("CREATE TABLE keep"));
        assert!(!content.contains("drop_me"));
    }
}
