// ABOUTME: Source database interface consumed by the export pipeline
// ABOUTME: Backends implement listing, probing, statements, tenant context and dumps

use crate::probe::TableColumns;
use crate::tenant::TenantId;
use crate::utils::{quote_ident, quote_literal};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// SQL flavour a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Insert-or-replace the rows produced by `select` into `shadow`, keyed by primary key
    pub fn merge_insert(&self, shadow: &str, columns: &TableColumns, select: &str) -> String {
        let target = quote_ident(shadow);
        match self {
            Dialect::Sqlite => format!(
                "INSERT OR REPLACE INTO {} SELECT * FROM ({}) AS subset_rows",
                target, select
            ),
            Dialect::Postgres => {
                let keys = columns
                    .primary_keys
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let updates = columns
                    .all_columns
                    .iter()
                    .filter(|c| !columns.primary_keys.contains(c))
                    .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
                    .collect::<Vec<_>>();
                let action = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", updates.join(", "))
                };
                format!(
                    "INSERT INTO {} SELECT * FROM ({}) AS subset_rows ON CONFLICT ({}) {}",
                    target, select, keys, action
                )
            }
        }
    }

    /// Rewrite every non-key text column of `shadow`, replacing `from` with `to`
    pub fn replace_text(
        &self,
        shadow: &str,
        columns: &TableColumns,
        from: &str,
        to: &str,
    ) -> Option<String> {
        let assignments: Vec<String> = columns
            .text_columns
            .iter()
            .filter(|c| !columns.primary_keys.contains(c))
            .map(|c| {
                format!(
                    "{} = REPLACE({}, {}, {})",
                    quote_ident(c),
                    quote_ident(c),
                    quote_literal(from),
                    quote_literal(to)
                )
            })
            .collect();
        if assignments.is_empty() {
            return None;
        }
        Some(format!(
            "UPDATE {} SET {}",
            quote_ident(shadow),
            assignments.join(", ")
        ))
    }
}

/// Everything the export pipeline needs from a source database
///
/// Every statement runs against the tenant context most recently set with
/// [`SourceDatabase::set_tenant_context`] and commits on its own.
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Physical base tables, shadow tables included
    async fn list_base_tables(&self) -> Result<Vec<String>>;

    async fn describe_columns(&self, table: &str) -> Result<TableColumns>;

    /// Execute a statement and return the number of rows it affected
    async fn execute(&self, sql: &str) -> Result<u64>;

    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Create `shadow` with the same schema as `source` unless it already exists
    async fn create_shadow_table(&self, source: &str, shadow: &str) -> Result<()>;

    /// Drop a table if it exists
    async fn drop_table(&self, table: &str) -> Result<()>;

    async fn tenant_context(&self) -> Result<Option<TenantId>>;

    async fn set_tenant_context(&self, tenant: Option<TenantId>) -> Result<()>;

    /// Write the schema (no rows) of every table except `excluded` to `path`
    async fn dump_structure(&self, excluded: &[String], path: &Path) -> Result<()>;

    /// Write the rows of one table to `path`
    async fn dump_table_data(&self, table: &str, path: &Path) -> Result<()>;

    /// Write a shadow's rows to `path`, followed by whatever state the
    /// restored `source` table needs to accept new rows
    async fn dump_subset_data(&self, shadow: &str, _source: &str, path: &Path) -> Result<()> {
        self.dump_table_data(shadow, path).await
    }

    /// How the dumper spells `table` inside an artifact
    fn dump_identifier(&self, table: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(pk: &[&str], all: &[&str], text: &[&str]) -> TableColumns {
        TableColumns {
            primary_keys: pk.iter().map(|s| s.to_string()).collect(),
            all_columns: all.iter().map(|s| s.to_string()).collect(),
            text_columns: text.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn sqlite_merge_insert_replaces_by_key() {
        let sql = Dialect::Sqlite.merge_insert(
            "zz_subset_1",
            &columns(&["id"], &["id", "title"], &["title"]),
            "SELECT * FROM \"a\"",
        );
        assert_eq!(
            sql,
            "INSERT OR REPLACE INTO \"zz_subset_1\" SELECT * FROM (SELECT * FROM \"a\") AS subset_rows"
        );
    }

    #[test]
    fn postgres_merge_insert_upserts_non_key_columns() {
        let sql = Dialect::Postgres.merge_insert(
            "zz_subset_1",
            &columns(&["id"], &["id", "title"], &["title"]),
            "SELECT * FROM \"a\"",
        );
        assert_eq!(
            sql,
            "INSERT INTO \"zz_subset_1\" SELECT * FROM (SELECT * FROM \"a\") AS subset_rows \
             ON CONFLICT (\"id\") DO UPDATE SET \"title\" = EXCLUDED.\"title\""
        );
    }

    #[test]
    fn postgres_merge_insert_with_only_keys_does_nothing_on_conflict() {
        let sql = Dialect::Postgres.merge_insert(
            "s",
            &columns(&["a", "b"], &["a", "b"], &[]),
            "SELECT 1",
        );
        assert!(sql.ends_with("ON CONFLICT (\"a\", \"b\") DO NOTHING"));
    }

    #[test]
    fn replace_text_skips_keys_and_needs_text_columns() {
        let cols = columns(&["slug"], &["slug", "body", "n"], &["slug", "body"]);
        let sql = Dialect::Sqlite
            .replace_text("s", &cols, "prod.example", "it's.local")
            .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"s\" SET \"body\" = REPLACE(\"body\", 'prod.example', 'it''s.local')"
        );

        let cols = columns(&["id"], &["id", "n"], &[]);
        assert!(Dialect::Postgres.replace_text("s", &cols, "a", "b").is_none());
    }
}
