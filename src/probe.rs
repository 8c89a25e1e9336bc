// ABOUTME: Schema probe returning key, text and full column lists for a table
// ABOUTME: Thin read-only wrapper that tags failures with the probe stage

use crate::database::SourceDatabase;
use crate::error::{Stage, StageContext};
use crate::tenant::TenantId;
use anyhow::{Context, Result};

/// Column layout of one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableColumns {
    pub primary_keys: Vec<String>,
    pub text_columns: Vec<String>,
    pub all_columns: Vec<String>,
}

impl TableColumns {
    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }
}

/// Describe `table` in the current tenant context
pub async fn probe_table<D>(db: &D, tenant: TenantId, table: &str) -> Result<TableColumns>
where
    D: SourceDatabase + ?Sized,
{
    let columns = db
        .describe_columns(table)
        .await
        .with_context(|| StageContext::new(Stage::SchemaProbe).tenant(tenant).table(table))?;

    tracing::debug!(
        "Probed '{}': {} column(s), key ({}), {} text column(s)",
        table,
        columns.all_columns.len(),
        columns.primary_keys.join(", "),
        columns.text_columns.len()
    );

    Ok(columns)
}

/// Whether a declared column type holds text
///
/// Matches both PostgreSQL type names and SQLite declared-type affinity.
pub fn is_text_type(declared: &str) -> bool {
    let upper = declared.to_ascii_uppercase();
    upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB")
}
