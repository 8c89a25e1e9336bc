// ABOUTME: PostgreSQL source backend for subset exports
// ABOUTME: Implements SourceDatabase over tokio-postgres plus pg_dump subprocesses

pub mod connection;
pub mod dump;
pub mod schema;

pub use connection::connect;

use crate::database::{Dialect, SourceDatabase};
use crate::probe::TableColumns;
use crate::tenant::TenantId;
use crate::utils::{self, quote_ident};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio_postgres::Client;

/// Session setting carrying the active tenant id unless configured otherwise
pub const DEFAULT_TENANT_SETTING: &str = "app.tenant_id";

/// A live PostgreSQL source
///
/// Shadow tables are regular tables in the session's current schema: pg_dump
/// runs in its own session and could not see temporary ones. The tenant
/// context is a session-level custom setting, so views or row-level security
/// policies keyed on it follow the active tenant.
pub struct PostgresDatabase {
    client: Client,
    source_url: String,
    schema: String,
    tenant_setting: String,
}

impl PostgresDatabase {
    /// Connect and resolve the schema every unqualified table name refers to
    pub async fn connect(source_url: &str, tenant_setting: Option<&str>) -> Result<Self> {
        utils::validate_connection_string(source_url)?;
        utils::check_required_tools()?;

        let tenant_setting = tenant_setting.unwrap_or(DEFAULT_TENANT_SETTING);
        validate_setting_name(tenant_setting)?;

        let client = connect(source_url).await?;
        let schema = schema::current_schema(&client).await?;
        tracing::info!("✓ Connected to source (schema '{}')", schema);

        Ok(Self {
            client,
            source_url: source_url.to_string(),
            schema,
            tenant_setting: tenant_setting.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

/// Custom settings must be `namespace.name`, each part a plain identifier
fn validate_setting_name(setting: &str) -> Result<()> {
    let Some((namespace, name)) = setting.split_once('.') else {
        anyhow::bail!(
            "Tenant setting '{}' must look like 'namespace.name' (e.g. '{}')",
            setting,
            DEFAULT_TENANT_SETTING
        );
    };
    utils::validate_identifier(namespace)
        .and_then(|_| utils::validate_identifier(name))
        .with_context(|| format!("Invalid tenant setting '{}'", setting))
}

#[async_trait]
impl SourceDatabase for PostgresDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn list_base_tables(&self) -> Result<Vec<String>> {
        schema::list_tables(&self.client, &self.schema).await
    }

    async fn describe_columns(&self, table: &str) -> Result<TableColumns> {
        schema::table_columns(&self.client, &self.schema, table).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.client
            .execute(sql, &[])
            .await
            .with_context(|| format!("PostgreSQL statement failed: {}", sql))
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let row = self
            .client
            .query_one(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), &[])
            .await
            .with_context(|| format!("Failed to count rows in table '{}'", table))?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    async fn create_shadow_table(&self, source: &str, shadow: &str) -> Result<()> {
        // Identity is left out so the shadow owns no sequence of its own
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (LIKE {} INCLUDING DEFAULTS INCLUDING CONSTRAINTS \
             INCLUDING INDEXES INCLUDING GENERATED)",
            quote_ident(shadow),
            quote_ident(source)
        );
        self.client
            .batch_execute(&sql)
            .await
            .with_context(|| format!("Failed to create shadow table for '{}'", source))
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.client
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .await
            .with_context(|| format!("Failed to drop table '{}'", table))
    }

    async fn tenant_context(&self) -> Result<Option<TenantId>> {
        let row = self
            .client
            .query_one("SELECT current_setting($1, true)", &[&self.tenant_setting])
            .await
            .context("Failed to read tenant context")?;
        let value: Option<String> = row.get(0);
        match value.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(id) => {
                let id: u32 = id.parse().with_context(|| {
                    format!("Setting '{}' holds a non-numeric tenant '{}'", self.tenant_setting, id)
                })?;
                Ok(Some(TenantId::new(id)))
            }
        }
    }

    async fn set_tenant_context(&self, tenant: Option<TenantId>) -> Result<()> {
        let value = tenant.map(|t| t.to_string()).unwrap_or_default();
        self.client
            .execute(
                "SELECT set_config($1, $2, false)",
                &[&self.tenant_setting, &value],
            )
            .await
            .with_context(|| format!("Failed to set '{}'", self.tenant_setting))?;
        Ok(())
    }

    async fn dump_structure(&self, excluded: &[String], path: &Path) -> Result<()> {
        dump::dump_schema(&self.source_url, &self.schema, excluded, path)
    }

    async fn dump_table_data(&self, table: &str, path: &Path) -> Result<()> {
        dump::dump_table_data(&self.source_url, &self.schema, table, path)
    }

    async fn dump_subset_data(&self, shadow: &str, source: &str, path: &Path) -> Result<()> {
        // The shadow owns no sequence, so pg_dump would leave the source's
        // sequences at their restore-time start
        dump::dump_table_data(&self.source_url, &self.schema, shadow, path)?;
        let sequences = schema::owned_sequences(&self.client, &self.schema, source).await?;
        dump::append_sequence_state(path, &sequences)
    }

    fn dump_identifier(&self, table: &str) -> String {
        quote_ident(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_names_need_a_namespace() {
        assert!(validate_setting_name("app.tenant_id").is_ok());
        assert!(validate_setting_name("tenant_id").is_err());
        assert!(validate_setting_name("app.tenant; DROP").is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_tenant_context_round_trip() {
        let url = std::env::var("TEST_SOURCE_URL").unwrap();
        let db = PostgresDatabase::connect(&url, None).await.unwrap();
        assert_eq!(db.tenant_context().await.unwrap(), None);
        db.set_tenant_context(Some(TenantId::new(3))).await.unwrap();
        assert_eq!(db.tenant_context().await.unwrap(), Some(TenantId::new(3)));
        db.set_tenant_context(None).await.unwrap();
        assert_eq!(db.tenant_context().await.unwrap(), None);
    }
}
