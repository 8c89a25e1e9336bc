// ABOUTME: SQLite source backend for subset exports
// ABOUTME: Secure path validation, read-only connections and the SourceDatabase impl

pub mod dump;
pub mod reader;

use crate::database::{Dialect, SourceDatabase};
use crate::probe::TableColumns;
use crate::tenant::TenantId;
use crate::utils::quote_ident;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Resolve a SQLite path, rejecting anything that is not an existing
/// `.db`, `.sqlite` or `.sqlite3` regular file
pub fn validate_sqlite_path(path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        bail!("SQLite file path cannot be empty");
    }

    // Resolves symlinks and `..` segments, and fails for missing files
    let canonical = PathBuf::from(path)
        .canonicalize()
        .with_context(|| format!("Cannot resolve SQLite source '{}'", path))?;

    if !canonical.is_file() {
        bail!("SQLite source '{}' is not a regular file", path);
    }

    match canonical.extension().and_then(|ext| ext.to_str()) {
        Some("db" | "sqlite" | "sqlite3") => {}
        Some(other) => bail!(
            "Invalid SQLite file extension '{}'. Must be .db, .sqlite, or .sqlite3",
            other
        ),
        None => bail!(
            "SQLite source '{}' has no extension. Must be .db, .sqlite, or .sqlite3",
            path
        ),
    }

    tracing::debug!("Validated SQLite path: {}", canonical.display());
    Ok(canonical)
}

/// Open a validated SQLite source read-only
///
/// The connection's `temp` schema stays writable, which is where shadow
/// tables are created.
pub fn open_sqlite(path: &str) -> Result<Connection> {
    let canonical = validate_sqlite_path(path)?;
    tracing::info!("Opening SQLite source: {}", canonical.display());

    let conn = Connection::open_with_flags(&canonical, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Failed to open SQLite source: {}", canonical.display()))?;

    // Fails early on files that are not SQLite databases
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .with_context(|| format!("'{}' is not a readable SQLite database", canonical.display()))?;

    Ok(conn)
}

/// SQLite database exposed through [`SourceDatabase`]
///
/// Shadow tables are `TEMP` tables, so they vanish with the connection and
/// never touch the database file. SQLite has no session-level tenant setting;
/// the active tenant is tracked on the wrapper.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    tenant: Mutex<Option<TenantId>>,
}

impl SqliteDatabase {
    /// Open a database file read-only
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::from_connection(open_sqlite(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            tenant: Mutex::new(None),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    /// Run a single-value COUNT query
    pub fn query_count(&self, sql: &str) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("Failed to run count query: {}", sql))?;
        Ok(count as u64)
    }

    /// Run a batch of statements, for seeding fixtures
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?
            .execute_batch(sql)
            .context("Failed to execute SQL batch")
    }
}

#[async_trait]
impl SourceDatabase for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn list_base_tables(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        reader::list_tables(&conn)
    }

    async fn describe_columns(&self, table: &str) -> Result<TableColumns> {
        let conn = self.conn()?;
        reader::table_columns(&conn, table)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let affected = self
            .conn()?
            .execute(sql, [])
            .with_context(|| format!("SQLite statement failed: {}", sql))?;
        Ok(affected as u64)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let conn = self.conn()?;
        reader::get_table_row_count(&conn, table)
    }

    async fn create_shadow_table(&self, source: &str, shadow: &str) -> Result<()> {
        let conn = self.conn()?;
        let ddl = reader::table_ddl(&conn, source)?;
        let create = reader::shadow_ddl(&ddl, shadow)?;
        conn.execute_batch(&create)
            .with_context(|| format!("Failed to create shadow table for '{}'", source))
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.conn()?
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .with_context(|| format!("Failed to drop table '{}'", table))
    }

    async fn tenant_context(&self) -> Result<Option<TenantId>> {
        let tenant = self
            .tenant
            .lock()
            .map_err(|_| anyhow!("Tenant context lock poisoned"))?;
        Ok(*tenant)
    }

    async fn set_tenant_context(&self, tenant: Option<TenantId>) -> Result<()> {
        let mut current = self
            .tenant
            .lock()
            .map_err(|_| anyhow!("Tenant context lock poisoned"))?;
        *current = tenant;
        Ok(())
    }

    async fn dump_structure(&self, excluded: &[String], path: &Path) -> Result<()> {
        let conn = self.conn()?;
        dump::dump_structure(&conn, excluded, path)
    }

    async fn dump_table_data(&self, table: &str, path: &Path) -> Result<()> {
        let conn = self.conn()?;
        dump::dump_table_data(&conn, table, path).map(|_| ())
    }

    fn dump_identifier(&self, table: &str) -> String {
        quote_ident(table)
    }
}
