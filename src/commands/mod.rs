// ABOUTME: Command implementations for the CLI
// ABOUTME: Exports export, plan and cleanup commands plus source backend selection

pub mod cleanup;
pub mod export;
pub mod plan;

pub use cleanup::cleanup;
pub use export::export;
pub use plan::plan;

use crate::config::ExportConfig;
use crate::database::SourceDatabase;
use crate::error::{Stage, StageContext};
use crate::postgres::PostgresDatabase;
use crate::registry::Registry;
use crate::sqlite::SqliteDatabase;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Which backend a `--source` value points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Postgres,
    Sqlite,
}

/// PostgreSQL URLs select the PostgreSQL backend; `.db`, `.sqlite` and
/// `.sqlite3` paths select SQLite
pub fn detect_source(source: &str) -> Result<SourceKind> {
    if source.starts_with("postgres://") || source.starts_with("postgresql://") {
        return Ok(SourceKind::Postgres);
    }
    let is_sqlite = Path::new(source)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ["db", "sqlite", "sqlite3"].contains(&ext));
    if is_sqlite {
        return Ok(SourceKind::Sqlite);
    }
    bail!(
        "Unrecognized source '{}'. Expected a postgresql:// URL or a .db/.sqlite/.sqlite3 file",
        source
    )
}

/// Connect to the export source
pub async fn open_source(source: &str, config: &ExportConfig) -> Result<Box<dyn SourceDatabase>> {
    let db: Box<dyn SourceDatabase> = match detect_source(source)? {
        SourceKind::Postgres => Box::new(
            PostgresDatabase::connect(source, config.naming.tenant_setting.as_deref()).await?,
        ),
        SourceKind::Sqlite => Box::new(SqliteDatabase::open(source)?),
    };
    Ok(db)
}

/// Load the configuration file, or fall back to the built-in content preset
pub fn load_config(path: Option<&Path>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::load(path),
        None => {
            tracing::info!("No config file given; using the 'content' preset");
            Ok(ExportConfig {
                presets: vec!["content".to_string()],
                ..ExportConfig::default()
            })
        }
    }
}

pub(crate) fn build_registry(config: &ExportConfig) -> Result<Registry> {
    let registry = config
        .registry()
        .with_context(|| StageContext::new(Stage::Registry))?;
    tracing::info!(
        "✓ Registry built: {} table policies, {} global table(s)",
        registry.policies().len(),
        registry.global_tables().len()
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_backend_from_source() {
        assert_eq!(
            detect_source("postgresql://u:p@localhost/db").unwrap(),
            SourceKind::Postgres
        );
        assert_eq!(detect_source("postgres://localhost/db").unwrap(), SourceKind::Postgres);
        assert_eq!(detect_source("site.db").unwrap(), SourceKind::Sqlite);
        assert_eq!(detect_source("/data/site.sqlite3").unwrap(), SourceKind::Sqlite);
        assert!(detect_source("mysql://localhost/db").is_err());
        assert!(detect_source("dump.sql").is_err());
    }

    #[test]
    fn missing_config_uses_content_preset() {
        let config = load_config(None).unwrap();
        assert_eq!(config.presets, vec!["content"]);
        assert!(build_registry(&config).unwrap().policy("posts").is_some());
    }
}
