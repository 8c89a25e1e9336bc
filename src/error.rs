// ABOUTME: Failure context attached to pipeline errors
// ABOUTME: Records the stage, tenant and table an export failed on

use crate::tenant::TenantId;
use std::fmt;

/// Pipeline stage a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Registry,
    Discovery,
    SchemaProbe,
    Subset,
    TenantSwitch,
    Artifact,
    Assembly,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Registry => "registry build",
            Stage::Discovery => "table discovery",
            Stage::SchemaProbe => "schema probe",
            Stage::Subset => "subset query",
            Stage::TenantSwitch => "tenant switch",
            Stage::Artifact => "artifact dump",
            Stage::Assembly => "output assembly",
        };
        f.write_str(label)
    }
}

/// Context value attached to errors with `anyhow::Context`
///
/// Recover it with `err.downcast_ref::<StageContext>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    pub stage: Stage,
    pub tenant: Option<TenantId>,
    pub table: Option<String>,
}

impl StageContext {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            tenant: None,
            table: None,
        }
    }

    pub fn tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

impl fmt::Display for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.stage)?;
        if let Some(table) = &self.table {
            write!(f, " for table '{}'", table)?;
        }
        if let Some(tenant) = self.tenant {
            write!(f, " (tenant {})", tenant)?;
        }
        Ok(())
    }
}

/// Find the stage context at any depth of an error's context layers
pub fn stage_of(err: &anyhow::Error) -> Option<&StageContext> {
    err.downcast_ref::<StageContext>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn display_includes_table_and_tenant() {
        let ctx = StageContext::new(Stage::Subset)
            .tenant(TenantId::new(3))
            .table("wp_3_posts");
        assert_eq!(
            ctx.to_string(),
            "subset query failed for table 'wp_3_posts' (tenant 3)"
        );
    }

    #[test]
    fn context_survives_anyhow_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("boom"))
            .context(StageContext::new(Stage::Artifact).table("wp_posts"))
            .context("export aborted");
        let err = err.unwrap_err();
        let ctx = stage_of(&err).expect("stage context");
        assert_eq!(ctx.stage, Stage::Artifact);
        assert_eq!(ctx.table.as_deref(), Some("wp_posts"));
    }
}
