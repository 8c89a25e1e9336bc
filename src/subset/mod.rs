// ABOUTME: Dependency-ordered subset materializer for tenant work queues
// ABOUTME: Populates shadow tables step by step and hands their dumps to the assembler

pub mod closure;

pub use closure::{close_hierarchy, ClosureReport};

use crate::assembly::{ArtifactSink, ExportArtifact};
use crate::database::SourceDatabase;
use crate::error::{Stage, StageContext};
use crate::probe::{self, TableColumns};
use crate::registry::Registry;
use crate::rules::SubsetStep;
use crate::tenant::{Dependency, QueueEntry, TenantId, WorkQueue};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default cap on ancestor closure passes
pub const DEFAULT_MAX_CLOSURE_ITERATIONS: u32 = 1000;

/// What happened to one queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Shadow populated with `rows` rows
    Subset { rows: u64 },
    /// Probe failed or no primary key; the whole source table is kept
    CopiedWhole,
}

/// Runs tenant queues against one database connection
pub struct Materializer<'a, D: SourceDatabase + ?Sized> {
    db: &'a D,
    registry: &'a Registry,
    work_dir: &'a Path,
    max_closure_iterations: u32,
    progress: ProgressBar,
    next_artifact: usize,
}

impl<'a, D: SourceDatabase + ?Sized> Materializer<'a, D> {
    pub fn new(db: &'a D, registry: &'a Registry, work_dir: &'a Path) -> Self {
        Self {
            db,
            registry,
            work_dir,
            max_closure_iterations: DEFAULT_MAX_CLOSURE_ITERATIONS,
            progress: ProgressBar::hidden(),
            next_artifact: 0,
        }
    }

    pub fn max_closure_iterations(mut self, max: u32) -> Self {
        self.max_closure_iterations = max.max(1);
        self
    }

    pub fn progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Path for the next artifact in the work directory
    pub fn artifact_path(&mut self, table: &str) -> PathBuf {
        self.next_artifact += 1;
        self.work_dir
            .join(format!("{:05}-{}.sql", self.next_artifact, table))
    }

    /// Dump a table's rows as they are, with no rewrite
    pub async fn dump_verbatim(&mut self, table: &str) -> Result<ExportArtifact> {
        let path = self.artifact_path(table);
        self.db
            .dump_table_data(table, &path)
            .await
            .with_context(|| StageContext::new(Stage::Artifact).table(table))?;
        Ok(ExportArtifact::new(path, table))
    }

    /// Run one tenant's queue inside that tenant's context
    ///
    /// The previous context is restored whether the queue succeeds or fails.
    /// A failed restore is reported only when the queue itself succeeded.
    pub async fn run_queue(
        &mut self,
        queue: &WorkQueue,
        sink: &mut dyn ArtifactSink,
    ) -> Result<Vec<(String, EntryOutcome)>> {
        let tenant = queue.tenant;
        let switch_context = || StageContext::new(Stage::TenantSwitch).tenant(tenant);

        let previous = self.db.tenant_context().await.with_context(switch_context)?;
        self.db
            .set_tenant_context(Some(tenant))
            .await
            .with_context(switch_context)?;
        tracing::info!(
            "Processing tenant {} ({} subset table(s))",
            tenant,
            queue.entries.len()
        );

        let result = self.process_entries(queue, sink).await;

        let restored = self
            .db
            .set_tenant_context(previous)
            .await
            .with_context(switch_context);

        match (result, restored) {
            (Ok(outcomes), Ok(())) => Ok(outcomes),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => {
                tracing::warn!(
                    "⚠ Failed to restore tenant context after tenant {}: {:#}",
                    tenant,
                    restore
                );
                Err(e)
            }
        }
    }

    async fn process_entries(
        &mut self,
        queue: &WorkQueue,
        sink: &mut dyn ArtifactSink,
    ) -> Result<Vec<(String, EntryOutcome)>> {
        // Shadows that were never built because their table is copied whole
        let mut copied_whole: BTreeMap<String, String> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(queue.entries.len());

        for entry in &queue.entries {
            let source = entry.table.raw_name.as_str();
            self.progress
                .set_message(format!("tenant {}: {}", queue.tenant, source));

            let outcome = self
                .materialize(queue.tenant, entry, &copied_whole, sink)
                .await?;
            if outcome == EntryOutcome::CopiedWhole {
                copied_whole.insert(entry.shadow.name.clone(), source.to_string());
            }
            outcomes.push((source.to_string(), outcome));
            self.progress.inc(1);
        }

        Ok(outcomes)
    }

    /// Populate one entry's shadow table and emit its artifact when due
    pub async fn materialize(
        &mut self,
        tenant: TenantId,
        entry: &QueueEntry,
        copied_whole: &BTreeMap<String, String>,
        sink: &mut dyn ArtifactSink,
    ) -> Result<EntryOutcome> {
        let source = entry.table.raw_name.as_str();
        let shadow = entry.shadow.name.as_str();
        let subset_context = || StageContext::new(Stage::Subset).tenant(tenant).table(source);

        let columns = match probe::probe_table(self.db, tenant, source).await {
            Ok(columns) if columns.has_primary_key() => columns,
            Ok(_) => {
                tracing::warn!(
                    "⚠ '{}' has no primary key; copying it whole instead of subsetting",
                    source
                );
                return self.copy_whole(entry, sink).await;
            }
            Err(e) => {
                tracing::warn!(
                    "⚠ Could not probe '{}', copying it whole instead of subsetting: {:#}",
                    source,
                    e
                );
                return self.copy_whole(entry, sink).await;
            }
        };

        self.db
            .create_shadow_table(source, shadow)
            .await
            .with_context(subset_context)?;

        let tables = resolve_tables(entry, copied_whole);
        let registry = self.registry;
        let handler = registry.handler(entry.handler);

        // Rewrites run once, after every insert, in the pass that dumps the shadow
        let (inserts, rewrites): (Vec<_>, Vec<_>) = handler
            .steps
            .iter()
            .enumerate()
            .partition(|(_, step)| !matches!(step, SubsetStep::Replace { .. }));
        let rewrites = if entry.emit_artifact {
            rewrites
        } else {
            if !rewrites.is_empty() {
                tracing::debug!(
                    "Deferring {} rewrite step(s) for global table '{}' past tenant {}",
                    rewrites.len(),
                    source,
                    tenant
                );
            }
            Vec::new()
        };

        for (index, step) in inserts.into_iter().chain(rewrites) {
            if let Some(reason) = unavailable_dependency(entry, step) {
                tracing::warn!(
                    "⚠ Skipping step {} ({}) for '{}': {}",
                    index + 1,
                    step.describe(),
                    source,
                    reason
                );
                continue;
            }

            let affected = self
                .apply_step(step, source, shadow, &columns, &tables)
                .await
                .with_context(|| format!("Step {} ({}) failed", index + 1, step.describe()))
                .with_context(subset_context)?;
            tracing::debug!(
                "'{}' step {} ({}) affected {} row(s)",
                source,
                index + 1,
                step.describe(),
                affected
            );
        }

        let rows = self
            .db
            .count_rows(shadow)
            .await
            .with_context(subset_context)?;

        if entry.emit_artifact {
            let path = self.artifact_path(source);
            self.db
                .dump_subset_data(shadow, source, &path)
                .await
                .with_context(|| StageContext::new(Stage::Artifact).tenant(tenant).table(source))?;
            let artifact = ExportArtifact::new(path, source)
                .with_rewrite(self.db.dump_identifier(shadow), self.db.dump_identifier(source));
            sink.accept(artifact)?;
            tracing::info!("✓ Subset '{}': kept {} row(s)", source, rows);
        } else {
            tracing::debug!(
                "Global table '{}' holds {} row(s) after tenant {}",
                source,
                rows,
                tenant
            );
        }

        Ok(EntryOutcome::Subset { rows })
    }

    async fn apply_step(
        &self,
        step: &SubsetStep,
        source: &str,
        shadow: &str,
        columns: &TableColumns,
        tables: &BTreeMap<String, String>,
    ) -> Result<u64> {
        let dialect = self.db.dialect();
        match step {
            SubsetStep::Ancestors {
                parent_column,
                key_column,
            } => {
                let report = close_hierarchy(
                    self.db,
                    columns,
                    source,
                    shadow,
                    parent_column,
                    key_column,
                    self.max_closure_iterations,
                )
                .await?;
                Ok(report.rows_added)
            }
            SubsetStep::Replace { from, to } => {
                match dialect.replace_text(shadow, columns, from, to) {
                    Some(sql) => self.db.execute(&sql).await,
                    None => {
                        tracing::debug!("'{}' has no text columns to rewrite", source);
                        Ok(0)
                    }
                }
            }
            _ => match step.render_select(source, tables)? {
                Some(select) => {
                    let sql = dialect.merge_insert(shadow, columns, &select);
                    self.db.execute(&sql).await
                }
                None => Ok(0),
            },
        }
    }

    async fn copy_whole(
        &mut self,
        entry: &QueueEntry,
        sink: &mut dyn ArtifactSink,
    ) -> Result<EntryOutcome> {
        if entry.emit_artifact {
            let artifact = self.dump_verbatim(&entry.table.raw_name).await?;
            sink.accept(artifact)?;
        }
        Ok(EntryOutcome::CopiedWhole)
    }
}

/// Dependency tables for an entry, pointing copied-whole shadows back at their source
fn resolve_tables(
    entry: &QueueEntry,
    copied_whole: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    entry
        .resolved_tables()
        .into_iter()
        .map(|(name, table)| match copied_whole.get(&table) {
            Some(source) => (name, source.clone()),
            None => (name, table),
        })
        .collect()
}

fn unavailable_dependency(entry: &QueueEntry, step: &SubsetStep) -> Option<String> {
    step.dependencies()
        .iter()
        .find_map(|dep| match entry.dependencies.get(dep) {
            Some(Dependency::Unavailable(reason)) => Some(reason.clone()),
            Some(_) => None,
            None => Some(format!("dependency '{}' was not planned", dep)),
        })
}
