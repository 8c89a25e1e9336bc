// ABOUTME: Export entry point wiring discovery, partitioning, subsetting and assembly
// ABOUTME: Guarantees a single cleanup pass after every run, successful or not

use crate::assembly::{Assembler, ExportArtifact, OutputTarget};
use crate::cleanup::{self, CleanupReport};
use crate::database::SourceDatabase;
use crate::error::{Stage, StageContext};
use crate::filters::ExportFilter;
use crate::registry::Registry;
use crate::subset::{EntryOutcome, Materializer, DEFAULT_MAX_CLOSURE_ITERATIONS};
use crate::tenant::{self, ExportPlan, TenantId};
use crate::utils;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Knobs for one export run
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Shared table prefix of the tenant naming convention
    pub prefix: String,
    pub filter: ExportFilter,
    /// Parent of the run's managed temp directory; platform temp dir when unset
    pub work_dir: Option<PathBuf>,
    pub max_closure_iterations: u32,
    pub show_progress: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            filter: ExportFilter::empty(),
            work_dir: None,
            max_closure_iterations: DEFAULT_MAX_CLOSURE_ITERATIONS,
            show_progress: false,
        }
    }
}

/// What a successful export produced
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub output: String,
    pub bytes: u64,
    pub tenants: Vec<TenantId>,
    pub verbatim_tables: Vec<String>,
    pub excluded_tables: Vec<String>,
    pub skipped_tables: Vec<String>,
    pub subset_tables: Vec<String>,
    /// Subset tables exported whole because they could not be subset
    pub copied_whole: Vec<String>,
    pub registry_fingerprint: String,
    pub cleanup: CleanupReport,
}

/// Discover tables and build the run's plan without touching anything
pub async fn plan_export<D>(db: &D, registry: &Registry, options: &ExportOptions) -> Result<ExportPlan>
where
    D: SourceDatabase + ?Sized,
{
    let tables = db
        .list_base_tables()
        .await
        .with_context(|| StageContext::new(Stage::Discovery))?;
    tracing::info!("Discovered {} table(s)", tables.len());

    let plan = tenant::partition(&tables, registry, &options.prefix, &options.filter)?;
    tracing::info!(
        "Planned {} tenant pass(es) producing {} data artifact(s)",
        plan.queues.len(),
        plan.data_artifact_count()
    );
    if !plan.stale_shadows.is_empty() {
        tracing::warn!(
            "⚠ Found {} leftover shadow table(s) from an earlier run; they are left out of the export. \
             Run the cleanup command to remove them.",
            plan.stale_shadows.len()
        );
    }
    Ok(plan)
}

/// Produce a subset export of `db` into `target`
///
/// Shadow tables and temporary files are cleaned up exactly once before this
/// returns, whatever the outcome. On failure the error carries a
/// [`StageContext`] naming the stage, tenant and table.
pub async fn export_database<D>(
    db: &D,
    registry: &Registry,
    target: &OutputTarget,
    options: &ExportOptions,
) -> Result<ExportSummary>
where
    D: SourceDatabase + ?Sized,
{
    let plan = plan_export(db, registry, options).await?;
    let work_dir = utils::create_managed_temp_dir(options.work_dir.as_deref())
        .with_context(|| StageContext::new(Stage::Artifact))?;

    let result = run_pipeline(db, registry, &plan, target, &work_dir, options).await;

    let report = cleanup::cleanup_run(db, &plan.shadow_tables(), Some(&work_dir)).await;
    if !report.is_clean() {
        tracing::warn!(
            "⚠ {} shadow table(s) could not be dropped; run the cleanup command",
            report.shadows_failed
        );
    }

    let mut summary = result?;
    summary.cleanup = report;
    summary.registry_fingerprint = registry.fingerprint();
    tracing::info!(
        "✓ Export written to {} ({} bytes)",
        summary.output,
        summary.bytes
    );
    Ok(summary)
}

async fn run_pipeline<D>(
    db: &D,
    registry: &Registry,
    plan: &ExportPlan,
    target: &OutputTarget,
    work_dir: &Path,
    options: &ExportOptions,
) -> Result<ExportSummary>
where
    D: SourceDatabase + ?Sized,
{
    // Leftovers under a planned name would leak stale rows into the merge
    for shadow in plan.shadow_tables() {
        db.drop_table(&shadow)
            .await
            .with_context(|| StageContext::new(Stage::Subset).table(shadow.clone()))?;
    }

    let progress = progress_bar(plan, options.show_progress);
    let mut materializer = Materializer::new(db, registry, work_dir)
        .max_closure_iterations(options.max_closure_iterations)
        .progress(progress.clone());
    let mut assembler = Assembler::new(target)?;

    let structure = materializer.artifact_path("structure");
    db.dump_structure(&plan.structure_exclusions(), &structure)
        .await
        .with_context(|| StageContext::new(Stage::Artifact).table("structure"))?;
    assembler.append(&ExportArtifact::new(structure, "structure"))?;

    for table in &plan.verbatim {
        progress.set_message(format!("copy {}", table));
        let artifact = materializer.dump_verbatim(table).await?;
        assembler.append(&artifact)?;
        progress.inc(1);
    }

    let mut subset_tables = BTreeSet::new();
    let mut copied_whole = BTreeSet::new();
    for queue in &plan.queues {
        let outcomes = materializer.run_queue(queue, &mut assembler).await?;
        for ((table, outcome), entry) in outcomes.into_iter().zip(&queue.entries) {
            if !entry.emit_artifact {
                continue;
            }
            match outcome {
                EntryOutcome::Subset { .. } => subset_tables.insert(table),
                EntryOutcome::CopiedWhole => copied_whole.insert(table),
            };
        }
    }
    progress.finish_and_clear();

    let artifacts = assembler.artifacts();
    let bytes = assembler.finish()?;
    tracing::debug!("Assembled {} artifact(s)", artifacts);

    Ok(ExportSummary {
        output: target.describe(),
        bytes,
        tenants: plan.tenants(),
        verbatim_tables: plan.verbatim.clone(),
        excluded_tables: plan.excluded.clone(),
        skipped_tables: plan.skipped.clone(),
        subset_tables: subset_tables.into_iter().collect(),
        copied_whole: copied_whole.into_iter().collect(),
        registry_fingerprint: String::new(),
        cleanup: CleanupReport::default(),
    })
}

fn progress_bar(plan: &ExportPlan, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let total = plan.verbatim.len() + plan.queues.iter().map(|q| q.entries.len()).sum::<usize>();
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>5}/{len:5} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    bar.set_style(style);
    bar
}
