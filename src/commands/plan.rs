// ABOUTME: Plan command implementation (dry run)
// ABOUTME: Prints table classification and each tenant's subset queue without side effects

use crate::config::ExportConfig;
use crate::export::{plan_export, ExportOptions};
use crate::registry::Registry;
use crate::tenant::{Dependency, ExportPlan};
use anyhow::Result;
use std::fmt::Write;

/// Show what an export would do
///
/// Only reads table names from the source; no shadow table or file is created.
pub async fn plan(source: &str, config: &ExportConfig, options: &ExportOptions) -> Result<()> {
    let registry = super::build_registry(config)?;
    let db = super::open_source(source, config).await?;
    let plan = plan_export(db.as_ref(), &registry, options).await?;

    print!("{}", render_plan(&plan, &registry));
    Ok(())
}

/// Text rendering of a plan, one section per tenant queue
pub fn render_plan(plan: &ExportPlan, registry: &Registry) -> String {
    let mut out = String::new();
    let list = |tables: &[String]| {
        if tables.is_empty() {
            "none".to_string()
        } else {
            tables.join(", ")
        }
    };

    let _ = writeln!(out, "Registry fingerprint: {}", registry.fingerprint());
    let _ = writeln!(out, "Copied verbatim: {}", list(&plan.verbatim));
    let _ = writeln!(out, "Schema only: {}", list(&plan.excluded));
    let _ = writeln!(out, "Skipped by filters: {}", list(&plan.skipped));
    if !plan.stale_shadows.is_empty() {
        let _ = writeln!(
            out,
            "⚠ Leftover shadow tables (run cleanup): {}",
            list(&plan.stale_shadows)
        );
    }

    for queue in &plan.queues {
        let _ = writeln!(out);
        let _ = writeln!(out, "Tenant {} ({} table(s))", queue.tenant, queue.entries.len());
        for entry in &queue.entries {
            let marker = if entry.emit_artifact { "" } else { " [staged only]" };
            let _ = writeln!(
                out,
                "  {:>4}. {} -> {}{}",
                entry.priority, entry.table.raw_name, entry.shadow.name, marker
            );
            for step in &registry.handler(entry.handler).steps {
                let _ = writeln!(out, "        - {}", step.describe());
            }
            for (name, dep) in &entry.dependencies {
                let resolved = match dep {
                    Dependency::Shadow(table) => format!("kept rows in {}", table),
                    Dependency::Source(table) => format!("all rows of {}", table),
                    Dependency::Unavailable(reason) => format!("unavailable ({})", reason),
                };
                let _ = writeln!(out, "        {} => {}", name, resolved);
            }
        }
    }
    out
}
