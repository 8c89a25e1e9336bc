// ABOUTME: Export command implementation
// ABOUTME: Confirms overwrites, runs the subset export and reports what was written

use crate::assembly::OutputTarget;
use crate::config::ExportConfig;
use crate::export::{export_database, ExportOptions, ExportSummary};
use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::io::{self, Write};

/// Run a subset export of `source` into `output`
///
/// # Arguments
///
/// * `source` - PostgreSQL URL or SQLite file path
/// * `config` - Parsed configuration providing presets, modules and naming
/// * `output` - Destination file, or standard output
/// * `options` - Prefix, filters and limits for this run
/// * `skip_confirmation` - Overwrite an existing output file without asking
/// * `json` - Print the summary as JSON instead of text
pub async fn export(
    source: &str,
    config: &ExportConfig,
    output: &OutputTarget,
    options: &ExportOptions,
    skip_confirmation: bool,
    json: bool,
) -> Result<()> {
    if json && *output == OutputTarget::Stdout {
        bail!("--json cannot be combined with --output -: both would write to standard output");
    }

    if let OutputTarget::File(path) = output {
        if path.exists() && !skip_confirmation {
            let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("{} already exists. Overwrite it?", path.display()))
                .default(false)
                .interact()
                .context("Failed to get confirmation")?;
            if !confirmed {
                tracing::warn!("⚠ User cancelled operation");
                bail!("Export cancelled by user");
            }
        }
    }

    let registry = super::build_registry(config)?;
    let db = super::open_source(source, config).await?;

    tracing::info!("Exporting to {}", output.describe());
    let summary = export_database(db.as_ref(), &registry, output, options).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize export summary")?
        );
        return Ok(());
    }

    // Keep stdout clean when the export itself went there
    match output {
        OutputTarget::Stdout => write_summary(&mut io::stderr().lock(), &summary),
        OutputTarget::File(_) => write_summary(&mut io::stdout().lock(), &summary),
    }
}

fn write_list(out: &mut dyn Write, label: &str, tables: &[String]) -> io::Result<()> {
    if tables.is_empty() {
        writeln!(out, "{}: none", label)
    } else {
        writeln!(out, "{} ({}): {}", label, tables.len(), tables.join(", "))
    }
}

/// Human-readable export summary
pub fn write_summary(out: &mut dyn Write, summary: &ExportSummary) -> Result<()> {
    let tenants: Vec<String> = summary.tenants.iter().map(|t| t.to_string()).collect();

    writeln!(out)?;
    writeln!(out, "========================================")?;
    writeln!(out, "Export Summary")?;
    writeln!(out, "========================================")?;
    writeln!(out, "Output: {} ({} bytes)", summary.output, summary.bytes)?;
    writeln!(out, "Tenants: {}", tenants.join(", "))?;
    write_list(out, "Subset tables", &summary.subset_tables)?;
    write_list(out, "Copied whole (could not subset)", &summary.copied_whole)?;
    write_list(out, "Copied verbatim", &summary.verbatim_tables)?;
    write_list(out, "Schema only", &summary.excluded_tables)?;
    write_list(out, "Skipped by filters", &summary.skipped_tables)?;
    writeln!(out, "Registry fingerprint: {}", summary.registry_fingerprint)?;
    if !summary.cleanup.is_clean() {
        writeln!(
            out,
            "⚠ {} shadow table(s) could not be dropped; run the cleanup command",
            summary.cleanup.shadows_failed
        )?;
    }
    writeln!(out, "========================================")?;
    Ok(())
}
