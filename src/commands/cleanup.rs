// ABOUTME: Cleanup command implementation
// ABOUTME: Drops leftover shadow tables and removes stale export temp directories

use crate::cleanup::{self, CleanupReport};
use crate::config::ExportConfig;
use crate::utils;
use anyhow::{Context, Result};
use std::path::Path;

/// Remove everything interrupted exports left behind
///
/// # Arguments
///
/// * `source` - PostgreSQL URL or SQLite file path
/// * `config` - Configuration (only the tenant setting is used)
/// * `work_dir` - Parent directory of managed temp dirs; platform temp dir when `None`
/// * `max_age_secs` - Only temp directories older than this are removed
/// * `json` - Print the report as JSON
pub async fn cleanup(
    source: &str,
    config: &ExportConfig,
    work_dir: Option<&Path>,
    max_age_secs: u64,
    json: bool,
) -> Result<()> {
    let db = super::open_source(source, config).await?;
    let mut report = cleanup::sweep_stale_shadows(db.as_ref()).await?;

    report.temp_dirs_removed += match work_dir {
        Some(dir) => utils::cleanup_stale_temp_dirs_in(dir, max_age_secs)?,
        None => utils::cleanup_stale_temp_dirs(max_age_secs)?,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize cleanup report")?
        );
    } else {
        print_report(&report);
    }

    if !report.is_clean() {
        anyhow::bail!(
            "{} shadow table(s) could not be dropped",
            report.shadows_failed
        );
    }
    Ok(())
}

fn print_report(report: &CleanupReport) {
    println!("Shadow tables dropped: {}", report.shadows_dropped);
    println!("Temp directories removed: {}", report.temp_dirs_removed);
    if report.shadows_failed > 0 {
        println!("⚠ Shadow tables that could not be dropped: {}", report.shadows_failed);
    } else {
        println!("✓ Cleanup complete");
    }
}
