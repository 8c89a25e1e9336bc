// ABOUTME: Best-effort removal of shadow tables and temporary export files
// ABOUTME: Runs once after every export and backs the standalone cleanup command

use crate::database::SourceDatabase;
use crate::shadow;
use crate::utils;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// What a cleanup pass managed to remove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub shadows_dropped: usize,
    pub shadows_failed: usize,
    pub temp_dirs_removed: usize,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.shadows_failed == 0
    }
}

/// Drop every named shadow table and remove the run's work directory
///
/// Shadow names come from the plan, not from what was actually created, so a
/// run that failed halfway still drops everything it might have touched.
/// Drops use `IF EXISTS`. Failures are logged and counted, never returned.
pub async fn cleanup_run<D>(
    db: &D,
    shadows: &BTreeSet<String>,
    work_dir: Option<&Path>,
) -> CleanupReport
where
    D: SourceDatabase + ?Sized,
{
    let mut report = CleanupReport::default();

    for table in shadows {
        if !shadow::is_shadow_name(table) {
            tracing::warn!("⚠ Refusing to drop '{}': not a shadow table", table);
            report.shadows_failed += 1;
            continue;
        }
        match db.drop_table(table).await {
            Ok(()) => report.shadows_dropped += 1,
            Err(e) => {
                tracing::warn!("⚠ Failed to drop shadow table '{}': {:#}", table, e);
                report.shadows_failed += 1;
            }
        }
    }

    if let Some(dir) = work_dir {
        if dir.exists() {
            match utils::remove_managed_temp_dir(dir) {
                Ok(()) => report.temp_dirs_removed += 1,
                Err(e) => tracing::warn!("⚠ {:#}", e),
            }
        }
    }

    tracing::debug!(
        "Cleanup dropped {} shadow table(s), {} failure(s)",
        report.shadows_dropped,
        report.shadows_failed
    );
    report
}

/// Drop shadow tables left behind by runs that never reached their own cleanup
pub async fn sweep_stale_shadows<D>(db: &D) -> Result<CleanupReport>
where
    D: SourceDatabase + ?Sized,
{
    let stale: BTreeSet<String> = db
        .list_base_tables()
        .await?
        .into_iter()
        .filter(|t| shadow::is_shadow_name(t))
        .collect();

    if stale.is_empty() {
        tracing::info!("✓ No leftover shadow tables");
    } else {
        tracing::info!("Dropping {} leftover shadow table(s)", stale.len());
    }

    Ok(cleanup_run(db, &stale, None).await)
}
