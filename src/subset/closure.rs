// ABOUTME: Fixed-point ancestor closure for self-referential tables
// ABOUTME: Pulls missing parents into a shadow table until no rows are added

use crate::database::SourceDatabase;
use crate::probe::TableColumns;
use crate::utils::quote_ident;
use anyhow::{bail, Result};

/// Outcome of one closure run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClosureReport {
    /// Passes that added at least one row
    pub iterations: u32,
    pub rows_added: u64,
}

/// One pass: insert every source row that is the parent of a kept row but not yet kept
pub fn ancestor_select(
    source: &str,
    shadow: &str,
    parent_column: &str,
    key_column: &str,
) -> String {
    let source = quote_ident(source);
    let shadow = quote_ident(shadow);
    let parent = quote_ident(parent_column);
    let key = quote_ident(key_column);
    format!(
        "SELECT * FROM {source} WHERE {key} IN \
         (SELECT {parent} FROM {shadow} WHERE {parent} IS NOT NULL GROUP BY {parent}) \
         AND {key} NOT IN (SELECT {key} FROM {shadow})"
    )
}

/// Run ancestor passes until one adds nothing
///
/// Every pass strictly grows the kept set within a finite source, so the loop
/// ends after at most the hierarchy depth. Hitting `max_iterations` while rows
/// are still being added means the data is not what the rule expects and is an
/// error rather than a silently truncated hierarchy.
pub async fn close_hierarchy<D>(
    db: &D,
    columns: &TableColumns,
    source: &str,
    shadow: &str,
    parent_column: &str,
    key_column: &str,
    max_iterations: u32,
) -> Result<ClosureReport>
where
    D: SourceDatabase + ?Sized,
{
    let insert = db.dialect().merge_insert(
        shadow,
        columns,
        &ancestor_select(source, shadow, parent_column, key_column),
    );

    let mut report = ClosureReport::default();
    loop {
        let added = db.execute(&insert).await?;
        if added == 0 {
            break;
        }
        if report.iterations >= max_iterations {
            bail!(
                "Ancestor closure on '{}' still adding rows after {} passes. \
                 Check that '{}' points at '{}' and the hierarchy has no runaway depth.",
                source,
                max_iterations,
                parent_column,
                key_column
            );
        }
        report.iterations += 1;
        report.rows_added += added;
        tracing::debug!(
            "Ancestor pass {} on '{}' added {} row(s)",
            report.iterations,
            source,
            added
        );
    }

    Ok(report)
}
