// ABOUTME: Subset handler definitions and the SELECT statements they render
// ABOUTME: Steps reference dependency tables by logical name via placeholders

use crate::utils::{self, quote_ident};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One merge-insert (or in-place rewrite) applied to a shadow table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubsetStep {
    /// Newest rows first by `order_by`, capped at `limit`
    Recent {
        order_by: String,
        limit: u64,
        #[serde(default)]
        filter: Option<String>,
    },
    /// Rows whose `column` matches a `parent_column` value already kept for `parent`
    Related {
        column: String,
        parent: String,
        parent_column: String,
        #[serde(default)]
        filter: Option<String>,
    },
    /// Raw predicate; `{table}` placeholders resolve to the kept rows of that table
    Where { predicate: String },
    /// Pull in missing ancestors until every parent pointer resolves
    Ancestors {
        parent_column: String,
        key_column: String,
    },
    /// Search-and-replace across the text columns of the kept rows
    Replace { from: String, to: String },
}

impl SubsetStep {
    /// Logical tables this step reads kept rows from
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        match self {
            SubsetStep::Recent { filter, .. } => {
                if let Some(filter) = filter {
                    deps.extend(placeholders(filter));
                }
            }
            SubsetStep::Related { parent, filter, .. } => {
                deps.insert(parent.clone());
                if let Some(filter) = filter {
                    deps.extend(placeholders(filter));
                }
            }
            SubsetStep::Where { predicate } => deps.extend(placeholders(predicate)),
            SubsetStep::Ancestors { .. } | SubsetStep::Replace { .. } => {}
        }
        deps
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            SubsetStep::Recent {
                order_by, limit, ..
            } => {
                utils::validate_identifier(order_by)?;
                if *limit == 0 {
                    bail!("Recent window on '{}' must keep at least one row", order_by);
                }
            }
            SubsetStep::Related {
                column,
                parent,
                parent_column,
                ..
            } => {
                utils::validate_identifier(column)?;
                utils::validate_identifier(parent)?;
                utils::validate_identifier(parent_column)?;
            }
            SubsetStep::Where { predicate } => {
                if predicate.trim().is_empty() {
                    bail!("Where step predicate cannot be empty");
                }
            }
            SubsetStep::Ancestors {
                parent_column,
                key_column,
            } => {
                utils::validate_identifier(parent_column)?;
                utils::validate_identifier(key_column)?;
            }
            SubsetStep::Replace { from, .. } => {
                if from.is_empty() {
                    bail!("Replace step needs a non-empty search string");
                }
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        match self {
            SubsetStep::Recent {
                order_by,
                limit,
                filter,
            } => match filter {
                Some(filter) => format!("latest {} by {} where {}", limit, order_by, filter),
                None => format!("latest {} by {}", limit, order_by),
            },
            SubsetStep::Related {
                column,
                parent,
                parent_column,
                ..
            } => format!("{} in kept {}.{}", column, parent, parent_column),
            SubsetStep::Where { predicate } => format!("where {}", predicate),
            SubsetStep::Ancestors {
                parent_column,
                key_column,
            } => format!("ancestors via {} -> {}", parent_column, key_column),
            SubsetStep::Replace { from, to } => format!("replace '{}' with '{}'", from, to),
        }
    }

    /// Render the SELECT feeding this step's merge-insert
    ///
    /// `tables` maps each dependency's logical name to the table holding its
    /// kept rows. Returns `None` for steps that don't insert rows.
    pub fn render_select(
        &self,
        source: &str,
        tables: &BTreeMap<String, String>,
    ) -> Result<Option<String>> {
        let source = quote_ident(source);
        let sql = match self {
            SubsetStep::Recent {
                order_by,
                limit,
                filter,
            } => {
                let filter = match filter {
                    Some(filter) => format!(" WHERE {}", expand_placeholders(filter, tables)?),
                    None => String::new(),
                };
                format!(
                    "SELECT * FROM {}{} ORDER BY {} DESC LIMIT {}",
                    source,
                    filter,
                    quote_ident(order_by),
                    limit
                )
            }
            SubsetStep::Related {
                column,
                parent,
                parent_column,
                filter,
            } => {
                let parent_table = tables
                    .get(parent)
                    .with_context(|| format!("Dependency '{}' has no resolved table", parent))?;
                let filter = match filter {
                    Some(filter) => format!(" AND ({})", expand_placeholders(filter, tables)?),
                    None => String::new(),
                };
                format!(
                    "SELECT * FROM {} WHERE {} IN (SELECT {} FROM {} GROUP BY {}){}",
                    source,
                    quote_ident(column),
                    quote_ident(parent_column),
                    quote_ident(parent_table),
                    quote_ident(parent_column),
                    filter
                )
            }
            SubsetStep::Where { predicate } => format!(
                "SELECT * FROM {} WHERE {}",
                source,
                expand_placeholders(predicate, tables)?
            ),
            SubsetStep::Ancestors { .. } | SubsetStep::Replace { .. } => return Ok(None),
        };
        Ok(Some(sql))
    }
}

/// Ordered steps that together decide which rows of a table are kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetHandler {
    pub steps: Vec<SubsetStep>,
}

impl SubsetHandler {
    pub fn new(steps: Vec<SubsetStep>) -> Self {
        Self { steps }
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("Subset handler must define at least one step");
        }
        for (i, step) in self.steps.iter().enumerate() {
            step.validate()
                .with_context(|| format!("Invalid subset step #{}", i + 1))?;
        }
        Ok(())
    }

    pub fn dependencies(&self) -> BTreeSet<String> {
        self.steps.iter().flat_map(|s| s.dependencies()).collect()
    }
}

/// Logical table names referenced as `{name}` in a predicate
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let inner = &after[..close];
                if utils::validate_identifier(inner).is_ok() {
                    names.push(inner.to_string());
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    names
}

/// Replace `{name}` placeholders with the quoted table holding that name's kept rows
///
/// Braces whose contents aren't an identifier are left untouched.
pub fn expand_placeholders(text: &str, tables: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let inner = &after[..close];
        if utils::validate_identifier(inner).is_ok() {
            let table = tables
                .get(inner)
                .with_context(|| format!("Unresolved table placeholder '{{{}}}'", inner))?;
            out.push_str(&quote_ident(table));
        } else {
            out.push_str(&rest[open..open + close + 2]);
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
