// ABOUTME: Built-in policy modules selectable by name from configuration
// ABOUTME: The content preset keeps recent posts and everything that hangs off them

use crate::registry::{PolicyModule, Registrar};
use crate::rules::{SubsetHandler, SubsetStep};
use anyhow::{bail, Result};

/// Names accepted in the `presets` list
pub const PRESET_NAMES: &[&str] = &["content"];

/// Look up a built-in module by name
pub fn preset(name: &str) -> Result<Box<dyn PolicyModule>> {
    match name {
        "content" => Ok(Box::new(ContentPreset)),
        other => bail!(
            "Unknown preset '{}'. Available presets: {}",
            other,
            PRESET_NAMES.join(", ")
        ),
    }
}

/// Rules for a CMS-style schema of posts, comments, users and taxonomy links
///
/// Registration order is dependency order: every table a rule reads kept rows
/// from is registered before it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentPreset;

impl ContentPreset {
    /// Newest posts per window
    pub const RECENT_POSTS: u64 = 50;
    /// Unattached media is loosely coupled, so it gets a wider window
    pub const RECENT_UNATTACHED: u64 = 200;
}

fn related(column: &str, parent: &str, parent_column: &str) -> SubsetStep {
    SubsetStep::Related {
        column: column.into(),
        parent: parent.into(),
        parent_column: parent_column.into(),
        filter: None,
    }
}

impl PolicyModule for ContentPreset {
    fn name(&self) -> &str {
        "content"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn register(&self, r: &mut Registrar) -> Result<()> {
        r.subset(
            "posts",
            SubsetHandler::new(vec![
                SubsetStep::Recent {
                    order_by: "post_date".into(),
                    limit: Self::RECENT_POSTS,
                    filter: Some("post_type <> 'attachment' AND post_type <> 'revision'".into()),
                },
                SubsetStep::Recent {
                    order_by: "post_date".into(),
                    limit: Self::RECENT_UNATTACHED,
                    filter: Some("post_type = 'attachment' AND post_parent = 0".into()),
                },
                // Media attached to kept posts
                SubsetStep::Related {
                    column: "post_parent".into(),
                    parent: "posts".into(),
                    parent_column: "ID".into(),
                    filter: Some("post_type = 'attachment'".into()),
                },
                SubsetStep::Ancestors {
                    parent_column: "post_parent".into(),
                    key_column: "ID".into(),
                },
            ]),
        )?;
        r.subset(
            "postmeta",
            SubsetHandler::new(vec![related("post_id", "posts", "ID")]),
        )?;
        r.subset(
            "comments",
            SubsetHandler::new(vec![related("comment_post_ID", "posts", "ID")]),
        )?;
        r.subset(
            "commentmeta",
            SubsetHandler::new(vec![related("comment_id", "comments", "comment_ID")]),
        )?;
        r.subset(
            "term_relationships",
            SubsetHandler::new(vec![related("object_id", "posts", "ID")]),
        )?;
        // Authors of kept posts and of kept comments
        r.subset(
            "users",
            SubsetHandler::new(vec![
                related("ID", "posts", "post_author"),
                related("ID", "comments", "user_id"),
            ]),
        )?;
        r.subset(
            "usermeta",
            SubsetHandler::new(vec![related("user_id", "users", "ID")]),
        )?;
        r.exclude("sessions")?;
        Ok(())
    }

    fn filter_global_tables(&self, global_tables: &mut std::collections::BTreeSet<String>) {
        global_tables.insert("users".to_string());
        global_tables.insert("usermeta".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PolicyKind, Registry};

    #[test]
    fn unknown_presets_are_rejected() {
        assert!(preset("content").is_ok());
        let err = preset("shop").err().unwrap();
        assert!(err.to_string().contains("Available presets: content"));
    }

    #[test]
    fn content_dependencies_come_first() {
        let registry = Registry::builder()
            .boxed_module(preset("content").unwrap())
            .build()
            .unwrap();

        for policy in registry.policies() {
            let PolicyKind::Subset(id) = policy.kind else {
                continue;
            };
            for dep in registry.handler(id).dependencies() {
                if dep == policy.name {
                    continue;
                }
                let dep_priority = registry.policy(&dep).unwrap().priority;
                assert!(
                    dep_priority < policy.priority,
                    "{} depends on {} registered later",
                    policy.name,
                    dep
                );
            }
        }
        assert!(registry.is_global("users"));
        assert!(registry.is_global("usermeta"));
        assert_eq!(registry.policy("sessions").unwrap().kind, PolicyKind::Excluded);
    }
}
