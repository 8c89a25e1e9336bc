// ABOUTME: Tenant partitioner turning discovered tables into ordered work queues
// ABOUTME: Resolves subset dependencies per tenant and replicates global entries

use super::{PhysicalTable, TableNaming, TenantId};
use crate::filters::ExportFilter;
use crate::registry::{HandlerId, PolicyKind, Registry, TablePolicy};
use crate::shadow::{self, ShadowTable};
use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Where a subset step finds the kept rows of a table it depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Rows kept by an earlier subset entry
    Shadow(String),
    /// Table copied whole, so every source row is kept
    Source(String),
    /// Nothing is kept for this table in the current tenant
    Unavailable(String),
}

impl Dependency {
    pub fn table(&self) -> Option<&str> {
        match self {
            Dependency::Shadow(table) | Dependency::Source(table) => Some(table),
            Dependency::Unavailable(_) => None,
        }
    }
}

/// One subset table scheduled inside a tenant's queue
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub table: PhysicalTable,
    pub priority: u32,
    pub handler: HandlerId,
    pub shadow: ShadowTable,
    pub dependencies: BTreeMap<String, Dependency>,
    /// Global entries run in every tenant but are dumped only once, in the last pass
    pub emit_artifact: bool,
}

impl QueueEntry {
    /// Logical name → table holding its kept rows, for the dependencies that have one
    pub fn resolved_tables(&self) -> BTreeMap<String, String> {
        self.dependencies
            .iter()
            .filter_map(|(name, dep)| dep.table().map(|t| (name.clone(), t.to_string())))
            .collect()
    }
}

/// Subset entries of one tenant in ascending priority
#[derive(Debug, Clone)]
pub struct WorkQueue {
    pub tenant: TenantId,
    pub entries: Vec<QueueEntry>,
}

/// Everything an export run will do, decided before any side effect
#[derive(Debug, Clone, Default)]
pub struct ExportPlan {
    /// Data copied whole
    pub verbatim: Vec<String>,
    /// Schema only
    pub excluded: Vec<String>,
    /// Filtered out: neither schema nor data
    pub skipped: Vec<String>,
    /// Shadow tables left behind by an earlier run
    pub stale_shadows: Vec<String>,
    /// Per-tenant subset work in execution order (descending tenant id)
    pub queues: Vec<WorkQueue>,
}

impl ExportPlan {
    /// Every shadow table this plan can create
    pub fn shadow_tables(&self) -> BTreeSet<String> {
        self.queues
            .iter()
            .flat_map(|q| q.entries.iter().map(|e| e.shadow.name.clone()))
            .collect()
    }

    /// Tables kept out of the structure dump
    pub fn structure_exclusions(&self) -> Vec<String> {
        let mut excluded: BTreeSet<String> = self.skipped.iter().cloned().collect();
        excluded.extend(self.stale_shadows.iter().cloned());
        excluded.extend(self.shadow_tables());
        excluded.into_iter().collect()
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.queues.iter().map(|q| q.tenant).collect()
    }

    /// Number of data artifacts the run will produce
    pub fn data_artifact_count(&self) -> usize {
        self.verbatim.len()
            + self
                .queues
                .iter()
                .flat_map(|q| &q.entries)
                .filter(|e| e.emit_artifact)
                .count()
    }
}

/// Classify every physical table and build the per-tenant work queues
///
/// Tenants run in descending id so the primary tenant goes last. Global subset
/// entries are replicated into every queue at their own priority.
pub fn partition(
    tables: &[String],
    registry: &Registry,
    prefix: &str,
    filter: &ExportFilter,
) -> Result<ExportPlan> {
    let naming = TableNaming::new(prefix, registry.global_tables().clone());
    let mut plan = ExportPlan::default();
    let mut tenant_tables: BTreeMap<TenantId, BTreeMap<String, PhysicalTable>> = BTreeMap::new();
    let mut global_tables: BTreeMap<String, PhysicalTable> = BTreeMap::new();

    let mut sorted: Vec<&String> = tables.iter().collect();
    sorted.sort();
    sorted.dedup();

    for raw in sorted {
        if shadow::is_shadow_name(raw) {
            plan.stale_shadows.push(raw.clone());
            continue;
        }
        if !filter.should_export_table(raw) {
            plan.skipped.push(raw.clone());
            continue;
        }
        let Some(table) = naming.classify(raw) else {
            plan.verbatim.push(raw.clone());
            continue;
        };
        if !table.is_global && !filter.should_export_tenant(table.tenant) {
            plan.skipped.push(raw.clone());
            continue;
        }

        match registry.policy(&table.logical_name).map(|p| p.kind) {
            None | Some(PolicyKind::Copy) => plan.verbatim.push(raw.clone()),
            Some(PolicyKind::Excluded) => plan.excluded.push(raw.clone()),
            Some(PolicyKind::Subset(_)) => {}
        }

        if table.is_global {
            global_tables.insert(table.logical_name.clone(), table);
        } else {
            tenant_tables
                .entry(table.tenant)
                .or_default()
                .insert(table.logical_name.clone(), table);
        }
    }

    let mut tenants: BTreeSet<TenantId> = tenant_tables.keys().copied().collect();
    if !global_tables.is_empty() && filter.should_export_tenant(TenantId::PRIMARY) {
        tenants.insert(TenantId::PRIMARY);
    }

    let has_global_subsets = global_tables
        .values()
        .any(|t| subset_policy(registry, t).is_some());
    if tenants.is_empty() && has_global_subsets {
        bail!("No tenants selected for export. Check your tenant filters.");
    }

    let ordered: Vec<TenantId> = tenants.into_iter().rev().collect();
    let empty = BTreeMap::new();
    for (index, tenant) in ordered.iter().copied().enumerate() {
        let is_last = index + 1 == ordered.len();

        let mut visible: BTreeMap<&str, &PhysicalTable> = BTreeMap::new();
        for table in tenant_tables.get(&tenant).unwrap_or(&empty).values() {
            visible.insert(&table.logical_name, table);
        }
        for table in global_tables.values() {
            visible.insert(&table.logical_name, table);
        }

        let mut entries = Vec::new();
        for table in visible.values() {
            let Some((policy, handler)) = subset_policy(registry, table) else {
                continue;
            };

            let mut dependencies = BTreeMap::new();
            for dep in registry.handler(handler).dependencies() {
                let resolved =
                    resolve_dependency(registry, &naming, &visible, table, policy, &dep, tenant)?;
                dependencies.insert(dep, resolved);
            }

            entries.push(QueueEntry {
                table: (*table).clone(),
                priority: policy.priority,
                handler,
                shadow: ShadowTable::for_source(&table.raw_name),
                dependencies,
                emit_artifact: !table.is_global || is_last,
            });
        }
        entries.sort_by_key(|e| e.priority);

        plan.queues.push(WorkQueue { tenant, entries });
    }

    plan.queues.retain(|q| !q.entries.is_empty());

    Ok(plan)
}

fn subset_policy<'a>(
    registry: &'a Registry,
    table: &PhysicalTable,
) -> Option<(&'a TablePolicy, HandlerId)> {
    let policy = registry.policy(&table.logical_name)?;
    match policy.kind {
        PolicyKind::Subset(handler) => Some((policy, handler)),
        _ => None,
    }
}

fn resolve_dependency(
    registry: &Registry,
    naming: &TableNaming,
    visible: &BTreeMap<&str, &PhysicalTable>,
    table: &PhysicalTable,
    policy: &TablePolicy,
    dep: &str,
    tenant: TenantId,
) -> Result<Dependency> {
    if dep == table.logical_name {
        return Ok(Dependency::Shadow(shadow::shadow_name(&table.raw_name)));
    }

    let Some(dep_table) = visible.get(dep) else {
        return Ok(Dependency::Unavailable(format!(
            "'{}' is not exported for tenant {}",
            naming.physical_name(tenant, dep),
            tenant
        )));
    };

    let resolved = match registry.policy(dep) {
        None => Dependency::Source(dep_table.raw_name.clone()),
        Some(dep_policy) => match dep_policy.kind {
            PolicyKind::Copy => Dependency::Source(dep_table.raw_name.clone()),
            PolicyKind::Excluded => {
                Dependency::Unavailable(format!("'{}' is excluded from the export", dep))
            }
            PolicyKind::Subset(_) if dep_policy.priority < policy.priority => {
                Dependency::Shadow(shadow::shadow_name(&dep_table.raw_name))
            }
            PolicyKind::Subset(_) => bail!(
                "Subset for '{}' (priority {}) depends on '{}' (priority {}), which is \
                 materialized later. Register '{}' before '{}'.",
                table.logical_name,
                policy.priority,
                dep,
                dep_policy.priority,
                dep,
                table.logical_name
            ),
        },
    };

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PolicyModule, Registrar};
    use crate::rules::{SubsetHandler, SubsetStep};

    struct Site;

    impl PolicyModule for Site {
        fn name(&self) -> &str {
            "site"
        }

        fn register(&self, r: &mut Registrar) -> Result<()> {
            r.subset(
                "posts",
                SubsetHandler::new(vec![SubsetStep::Recent {
                    order_by: "post_date".into(),
                    limit: 2,
                    filter: None,
                }]),
            )?;
            r.subset(
                "comments",
                SubsetHandler::new(vec![SubsetStep::Related {
                    column: "post_id".into(),
                    parent: "posts".into(),
                    parent_column: "ID".into(),
                    filter: None,
                }]),
            )?;
            r.subset(
                "users",
                SubsetHandler::new(vec![
                    SubsetStep::Related {
                        column: "ID".into(),
                        parent: "posts".into(),
                        parent_column: "post_author".into(),
                        filter: None,
                    },
                    SubsetStep::Related {
                        column: "ID".into(),
                        parent: "comments".into(),
                        parent_column: "user_id".into(),
                        filter: None,
                    },
                ]),
            )?;
            r.exclude("sessions")?;
            r.copy("options")
        }
    }

    fn registry() -> Registry {
        Registry::builder()
            .global_tables(["users"])
            .module(Site)
            .build()
            .unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_tables_by_policy() {
        let tables = names(&[
            "wp_posts",
            "wp_options",
            "wp_sessions",
            "wp_users",
            "audit_log",
            "wp_widgets",
        ]);
        let plan = partition(&tables, &registry(), "wp_", &ExportFilter::empty()).unwrap();

        assert_eq!(plan.verbatim, names(&["audit_log", "wp_options", "wp_widgets"]));
        assert_eq!(plan.excluded, names(&["wp_sessions"]));
        assert_eq!(plan.queues.len(), 1);
        let queue = &plan.queues[0];
        assert_eq!(queue.tenant, TenantId::PRIMARY);
        let order: Vec<&str> = queue
            .entries
            .iter()
            .map(|e| e.table.raw_name.as_str())
            .collect();
        assert_eq!(order, vec!["wp_posts", "wp_users"]);
    }

    #[test]
    fn tenants_run_in_descending_order_with_globals_replicated() {
        let tables = names(&[
            "wp_posts",
            "wp_comments",
            "wp_users",
            "wp_2_posts",
            "wp_2_comments",
            "wp_3_posts",
        ]);
        let plan = partition(&tables, &registry(), "wp_", &ExportFilter::empty()).unwrap();

        assert_eq!(
            plan.tenants(),
            vec![TenantId::new(3), TenantId::new(2), TenantId::PRIMARY]
        );

        for queue in &plan.queues {
            let users = queue
                .entries
                .iter()
                .find(|e| e.table.raw_name == "wp_users")
                .expect("global users entry in every queue");
            assert_eq!(users.emit_artifact, queue.tenant.is_primary());
            assert_eq!(
                users.dependencies["posts"],
                Dependency::Shadow(shadow::shadow_name(&TableNaming::new(
                    "wp_",
                    BTreeSet::new()
                )
                .physical_name(queue.tenant, "posts")))
            );
        }

        // wp_3 has no comments table, so that direction has nothing to match
        let tenant3 = &plan.queues[0];
        let users = tenant3.entries.last().unwrap();
        assert!(matches!(
            users.dependencies["comments"],
            Dependency::Unavailable(_)
        ));

        let shadows = plan.shadow_tables();
        assert!(shadows.contains(&shadow::shadow_name("wp_users")));
        assert!(shadows.contains(&shadow::shadow_name("wp_2_posts")));
        assert_eq!(plan.data_artifact_count(), 6);
    }

    #[test]
    fn entries_are_ordered_by_priority() {
        let tables = names(&["wp_users", "wp_comments", "wp_posts"]);
        let plan = partition(&tables, &registry(), "wp_", &ExportFilter::empty()).unwrap();
        let priorities: Vec<u32> = plan.queues[0].entries.iter().map(|e| e.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        for entry in &plan.queues[0].entries {
            for (dep, resolved) in &entry.dependencies {
                if let Dependency::Shadow(_) = resolved {
                    let dep_priority = registry().policy(dep).unwrap().priority;
                    assert!(dep_priority < entry.priority);
                }
            }
        }
    }

    #[test]
    fn dependency_on_later_table_is_rejected() {
        struct Backwards;
        impl PolicyModule for Backwards {
            fn name(&self) -> &str {
                "backwards"
            }
            fn register(&self, r: &mut Registrar) -> Result<()> {
                r.subset(
                    "comments",
                    SubsetHandler::new(vec![SubsetStep::Related {
                        column: "post_id".into(),
                        parent: "posts".into(),
                        parent_column: "ID".into(),
                        filter: None,
                    }]),
                )?;
                r.subset(
                    "posts",
                    SubsetHandler::new(vec![SubsetStep::Where {
                        predicate: "1 = 1".into(),
                    }]),
                )
            }
        }
        let registry = Registry::builder().module(Backwards).build().unwrap();
        let err = partition(
            &names(&["wp_posts", "wp_comments"]),
            &registry,
            "wp_",
            &ExportFilter::empty(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("materialized later"));
    }

    #[test]
    fn copied_and_excluded_dependencies() {
        struct Deps;
        impl PolicyModule for Deps {
            fn name(&self) -> &str {
                "deps"
            }
            fn register(&self, r: &mut Registrar) -> Result<()> {
                r.exclude("sessions")?;
                r.subset(
                    "postmeta",
                    SubsetHandler::new(vec![
                        SubsetStep::Related {
                            column: "post_id".into(),
                            parent: "posts".into(),
                            parent_column: "ID".into(),
                            filter: None,
                        },
                        SubsetStep::Where {
                            predicate: "meta_key IN (SELECT k FROM {sessions})".into(),
                        },
                    ]),
                )
            }
        }
        let registry = Registry::builder().module(Deps).build().unwrap();
        let plan = partition(
            &names(&["wp_posts", "wp_postmeta", "wp_sessions"]),
            &registry,
            "wp_",
            &ExportFilter::empty(),
        )
        .unwrap();
        let entry = &plan.queues[0].entries[0];
        assert_eq!(
            entry.dependencies["posts"],
            Dependency::Source("wp_posts".into())
        );
        assert!(matches!(
            entry.dependencies["sessions"],
            Dependency::Unavailable(_)
        ));
        assert_eq!(entry.resolved_tables().len(), 1);
    }

    #[test]
    fn filters_skip_tables_and_tenants() {
        let filter = ExportFilter::new(None, Some(vec!["wp_options".into()]), None, Some(vec![2]))
            .unwrap();
        let tables = names(&["wp_posts", "wp_options", "wp_2_posts", "wp_2_options", "wp_users"]);
        let plan = partition(&tables, &registry(), "wp_", &filter).unwrap();

        assert_eq!(plan.skipped, names(&["wp_2_options", "wp_2_posts", "wp_options"]));
        assert_eq!(plan.tenants(), vec![TenantId::PRIMARY]);
        assert!(plan
            .structure_exclusions()
            .contains(&"wp_2_posts".to_string()));
    }

    #[test]
    fn globals_without_any_tenant_fail() {
        let filter = ExportFilter::new(None, None, Some(vec![7]), None).unwrap();
        let err = partition(&names(&["wp_users"]), &registry(), "wp_", &filter).unwrap_err();
        assert!(err.to_string().contains("No tenants selected"));
    }

    #[test]
    fn stale_shadows_are_never_partitioned() {
        let stale = shadow::shadow_name("wp_posts");
        let plan = partition(
            &names(&["wp_posts", stale.as_str()]),
            &registry(),
            "wp_",
            &ExportFilter::empty(),
        )
        .unwrap();
        assert_eq!(plan.stale_shadows, vec![stale.clone()]);
        assert!(!plan.verbatim.contains(&stale));
        assert!(plan.structure_exclusions().contains(&stale));
    }
}
