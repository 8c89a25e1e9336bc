// ABOUTME: Table handler registry built from independent policy modules
// ABOUTME: Assigns execution priorities and resolves subset handlers by id

use crate::rules::SubsetHandler;
use crate::utils;
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Index of a subset handler in the registry's lookup table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HandlerId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Data copied verbatim
    Copy,
    /// Schema exported, no data
    Excluded,
    /// Data reduced by the referenced handler
    Subset(HandlerId),
}

impl PolicyKind {
    pub fn label(&self) -> &'static str {
        match self {
            PolicyKind::Copy => "copy",
            PolicyKind::Excluded => "excluded",
            PolicyKind::Subset(_) => "subset",
        }
    }
}

/// Handling policy for one logical table
///
/// `priority` is the sequence number of the first registration for this name.
/// Every table a subset handler depends on must carry a lower priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePolicy {
    pub name: String,
    pub kind: PolicyKind,
    pub priority: u32,
}

/// What a module asks for when it registers a table
#[derive(Debug, Clone)]
pub enum Policy {
    Copy,
    Excluded,
    Subset(SubsetHandler),
}

/// An extension contributing table policies
///
/// Modules run in ascending `priority()` order; equal priorities keep the
/// order the modules were added in.
pub trait PolicyModule {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        10
    }

    fn register(&self, registrar: &mut Registrar) -> Result<()>;

    /// Adjust the set of logical tables shared by every tenant
    fn filter_global_tables(&self, _global_tables: &mut BTreeSet<String>) {}
}

/// Registration surface handed to each module during the build phase
#[derive(Debug, Default)]
pub struct Registrar {
    policies: BTreeMap<String, TablePolicy>,
    handlers: Vec<SubsetHandler>,
    next_sequence: u32,
    current_module: String,
}

impl Registrar {
    /// Register a policy for a logical table
    ///
    /// A later registration for the same name replaces the policy but keeps the
    /// priority assigned at first insertion.
    pub fn register(&mut self, table: &str, policy: Policy) -> Result<()> {
        utils::validate_identifier(table)
            .with_context(|| format!("Invalid table name registered by '{}'", self.current_module))?;

        let kind = match policy {
            Policy::Copy => PolicyKind::Copy,
            Policy::Excluded => PolicyKind::Excluded,
            Policy::Subset(handler) => {
                handler.validate().with_context(|| {
                    format!(
                        "Invalid subset handler for '{}' registered by '{}'",
                        table, self.current_module
                    )
                })?;
                let id = HandlerId(self.handlers.len());
                self.handlers.push(handler);
                PolicyKind::Subset(id)
            }
        };

        self.next_sequence += 1;
        let sequence = self.next_sequence;

        match self.policies.get_mut(table) {
            Some(existing) => {
                tracing::warn!(
                    "⚠ Registration conflict for '{}': module '{}' replaces {} policy with {} (priority stays {})",
                    table,
                    self.current_module,
                    existing.kind.label(),
                    kind.label(),
                    existing.priority
                );
                existing.kind = kind;
            }
            None => {
                self.policies.insert(
                    table.to_string(),
                    TablePolicy {
                        name: table.to_string(),
                        kind,
                        priority: sequence,
                    },
                );
            }
        }

        Ok(())
    }

    pub fn copy(&mut self, table: &str) -> Result<()> {
        self.register(table, Policy::Copy)
    }

    pub fn exclude(&mut self, table: &str) -> Result<()> {
        self.register(table, Policy::Excluded)
    }

    pub fn subset(&mut self, table: &str, handler: SubsetHandler) -> Result<()> {
        self.register(table, Policy::Subset(handler))
    }
}

/// Collects policy modules and runs them once to produce a [`Registry`]
#[derive(Default)]
pub struct RegistryBuilder {
    modules: Vec<Box<dyn PolicyModule>>,
    global_tables: BTreeSet<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_tables
            .extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn module(mut self, module: impl PolicyModule + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn boxed_module(mut self, module: Box<dyn PolicyModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Run every module in priority order and freeze the result
    ///
    /// A module error aborts the build; there is no partial registry.
    pub fn build(self) -> Result<Registry> {
        let mut modules = self.modules;
        // Stable sort keeps insertion order among equal priorities
        modules.sort_by_key(|m| m.priority());

        let mut registrar = Registrar::default();
        let mut global_tables = self.global_tables;

        for module in &modules {
            registrar.current_module = module.name().to_string();
            tracing::debug!(
                "Registering table policies from module '{}' (priority {})",
                module.name(),
                module.priority()
            );
            module
                .register(&mut registrar)
                .with_context(|| format!("Policy module '{}' failed to register", module.name()))?;
            module.filter_global_tables(&mut global_tables);
        }

        Ok(Registry {
            policies: registrar.policies,
            handlers: registrar.handlers,
            global_tables,
        })
    }
}

/// Immutable table policies for one export run
#[derive(Debug, Clone, Default)]
pub struct Registry {
    policies: BTreeMap<String, TablePolicy>,
    handlers: Vec<SubsetHandler>,
    global_tables: BTreeSet<String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn policy(&self, logical: &str) -> Option<&TablePolicy> {
        self.policies.get(logical)
    }

    pub fn handler(&self, id: HandlerId) -> &SubsetHandler {
        &self.handlers[id.0]
    }

    pub fn global_tables(&self) -> &BTreeSet<String> {
        &self.global_tables
    }

    pub fn is_global(&self, logical: &str) -> bool {
        self.global_tables.contains(logical)
    }

    /// Policies in ascending priority order
    pub fn policies(&self) -> Vec<&TablePolicy> {
        let mut policies: Vec<&TablePolicy> = self.policies.values().collect();
        policies.sort_by_key(|p| p.priority);
        policies
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Stable digest of every policy, handler and global table
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for policy in self.policies() {
            hasher.update(policy.name.as_bytes());
            hasher.update(b"=");
            hasher.update(policy.kind.label().as_bytes());
            hasher.update(policy.priority.to_be_bytes());
            if let PolicyKind::Subset(id) = policy.kind {
                for step in &self.handler(id).steps {
                    hasher.update(step.describe().as_bytes());
                    hasher.update(b";");
                }
            }
            hasher.update(b"|");
        }
        hasher.update(b"#global");
        for table in &self.global_tables {
            hasher.update(table.as_bytes());
            hasher.update(b"|");
        }
        format!("{:x}", hasher.finalize())
    }
}
