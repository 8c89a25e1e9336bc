// ABOUTME: Parses export configuration files into a table policy registry
// ABOUTME: Converts TOML presets, naming and per-module table rules into policy modules

use crate::presets;
use crate::registry::{Policy, PolicyModule, Registrar, Registry};
use crate::rules::{SubsetHandler, SubsetStep};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Parsed export configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    /// Built-in modules to load, see [`presets::PRESET_NAMES`]
    #[serde(default)]
    pub presets: Vec<String>,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub max_closure_iterations: Option<u32>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub global_tables: Vec<String>,
    /// PostgreSQL setting carrying the active tenant
    #[serde(default)]
    pub tenant_setting: Option<String>,
}

/// Table rules contributed by one named module
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    #[serde(default = "default_module_priority")]
    pub priority: i32,
    #[serde(default)]
    pub global_tables: Vec<String>,
    #[serde(default)]
    pub not_global: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

fn default_module_priority() -> i32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    Copy,
    Excluded,
    Subset,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub table: String,
    pub policy: PolicyName,
    #[serde(default)]
    pub steps: Vec<SubsetStep>,
}

impl TableConfig {
    fn to_policy(&self) -> Result<Policy> {
        match self.policy {
            PolicyName::Subset => {
                if self.steps.is_empty() {
                    bail!("Table '{}' uses policy 'subset' but defines no steps", self.table);
                }
                Ok(Policy::Subset(SubsetHandler::new(self.steps.clone())))
            }
            PolicyName::Copy | PolicyName::Excluded if !self.steps.is_empty() => bail!(
                "Table '{}' defines steps but its policy is not 'subset'",
                self.table
            ),
            PolicyName::Copy => Ok(Policy::Copy),
            PolicyName::Excluded => Ok(Policy::Excluded),
        }
    }
}

/// A configured module, registered alongside the presets
#[derive(Debug, Clone)]
struct ConfiguredModule {
    name: String,
    config: ModuleConfig,
}

impl PolicyModule for ConfiguredModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    fn register(&self, registrar: &mut Registrar) -> Result<()> {
        for table in &self.config.tables {
            let policy = table.to_policy()?;
            registrar.register(&table.table, policy)?;
        }
        Ok(())
    }

    fn filter_global_tables(&self, global_tables: &mut BTreeSet<String>) {
        global_tables.extend(self.config.global_tables.iter().cloned());
        for table in &self.config.not_global {
            global_tables.remove(table);
        }
    }
}

impl ExportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse TOML config at {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ExportConfig = toml::from_str(raw)?;
        for name in &config.presets {
            if !presets::PRESET_NAMES.contains(&name.as_str()) {
                bail!(
                    "Unknown preset '{}'. Available presets: {}",
                    name,
                    presets::PRESET_NAMES.join(", ")
                );
            }
        }
        if config.max_closure_iterations == Some(0) {
            bail!("max_closure_iterations must be at least 1");
        }
        Ok(config)
    }

    /// Build the registry: presets first, then configured modules by name
    ///
    /// The registry builder's stable priority sort decides the final order,
    /// so ties keep this insertion order.
    pub fn registry(&self) -> Result<Registry> {
        let mut builder = Registry::builder().global_tables(self.naming.global_tables.iter().cloned());
        for name in &self.presets {
            builder = builder.boxed_module(presets::preset(name)?);
        }
        for (name, config) in &self.modules {
            builder = builder.module(ConfiguredModule {
                name: name.clone(),
                config: config.clone(),
            });
        }
        builder.build()
    }
}
