// ABOUTME: Central filtering logic for selective exports
// ABOUTME: Handles table and tenant include/exclude lists

use crate::tenant::TenantId;
use anyhow::{bail, Result};

/// Represents export filtering rules
///
/// Tables filtered out are skipped entirely: no schema and no data.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    include_tables: Option<Vec<String>>,
    exclude_tables: Option<Vec<String>>,
    include_tenants: Option<Vec<TenantId>>,
    exclude_tenants: Option<Vec<TenantId>>,
}

impl ExportFilter {
    /// Creates a filter from CLI arguments
    pub fn new(
        include_tables: Option<Vec<String>>,
        exclude_tables: Option<Vec<String>>,
        include_tenants: Option<Vec<u32>>,
        exclude_tenants: Option<Vec<u32>>,
    ) -> Result<Self> {
        if include_tables.is_some() && exclude_tables.is_some() {
            bail!("Cannot use both --include-tables and --exclude-tables");
        }
        if include_tenants.is_some() && exclude_tenants.is_some() {
            bail!("Cannot use both --include-tenants and --exclude-tenants");
        }

        for tables in [&include_tables, &exclude_tables].into_iter().flatten() {
            for table in tables {
                if table.trim().is_empty() {
                    bail!("Table names in filters cannot be empty");
                }
            }
        }

        let to_tenants = |ids: Option<Vec<u32>>| -> Result<Option<Vec<TenantId>>> {
            match ids {
                Some(ids) => {
                    if let Some(bad) = ids.iter().find(|id| **id == 0) {
                        bail!("Tenant ids start at 1, got {}", bad);
                    }
                    Ok(Some(ids.into_iter().map(TenantId::new).collect()))
                }
                None => Ok(None),
            }
        };

        Ok(Self {
            include_tables,
            exclude_tables,
            include_tenants: to_tenants(include_tenants)?,
            exclude_tenants: to_tenants(exclude_tenants)?,
        })
    }

    /// Creates an empty filter (export everything)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Checks if any filters are active
    pub fn is_empty(&self) -> bool {
        self.include_tables.is_none()
            && self.exclude_tables.is_none()
            && self.include_tenants.is_none()
            && self.exclude_tenants.is_none()
    }

    /// Determines if a physical table should be exported
    pub fn should_export_table(&self, table_name: &str) -> bool {
        if let Some(ref include) = self.include_tables {
            if !include.iter().any(|t| t == table_name) {
                return false;
            }
        }

        if let Some(ref exclude) = self.exclude_tables {
            if exclude.iter().any(|t| t == table_name) {
                return false;
            }
        }

        true
    }

    /// Determines if a tenant's tables should be exported
    pub fn should_export_tenant(&self, tenant: TenantId) -> bool {
        if let Some(ref include) = self.include_tenants {
            if !include.contains(&tenant) {
                return false;
            }
        }

        if let Some(ref exclude) = self.exclude_tenants {
            if exclude.contains(&tenant) {
                return false;
            }
        }

        true
    }
}
