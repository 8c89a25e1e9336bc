// ABOUTME: Tenant identity and the table-prefix naming convention
// ABOUTME: Classifies physical tables into tenant-scoped, global, or unprefixed

pub mod partition;

pub use partition::{partition, Dependency, ExportPlan, QueueEntry, WorkQueue};

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Logical partition sharing one physical schema, told apart by table prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TenantId(u32);

impl TenantId {
    /// The default tenant, whose tables carry no number after the prefix
    pub const PRIMARY: TenantId = TenantId(1);

    pub fn new(id: u32) -> Self {
        TenantId(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A physical table classified by the naming convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalTable {
    pub raw_name: String,
    pub tenant: TenantId,
    pub logical_name: String,
    pub is_global: bool,
}

/// `<prefix>[<tenant>_]<logical>` naming convention
///
/// Tables of the primary tenant carry no number; every other tenant's tables
/// carry `<id>_` right after the shared prefix. Logical names listed in
/// `global_tables` are shared by all tenants and only exist unnumbered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNaming {
    prefix: String,
    global_tables: BTreeSet<String>,
}

impl TableNaming {
    pub fn new(prefix: impl Into<String>, global_tables: BTreeSet<String>) -> Self {
        Self {
            prefix: prefix.into(),
            global_tables,
        }
    }

    /// Classify a raw table name; `None` means the table is unprefixed
    ///
    /// An explicit `0_` or `1_` number is not a tenant marker: the primary
    /// tenant is always unnumbered, so such names are treated as unprefixed.
    pub fn classify(&self, raw_name: &str) -> Option<PhysicalTable> {
        let rest = raw_name.strip_prefix(&self.prefix)?;

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && rest.as_bytes().get(digits) == Some(&b'_') {
            let id: u32 = rest[..digits].parse().ok()?;
            let logical = &rest[digits + 1..];
            if id < 2 || logical.is_empty() {
                return None;
            }
            return Some(PhysicalTable {
                raw_name: raw_name.to_string(),
                tenant: TenantId(id),
                logical_name: logical.to_string(),
                is_global: false,
            });
        }

        if rest.is_empty() {
            return None;
        }

        Some(PhysicalTable {
            raw_name: raw_name.to_string(),
            tenant: TenantId::PRIMARY,
            logical_name: rest.to_string(),
            is_global: self.global_tables.contains(rest),
        })
    }

    /// Physical name of a logical table as seen from `tenant`
    pub fn physical_name(&self, tenant: TenantId, logical: &str) -> String {
        if tenant.is_primary() || self.global_tables.contains(logical) {
            format!("{}{}", self.prefix, logical)
        } else {
            format!("{}{}_{}", self.prefix, tenant, logical)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> TableNaming {
        TableNaming::new(
            "wp_",
            ["users".to_string(), "usermeta".to_string()]
                .into_iter()
                .collect(),
        )
    }

    #[test]
    fn classifies_primary_tenant_tables() {
        let table = naming().classify("wp_posts").unwrap();
        assert_eq!(table.tenant, TenantId::PRIMARY);
        assert_eq!(table.logical_name, "posts");
        assert!(!table.is_global);
    }

    #[test]
    fn classifies_numbered_tenant_tables() {
        let table = naming().classify("wp_12_postmeta").unwrap();
        assert_eq!(table.tenant, TenantId::new(12));
        assert_eq!(table.logical_name, "postmeta");
        assert!(!table.is_global);
    }

    #[test]
    fn global_tables_are_only_unnumbered() {
        assert!(naming().classify("wp_users").unwrap().is_global);
        let numbered = naming().classify("wp_3_users").unwrap();
        assert!(!numbered.is_global);
        assert_eq!(numbered.tenant, TenantId::new(3));
    }

    #[test]
    fn digits_without_separator_are_part_of_logical_name() {
        let table = naming().classify("wp_2fa_tokens").unwrap();
        assert_eq!(table.tenant, TenantId::PRIMARY);
        assert_eq!(table.logical_name, "2fa_tokens");
    }

    #[test]
    fn unprefixed_and_degenerate_names() {
        assert!(naming().classify("sessions").is_none());
        assert!(naming().classify("wp_").is_none());
        assert!(naming().classify("wp_4_").is_none());
        assert!(naming().classify("wp_1_posts").is_none());
        assert!(naming().classify("wp_0_posts").is_none());
    }

    #[test]
    fn physical_name_round_trips_through_classify() {
        let naming = naming();
        assert_eq!(naming.physical_name(TenantId::new(5), "posts"), "wp_5_posts");
        assert_eq!(naming.physical_name(TenantId::new(5), "users"), "wp_users");
        assert_eq!(naming.physical_name(TenantId::PRIMARY, "posts"), "wp_posts");
    }
}
