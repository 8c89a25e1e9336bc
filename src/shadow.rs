// ABOUTME: Deterministic naming for server-side shadow tables
// ABOUTME: Derives shadow names from a stable hash of the physical table name

use sha2::{Digest, Sha256};

/// Reserved prefix for every shadow table; tables carrying it are never exported
pub const SHADOW_PREFIX: &str = "zz_subset_";

/// Scratch copy of a source table holding the subset staged for export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTable {
    pub source: String,
    pub name: String,
}

impl ShadowTable {
    pub fn for_source(source: &str) -> Self {
        Self {
            source: source.to_string(),
            name: shadow_name(source),
        }
    }
}

/// Shadow table name for a physical table
///
/// The physical name already carries the tenant number, so two tenants never
/// share a shadow while a global table maps to the same shadow from every
/// tenant. Repeated runs derive the same name, which is what lets cleanup find
/// leftovers without a live list.
pub fn shadow_name(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}{}", SHADOW_PREFIX, &digest[..16])
}

pub fn is_shadow_name(table: &str) -> bool {
    table.starts_with(SHADOW_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_names_are_deterministic() {
        assert_eq!(shadow_name("wp_posts"), shadow_name("wp_posts"));
        assert_ne!(shadow_name("wp_posts"), shadow_name("wp_2_posts"));
    }

    #[test]
    fn shadow_names_are_valid_identifiers() {
        let name = shadow_name("wp_42_comments");
        assert!(is_shadow_name(&name));
        assert_eq!(name.len(), SHADOW_PREFIX.len() + 16);
        crate::utils::validate_identifier(&name).unwrap();
    }

    #[test]
    fn for_source_keeps_the_source_name() {
        let shadow = ShadowTable::for_source("wp_users");
        assert_eq!(shadow.source, "wp_users");
        assert_eq!(shadow.name, shadow_name("wp_users"));
    }
}
