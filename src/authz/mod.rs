//! Authorization module - hierarchy resolution, checks and write validation
//!
//! This module implements the RBAC resolver with support for:
//! - Direct user grants and role-mediated grants
//! - A many-parent role hierarchy and a single-parent permission hierarchy
//! - Cycle-safe hierarchy writes (`MutationGuard`)
//! - Configurable permission inheritance direction

mod assignments;
mod engine;
mod guard;
mod hierarchy;
mod principal;
mod query;
#[cfg(test)]
mod test_support;

pub use assignments::AssignmentIndex;
pub use engine::AuthorizationEngine;
pub use guard::MutationGuard;
pub use hierarchy::{HierarchyLinks, HierarchyResolver, StoreLinks, TxLinks};
pub use principal::Principal;
pub use query::{AccessQuery, Match};

use std::fmt;
use std::str::FromStr;

/// Which way the permission hierarchy grants access.
///
/// The default grants a permission to anyone holding it or any of its
/// ancestors, i.e. `HasPermission(u, p)` when `u` holds some `q` in
/// `{p} ∪ Ancestors(p)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionInheritance {
    /// Holding a parent permission satisfies checks for its descendants.
    #[default]
    AncestorGrantsDescendant,
    /// Holding a child permission satisfies checks for its ancestors.
    DescendantGrantsAncestor,
    /// Only exact grants count.
    Disabled,
}

impl PermissionInheritance {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionInheritance::AncestorGrantsDescendant => "ancestor",
            PermissionInheritance::DescendantGrantsAncestor => "descendant",
            PermissionInheritance::Disabled => "off",
        }
    }
}

impl FromStr for PermissionInheritance {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ancestor" => Ok(PermissionInheritance::AncestorGrantsDescendant),
            "descendant" => Ok(PermissionInheritance::DescendantGrantsAncestor),
            "off" | "disabled" | "none" => Ok(PermissionInheritance::Disabled),
            other => Err(format!("unknown permission inheritance '{other}'")),
        }
    }
}

impl fmt::Display for PermissionInheritance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inheritance_parses_env_values() {
        assert_eq!("ancestor".parse(), Ok(PermissionInheritance::AncestorGrantsDescendant));
        assert_eq!(" Descendant ".parse(), Ok(PermissionInheritance::DescendantGrantsAncestor));
        assert_eq!("off".parse(), Ok(PermissionInheritance::Disabled));
        assert!("sideways".parse::<PermissionInheritance>().is_err());
    }
}
