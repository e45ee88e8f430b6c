use std::fmt;

use uuid::Uuid;

use super::{Permission, Role, User};

/// How a caller names an entity at the API boundary.
///
/// Resolved exactly once (see `AuthorizationEngine::resolve_*`); everything
/// behind the boundary works with plain ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Id(Uuid),
    /// Slug or name for roles and permissions, name for users.
    Key(String),
    /// An already loaded entity; re-read by its id on resolution.
    Entity(T),
}

pub type UserRef = Lookup<User>;
pub type RoleRef = Lookup<Role>;
pub type PermissionRef = Lookup<Permission>;

impl<T> Lookup<T> {
    /// A UUID string becomes `Id`, anything else `Key`.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match Uuid::parse_str(value) {
            Ok(id) => Lookup::Id(id),
            Err(_) => Lookup::Key(value.to_string()),
        }
    }

    pub fn key(value: impl Into<String>) -> Self {
        Lookup::Key(value.into())
    }
}

impl<T> From<Uuid> for Lookup<T> {
    fn from(id: Uuid) -> Self {
        Lookup::Id(id)
    }
}

impl<T> From<&str> for Lookup<T> {
    fn from(value: &str) -> Self {
        Lookup::parse(value)
    }
}

impl From<User> for UserRef {
    fn from(user: User) -> Self {
        Lookup::Entity(user)
    }
}

impl From<Role> for RoleRef {
    fn from(role: Role) -> Self {
        Lookup::Entity(role)
    }
}

impl From<Permission> for PermissionRef {
    fn from(permission: Permission) -> Self {
        Lookup::Entity(permission)
    }
}

impl<T> fmt::Display for Lookup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Id(id) => write!(f, "{id}"),
            Lookup::Key(key) => write!(f, "'{key}'"),
            Lookup::Entity(_) => f.write_str("<entity>"),
        }
    }
}
