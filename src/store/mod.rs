//! Graph Store - persistence contract for users, roles, permissions and edges
//!
//! Two implementations ship with the crate:
//! - `SqliteStore`: sqlx/SQLite, the production backend
//! - `InMemoryStore`: process-local, used by tests and embedders
//!
//! Reads go straight to the store. Hierarchy writes go through a `GraphTx`
//! obtained from `begin`, which holds the hierarchy write lock until it is
//! committed or dropped (dropping rolls back).

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{
    Assignment, EdgeMetadata, Hierarchy, Lookup, Permission, PermissionRef, Relation, Role, RoleRef, User,
    UserRef,
};

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;

    async fn find_user(&self, name: &str) -> AppResult<Option<User>>;

    async fn get_role(&self, id: Uuid) -> AppResult<Option<Role>>;

    /// Slug match wins over name match.
    async fn find_role(&self, slug_or_name: &str) -> AppResult<Option<Role>>;

    async fn get_permission(&self, id: Uuid) -> AppResult<Option<Permission>>;

    /// Slug match wins over name match.
    async fn find_permission(&self, slug_or_name: &str) -> AppResult<Option<Permission>>;

    /// All roles ordered by name.
    async fn list_roles(&self) -> AppResult<Vec<Role>>;

    /// All permissions ordered by name.
    async fn list_permissions(&self) -> AppResult<Vec<Permission>>;

    /// Fails with `UniqueViolation` on a duplicate name.
    async fn insert_user(&self, user: &User) -> AppResult<()>;

    /// Fails with `UniqueViolation` on a duplicate name or slug.
    async fn insert_role(&self, role: &Role) -> AppResult<()>;

    /// Fails with `UniqueViolation` on a duplicate name or slug and with
    /// `NotFound` when `parent_id` does not exist.
    async fn insert_permission(&self, permission: &Permission) -> AppResult<()>;

    /// Deletes the user and every edge that references it.
    async fn delete_user(&self, id: Uuid) -> AppResult<bool>;

    /// Deletes the role and every edge that references it.
    async fn delete_role(&self, id: Uuid) -> AppResult<bool>;

    /// Deletes the permission and every edge that references it; children
    /// become roots.
    async fn delete_permission(&self, id: Uuid) -> AppResult<bool>;

    async fn edge_exists(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<bool>;

    async fn objects_for_subject(&self, relation: Relation, subject_id: Uuid) -> AppResult<HashSet<Uuid>>;

    /// Role hierarchy: zero or more. Permission hierarchy: zero or one.
    async fn parents_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>>;

    async fn children_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>>;

    /// Inserts an assignment edge. Hierarchy relations are rejected here and
    /// must be written through `begin`.
    async fn insert_edge(
        &self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment>;

    /// Returns the removed edge, or `None` when there was nothing to remove.
    async fn remove_edge(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<Option<Assignment>>;

    /// Opens a write transaction holding the lock for `hierarchy`.
    async fn begin(&self, hierarchy: Hierarchy) -> AppResult<Box<dyn GraphTx>>;

    /// Resolves a boundary lookup once. Missing entities are `NotFound`;
    /// an `Entity` is re-read by id so a deleted one does not resolve.
    async fn resolve_user(&self, user: &UserRef) -> AppResult<User> {
        let found = match user {
            Lookup::Id(id) => self.get_user(*id).await?,
            Lookup::Key(name) => self.find_user(name).await?,
            Lookup::Entity(user) => self.get_user(user.id).await?,
        };
        found.ok_or_else(|| AppError::not_found(format!("user {user}")))
    }

    async fn resolve_role(&self, role: &RoleRef) -> AppResult<Role> {
        let found = match role {
            Lookup::Id(id) => self.get_role(*id).await?,
            Lookup::Key(key) => self.find_role(key).await?,
            Lookup::Entity(role) => self.get_role(role.id).await?,
        };
        found.ok_or_else(|| AppError::not_found(format!("role {role}")))
    }

    async fn resolve_permission(&self, permission: &PermissionRef) -> AppResult<Permission> {
        let found = match permission {
            Lookup::Id(id) => self.get_permission(*id).await?,
            Lookup::Key(key) => self.find_permission(key).await?,
            Lookup::Entity(permission) => self.get_permission(permission.id).await?,
        };
        found.ok_or_else(|| AppError::not_found(format!("permission {permission}")))
    }
}

/// Transaction handle for hierarchy writes. Reads observe the transaction's
/// own snapshot, writes become visible on `commit`.
#[async_trait]
pub trait GraphTx: Send {
    async fn get_role(&mut self, id: Uuid) -> AppResult<Option<Role>>;

    async fn get_permission(&mut self, id: Uuid) -> AppResult<Option<Permission>>;

    async fn parents_of(&mut self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>>;

    async fn children_of(&mut self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>>;

    async fn insert_edge(
        &mut self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment>;

    async fn set_permission_parent(&mut self, permission_id: Uuid, parent_id: Option<Uuid>) -> AppResult<()>;

    /// Makes the writes visible. The handle is unusable afterwards.
    async fn commit(&mut self) -> AppResult<()>;
}
