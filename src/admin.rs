//! Administrative write surface
//!
//! Creates and deletes entities, writes assignment edges and routes every
//! hierarchy edge through the `MutationGuard`. Each successful mutation is
//! published on the event bus as `<entity_type>.<action>`.

use std::sync::Arc;

use uuid::Uuid;

use crate::authz::MutationGuard;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, EventBus};
use crate::models::{
    Assignment, EdgeMetadata, NewPermission, NewRole, NewUser, Permission, PermissionParentChange,
    PermissionRef, Relation, Role, RoleRef, User, UserRef,
};
use crate::store::GraphStore;
use crate::utils::{normalize_name, slugify, utc_now};

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn GraphStore>,
    guard: MutationGuard,
    events: EventBus,
    actor_id: Option<Uuid>,
}

impl AdminService {
    pub fn new(store: Arc<dyn GraphStore>, guard: MutationGuard, events: EventBus) -> Self {
        Self {
            store,
            guard,
            events,
            actor_id: None,
        }
    }

    /// Attributes subsequent mutations to `actor_id` in events and edge
    /// metadata.
    pub fn acting_as(&self, actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..self.clone()
        }
    }

    // =========================================================================
    // ENTITIES
    // =========================================================================

    pub async fn create_user(&self, new: NewUser) -> AppResult<User> {
        let now = utc_now();
        let user = User {
            id: Uuid::new_v4(),
            name: normalize_name(&new.name)?,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_user(&user).await?;

        tracing::info!(user_id = %user.id, name = %user.name, "user created");
        log_activity(&self.events, "created", self.actor_id, &user);
        Ok(user)
    }

    pub async fn create_role(&self, new: NewRole) -> AppResult<Role> {
        let name = normalize_name(&new.name)?;
        let slug = slugify(new.slug.as_deref().unwrap_or(&name))?;
        let now = utc_now();
        let role = Role {
            id: Uuid::new_v4(),
            name,
            slug,
            description: new.description,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_role(&role).await?;

        tracing::info!(role_id = %role.id, slug = %role.slug, "role created");
        log_activity(&self.events, "created", self.actor_id, &role);
        Ok(role)
    }

    /// A new permission has no children, so attaching it to an existing
    /// parent cannot close a cycle.
    pub async fn create_permission(&self, new: NewPermission) -> AppResult<Permission> {
        let name = normalize_name(&new.name)?;
        let slug = slugify(new.slug.as_deref().unwrap_or(&name))?;
        let now = utc_now();
        let permission = Permission {
            id: Uuid::new_v4(),
            name,
            slug,
            description: new.description,
            parent_id: new.parent_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_permission(&permission).await?;

        tracing::info!(permission_id = %permission.id, slug = %permission.slug, "permission created");
        log_activity(&self.events, "created", self.actor_id, &permission);
        Ok(permission)
    }

    pub async fn delete_user(&self, user: &UserRef) -> AppResult<User> {
        let user = self.store.resolve_user(user).await?;
        if !self.store.delete_user(user.id).await? {
            return Err(AppError::not_found(format!("user {}", user.id)));
        }

        tracing::info!(user_id = %user.id, "user deleted");
        log_activity(&self.events, "deleted", self.actor_id, &user);
        Ok(user)
    }

    pub async fn delete_role(&self, role: &RoleRef) -> AppResult<Role> {
        let role = self.store.resolve_role(role).await?;
        if !self.store.delete_role(role.id).await? {
            return Err(AppError::not_found(format!("role {}", role.id)));
        }

        tracing::info!(role_id = %role.id, "role deleted");
        log_activity(&self.events, "deleted", self.actor_id, &role);
        Ok(role)
    }

    pub async fn delete_permission(&self, permission: &PermissionRef) -> AppResult<Permission> {
        let permission = self.store.resolve_permission(permission).await?;
        if !self.store.delete_permission(permission.id).await? {
            return Err(AppError::not_found(format!("permission {}", permission.id)));
        }

        tracing::info!(permission_id = %permission.id, "permission deleted");
        log_activity(&self.events, "deleted", self.actor_id, &permission);
        Ok(permission)
    }

    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        self.store.list_roles().await
    }

    pub async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        self.store.list_permissions().await
    }

    // =========================================================================
    // ASSIGNMENTS
    // =========================================================================

    pub async fn assign_role(&self, user: &UserRef, role: &RoleRef, metadata: EdgeMetadata) -> AppResult<Assignment> {
        let user_id = self.store.resolve_user(user).await?.id;
        let role_id = self.store.resolve_role(role).await?.id;
        self.link(Relation::UserRole, user_id, role_id, metadata, "assigned").await
    }

    pub async fn revoke_role(&self, user: &UserRef, role: &RoleRef) -> AppResult<Assignment> {
        let user_id = self.store.resolve_user(user).await?.id;
        let role_id = self.store.resolve_role(role).await?.id;
        self.unlink(Relation::UserRole, user_id, role_id).await
    }

    pub async fn grant_permission(
        &self,
        user: &UserRef,
        permission: &PermissionRef,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        let user_id = self.store.resolve_user(user).await?.id;
        let permission_id = self.store.resolve_permission(permission).await?.id;
        self.link(Relation::UserPermission, user_id, permission_id, metadata, "granted").await
    }

    pub async fn revoke_permission(&self, user: &UserRef, permission: &PermissionRef) -> AppResult<Assignment> {
        let user_id = self.store.resolve_user(user).await?.id;
        let permission_id = self.store.resolve_permission(permission).await?.id;
        self.unlink(Relation::UserPermission, user_id, permission_id).await
    }

    pub async fn grant_role_permission(
        &self,
        role: &RoleRef,
        permission: &PermissionRef,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        let role_id = self.store.resolve_role(role).await?.id;
        let permission_id = self.store.resolve_permission(permission).await?.id;
        self.link(Relation::RolePermission, role_id, permission_id, metadata, "granted").await
    }

    pub async fn revoke_role_permission(&self, role: &RoleRef, permission: &PermissionRef) -> AppResult<Assignment> {
        let role_id = self.store.resolve_role(role).await?.id;
        let permission_id = self.store.resolve_permission(permission).await?.id;
        self.unlink(Relation::RolePermission, role_id, permission_id).await
    }

    // =========================================================================
    // HIERARCHY
    // =========================================================================

    /// Makes `parent` a parent of `child`, rejecting self-loops and cycles.
    pub async fn add_role_parent(&self, parent: &RoleRef, child: &RoleRef, metadata: EdgeMetadata) -> AppResult<Assignment> {
        let parent_id = self.store.resolve_role(parent).await?.id;
        let child_id = self.store.resolve_role(child).await?.id;
        let edge = self
            .guard
            .add_role_parent(parent_id, child_id, self.stamp(metadata))
            .await?;

        tracing::info!(%parent_id, %child_id, "role parent linked");
        log_activity(&self.events, "linked", self.actor_id, &edge);
        Ok(edge)
    }

    /// Removing an edge can never create a cycle, so no guard is involved.
    pub async fn remove_role_parent(&self, parent: &RoleRef, child: &RoleRef) -> AppResult<Assignment> {
        let parent_id = self.store.resolve_role(parent).await?.id;
        let child_id = self.store.resolve_role(child).await?.id;
        self.unlink(Relation::RoleParent, child_id, parent_id).await
    }

    pub async fn set_permission_parent(
        &self,
        permission: &PermissionRef,
        parent: Option<&PermissionRef>,
    ) -> AppResult<PermissionParentChange> {
        let permission_id = self.store.resolve_permission(permission).await?.id;
        let parent_id = match parent {
            Some(parent) => Some(self.store.resolve_permission(parent).await?.id),
            None => None,
        };
        let change = self.guard.set_permission_parent(permission_id, parent_id).await?;

        tracing::info!(
            %permission_id,
            previous_parent_id = ?change.previous_parent_id,
            parent_id = ?change.parent_id,
            "permission parent updated"
        );
        log_activity(&self.events, "updated", self.actor_id, &change);
        Ok(change)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn stamp(&self, mut metadata: EdgeMetadata) -> EdgeMetadata {
        if metadata.assigned_by.is_none() {
            metadata.assigned_by = self.actor_id;
        }
        metadata
    }

    async fn link(
        &self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
        action: &str,
    ) -> AppResult<Assignment> {
        let edge = self
            .store
            .insert_edge(relation, subject_id, object_id, self.stamp(metadata))
            .await?;

        tracing::info!(%relation, %subject_id, %object_id, "edge {action}");
        log_activity(&self.events, action, self.actor_id, &edge);
        Ok(edge)
    }

    async fn unlink(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<Assignment> {
        let edge = self
            .store
            .remove_edge(relation, subject_id, object_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("{relation} ({subject_id}, {object_id})")))?;

        tracing::info!(%relation, %subject_id, %object_id, "edge revoked");
        log_activity(&self.events, "revoked", self.actor_id, &edge);
        Ok(edge)
    }
}
