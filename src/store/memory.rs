use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use super::{GraphStore, GraphTx};
use crate::errors::{AppError, AppResult};
use crate::models::{Assignment, EdgeMetadata, Hierarchy, Permission, Relation, Role, User};
use crate::utils::utc_now;

#[derive(Debug, Clone, Default)]
struct GraphState {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    edges: HashMap<Relation, HashMap<(Uuid, Uuid), Assignment>>,
}

impl GraphState {
    fn subject_exists(&self, relation: Relation, id: Uuid) -> bool {
        match relation {
            Relation::UserRole | Relation::UserPermission => self.users.contains_key(&id),
            Relation::RolePermission | Relation::RoleParent => self.roles.contains_key(&id),
        }
    }

    fn object_exists(&self, relation: Relation, id: Uuid) -> bool {
        match relation {
            Relation::UserRole | Relation::RoleParent => self.roles.contains_key(&id),
            Relation::UserPermission | Relation::RolePermission => self.permissions.contains_key(&id),
        }
    }

    fn edge_exists(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> bool {
        self.edges
            .get(&relation)
            .map(|edges| edges.contains_key(&(subject_id, object_id)))
            .unwrap_or(false)
    }

    fn objects_for(&self, relation: Relation, subject_id: Uuid) -> HashSet<Uuid> {
        self.edges
            .get(&relation)
            .map(|edges| {
                edges
                    .keys()
                    .filter(|(subject, _)| *subject == subject_id)
                    .map(|(_, object)| *object)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn subjects_for(&self, relation: Relation, object_id: Uuid) -> HashSet<Uuid> {
        self.edges
            .get(&relation)
            .map(|edges| {
                edges
                    .keys()
                    .filter(|(_, object)| *object == object_id)
                    .map(|(subject, _)| *subject)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parents_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> HashSet<Uuid> {
        match hierarchy {
            Hierarchy::Role => self.objects_for(Relation::RoleParent, node_id),
            Hierarchy::Permission => self
                .permissions
                .get(&node_id)
                .and_then(|p| p.parent_id)
                .into_iter()
                .collect(),
        }
    }

    fn children_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> HashSet<Uuid> {
        match hierarchy {
            Hierarchy::Role => self.subjects_for(Relation::RoleParent, node_id),
            Hierarchy::Permission => self
                .permissions
                .values()
                .filter(|p| p.parent_id == Some(node_id))
                .map(|p| p.id)
                .collect(),
        }
    }

    fn insert_edge(
        &mut self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        if !self.subject_exists(relation, subject_id) {
            return Err(AppError::not_found(format!("{relation} subject {subject_id}")));
        }
        if !self.object_exists(relation, object_id) {
            return Err(AppError::not_found(format!("{relation} object {object_id}")));
        }
        if relation == Relation::RoleParent && subject_id == object_id {
            return Err(AppError::self_reference(subject_id));
        }
        if self.edge_exists(relation, subject_id, object_id) {
            return Err(AppError::unique_violation(format!(
                "{relation} ({subject_id}, {object_id}) already exists"
            )));
        }

        let assignment = Assignment {
            id: Uuid::new_v4(),
            relation,
            subject_id,
            object_id,
            metadata,
            created_at: utc_now(),
        };
        self.edges
            .entry(relation)
            .or_default()
            .insert((subject_id, object_id), assignment.clone());

        Ok(assignment)
    }

    fn set_permission_parent(&mut self, permission_id: Uuid, parent_id: Option<Uuid>) -> AppResult<()> {
        if let Some(parent_id) = parent_id {
            if parent_id == permission_id {
                return Err(AppError::self_reference(permission_id));
            }
            if !self.permissions.contains_key(&parent_id) {
                return Err(AppError::not_found(format!("permission {parent_id}")));
            }
        }
        let permission = self
            .permissions
            .get_mut(&permission_id)
            .ok_or_else(|| AppError::not_found(format!("permission {permission_id}")))?;
        permission.parent_id = parent_id;
        permission.updated_at = utc_now();
        Ok(())
    }

    /// Drops every edge touching `id` on the given side(s) of `relations`.
    fn cascade(&mut self, id: Uuid, relations: &[(Relation, bool, bool)]) {
        for (relation, as_subject, as_object) in relations {
            if let Some(edges) = self.edges.get_mut(relation) {
                edges.retain(|(subject, object), _| {
                    !((*as_subject && *subject == id) || (*as_object && *object == id))
                });
            }
        }
    }
}

fn find_by_slug_or_name<'a, T>(
    items: impl Iterator<Item = &'a T> + Clone,
    key: &str,
    slug: impl Fn(&T) -> &str,
    name: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    items
        .clone()
        .find(|item| slug(*item) == key)
        .or_else(|| items.into_iter().find(|item| name(*item) == key))
}

/// Process-local graph store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<GraphState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user(&self, name: &str) -> AppResult<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.name == name)
            .cloned())
    }

    async fn get_role(&self, id: Uuid) -> AppResult<Option<Role>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn find_role(&self, slug_or_name: &str) -> AppResult<Option<Role>> {
        let state = self.state.read().await;
        let found = find_by_slug_or_name(
            state.roles.values(),
            slug_or_name,
            |r| r.slug.as_str(),
            |r| r.name.as_str(),
        )
        .cloned();
        Ok(found)
    }

    async fn get_permission(&self, id: Uuid) -> AppResult<Option<Permission>> {
        Ok(self.state.read().await.permissions.get(&id).cloned())
    }

    async fn find_permission(&self, slug_or_name: &str) -> AppResult<Option<Permission>> {
        let state = self.state.read().await;
        let found = find_by_slug_or_name(
            state.permissions.values(),
            slug_or_name,
            |p| p.slug.as_str(),
            |p| p.name.as_str(),
        )
        .cloned();
        Ok(found)
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.state.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let mut permissions: Vec<Permission> =
            self.state.read().await.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.name == user.name) {
            return Err(AppError::unique_violation(format!("user name '{}' already exists", user.name)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.roles.values().any(|r| r.name == role.name || r.slug == role.slug) {
            return Err(AppError::unique_violation(format!(
                "role name '{}' or slug '{}' already exists",
                role.name, role.slug
            )));
        }
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn insert_permission(&self, permission: &Permission) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state
            .permissions
            .values()
            .any(|p| p.name == permission.name || p.slug == permission.slug)
        {
            return Err(AppError::unique_violation(format!(
                "permission name '{}' or slug '{}' already exists",
                permission.name, permission.slug
            )));
        }
        if let Some(parent_id) = permission.parent_id {
            if !state.permissions.contains_key(&parent_id) {
                return Err(AppError::not_found(format!("parent permission {parent_id}")));
            }
        }
        state.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }
        state.cascade(
            id,
            &[(Relation::UserRole, true, false), (Relation::UserPermission, true, false)],
        );
        Ok(true)
    }

    async fn delete_role(&self, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.roles.remove(&id).is_none() {
            return Ok(false);
        }
        state.cascade(
            id,
            &[
                (Relation::UserRole, false, true),
                (Relation::RolePermission, true, false),
                (Relation::RoleParent, true, true),
            ],
        );
        Ok(true)
    }

    async fn delete_permission(&self, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if state.permissions.remove(&id).is_none() {
            return Ok(false);
        }
        state.cascade(
            id,
            &[(Relation::UserPermission, false, true), (Relation::RolePermission, false, true)],
        );
        for permission in state.permissions.values_mut() {
            if permission.parent_id == Some(id) {
                permission.parent_id = None;
            }
        }
        Ok(true)
    }

    async fn edge_exists(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<bool> {
        Ok(self.state.read().await.edge_exists(relation, subject_id, object_id))
    }

    async fn objects_for_subject(&self, relation: Relation, subject_id: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self.state.read().await.objects_for(relation, subject_id))
    }

    async fn parents_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self.state.read().await.parents_of(hierarchy, node_id))
    }

    async fn children_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self.state.read().await.children_of(hierarchy, node_id))
    }

    async fn insert_edge(
        &self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        if relation.is_hierarchy() {
            return Err(AppError::bad_request(format!(
                "{relation} edges must be written inside a hierarchy transaction"
            )));
        }
        self.state
            .write()
            .await
            .insert_edge(relation, subject_id, object_id, metadata)
    }

    async fn remove_edge(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<Option<Assignment>> {
        Ok(self
            .state
            .write()
            .await
            .edges
            .get_mut(&relation)
            .and_then(|edges| edges.remove(&(subject_id, object_id))))
    }

    async fn begin(&self, hierarchy: Hierarchy) -> AppResult<Box<dyn GraphTx>> {
        let guard = self.state.clone().write_owned().await;
        let working = (*guard).clone();
        tracing::trace!(%hierarchy, "in-memory hierarchy transaction started");
        Ok(Box::new(InMemoryTx {
            guard: Some(guard),
            working,
        }))
    }
}

/// Holds the store's write guard for its whole lifetime and mutates a working
/// copy; dropping it without `commit` discards the copy.
struct InMemoryTx {
    guard: Option<OwnedRwLockWriteGuard<GraphState>>,
    working: GraphState,
}

impl InMemoryTx {
    fn state(&mut self) -> AppResult<&mut GraphState> {
        if self.guard.is_none() {
            return Err(AppError::internal("transaction already committed"));
        }
        Ok(&mut self.working)
    }
}

#[async_trait]
impl GraphTx for InMemoryTx {
    async fn get_role(&mut self, id: Uuid) -> AppResult<Option<Role>> {
        Ok(self.state()?.roles.get(&id).cloned())
    }

    async fn get_permission(&mut self, id: Uuid) -> AppResult<Option<Permission>> {
        Ok(self.state()?.permissions.get(&id).cloned())
    }

    async fn parents_of(&mut self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self.state()?.parents_of(hierarchy, node_id))
    }

    async fn children_of(&mut self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self.state()?.children_of(hierarchy, node_id))
    }

    async fn insert_edge(
        &mut self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        self.state()?.insert_edge(relation, subject_id, object_id, metadata)
    }

    async fn set_permission_parent(&mut self, permission_id: Uuid, parent_id: Option<Uuid>) -> AppResult<()> {
        self.state()?.set_permission_parent(permission_id, parent_id)
    }

    async fn commit(&mut self) -> AppResult<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| AppError::internal("transaction already committed"))?;
        *guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
