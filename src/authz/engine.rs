use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use uuid::Uuid;

use super::assignments::AssignmentIndex;
use super::hierarchy::{HierarchyResolver, StoreLinks};
use super::principal::Principal;
use super::query::{AccessQuery, Match};
use super::PermissionInheritance;
use crate::errors::AppResult;
use crate::models::{Hierarchy, Permission, PermissionRef, Relation, Role, RoleRef, User, UserRef};
use crate::store::GraphStore;

/// Answers `has_permission`, `has_role` and `role_has_permission` over the
/// live store.
///
/// Every public call resolves its lookups once, then evaluates with fresh
/// resolvers whose ancestor caches die with the call. Absence of a right is
/// `Ok(false)`; only unknown entities (`NotFound`) and store failures error.
#[derive(Clone)]
pub struct AuthorizationEngine {
    store: Arc<dyn GraphStore>,
    assignments: AssignmentIndex,
    inheritance: PermissionInheritance,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            assignments: AssignmentIndex::new(store.clone()),
            store,
            inheritance: PermissionInheritance::default(),
        }
    }

    pub fn with_inheritance(mut self, inheritance: PermissionInheritance) -> Self {
        self.inheritance = inheritance;
        self
    }

    pub fn inheritance(&self) -> PermissionInheritance {
        self.inheritance
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    pub async fn resolve_user(&self, user: &UserRef) -> AppResult<User> {
        self.store.resolve_user(user).await
    }

    pub async fn resolve_role(&self, role: &RoleRef) -> AppResult<Role> {
        self.store.resolve_role(role).await
    }

    pub async fn resolve_permission(&self, permission: &PermissionRef) -> AppResult<Permission> {
        self.store.resolve_permission(permission).await
    }

    // =========================================================================
    // PREDICATES
    // =========================================================================

    pub async fn has_permission(&self, user: &UserRef, permission: &PermissionRef) -> AppResult<bool> {
        let user_id = self.resolve_user(user).await?.id;
        let permission_id = self.resolve_permission(permission).await?.id;
        self.evaluation(user_id).has_permission(permission_id).await
    }

    pub async fn has_role(&self, user: &UserRef, role: &RoleRef) -> AppResult<bool> {
        let user_id = self.resolve_user(user).await?.id;
        let role_id = self.resolve_role(role).await?.id;
        self.evaluation(user_id).has_role(role_id).await
    }

    /// Direct grant on the role or on any of its ancestors.
    pub async fn role_has_permission(&self, role: &RoleRef, permission: &PermissionRef) -> AppResult<bool> {
        let role_id = self.resolve_role(role).await?.id;
        let permission_id = self.resolve_permission(permission).await?.id;

        if self
            .assignments
            .has_edge(Relation::RolePermission, role_id, permission_id)
            .await?
        {
            tracing::debug!(%role_id, %permission_id, "direct role permission");
            return Ok(true);
        }

        let mut roles = self.resolver(Hierarchy::Role);
        for ancestor in roles.ancestors(role_id).await? {
            if self
                .assignments
                .has_edge(Relation::RolePermission, ancestor, permission_id)
                .await?
            {
                tracing::debug!(%role_id, %permission_id, via_role = %ancestor, "inherited role permission");
                return Ok(true);
            }
        }

        tracing::debug!(%role_id, %permission_id, "role permission denied");
        Ok(false)
    }

    /// Unified query over several roles and permissions.
    pub async fn check(&self, user: &UserRef, query: &AccessQuery) -> AppResult<bool> {
        query.validate()?;

        let user_id = self.resolve_user(user).await?.id;
        let mut role_ids = Vec::with_capacity(query.roles.len());
        for role in &query.roles {
            role_ids.push(self.resolve_role(role).await?.id);
        }
        let mut permission_ids = Vec::with_capacity(query.permissions.len());
        for permission in &query.permissions {
            permission_ids.push(self.resolve_permission(permission).await?.id);
        }

        let mut eval = self.evaluation(user_id);
        let wanted = query.mode == Match::Any;

        for role_id in role_ids {
            if eval.has_role(role_id).await? == wanted {
                return Ok(wanted);
            }
        }
        for permission_id in permission_ids {
            if eval.has_permission(permission_id).await? == wanted {
                return Ok(wanted);
            }
        }

        Ok(!wanted)
    }

    /// Snapshot of everything the user holds. Agrees with `has_role` and
    /// `has_permission` for every existing role and permission.
    pub async fn principal(&self, user: &UserRef) -> AppResult<Principal> {
        let user_id = self.resolve_user(user).await?.id;
        let mut eval = self.evaluation(user_id);

        let roles = eval.effective_roles().await?;
        let mut granted = self
            .assignments
            .objects_for(Relation::UserPermission, user_id)
            .await?;
        granted.extend(eval.role_grants().await?);

        let mut permissions = granted.clone();
        for permission_id in granted {
            match self.inheritance {
                PermissionInheritance::AncestorGrantsDescendant => {
                    permissions.extend(eval.permissions.descendants(permission_id).await?)
                }
                PermissionInheritance::DescendantGrantsAncestor => {
                    permissions.extend(eval.permissions.ancestors(permission_id).await?)
                }
                PermissionInheritance::Disabled => {}
            }
        }

        Ok(Principal::new(user_id)
            .with_roles(roles)
            .with_permissions(permissions))
    }

    // =========================================================================
    // HIERARCHY
    // =========================================================================

    pub async fn role_ancestors(&self, role: &RoleRef) -> AppResult<HashSet<Uuid>> {
        let role_id = self.resolve_role(role).await?.id;
        self.resolver(Hierarchy::Role).ancestors(role_id).await
    }

    pub async fn role_descendants(&self, role: &RoleRef) -> AppResult<HashSet<Uuid>> {
        let role_id = self.resolve_role(role).await?.id;
        self.resolver(Hierarchy::Role).descendants(role_id).await
    }

    pub async fn permission_ancestors(&self, permission: &PermissionRef) -> AppResult<HashSet<Uuid>> {
        let permission_id = self.resolve_permission(permission).await?.id;
        self.resolver(Hierarchy::Permission).ancestors(permission_id).await
    }

    pub async fn permission_descendants(&self, permission: &PermissionRef) -> AppResult<HashSet<Uuid>> {
        let permission_id = self.resolve_permission(permission).await?.id;
        self.resolver(Hierarchy::Permission).descendants(permission_id).await
    }

    fn resolver(&self, hierarchy: Hierarchy) -> HierarchyResolver<StoreLinks<'_>> {
        HierarchyResolver::new(StoreLinks::new(self.store.as_ref(), hierarchy))
    }

    fn evaluation(&self, user_id: Uuid) -> Evaluation<'_> {
        Evaluation {
            user_id,
            assignments: &self.assignments,
            inheritance: self.inheritance,
            roles: self.resolver(Hierarchy::Role),
            permissions: self.resolver(Hierarchy::Permission),
            direct_roles: None,
            role_grants: None,
        }
    }
}

/// Per-call state for one user. Caches never outlive the call.
struct Evaluation<'a> {
    user_id: Uuid,
    assignments: &'a AssignmentIndex,
    inheritance: PermissionInheritance,
    roles: HierarchyResolver<StoreLinks<'a>>,
    permissions: HierarchyResolver<StoreLinks<'a>>,
    direct_roles: Option<HashSet<Uuid>>,
    role_grants: Option<HashSet<Uuid>>,
}

impl Evaluation<'_> {
    async fn direct_roles(&mut self) -> AppResult<HashSet<Uuid>> {
        if let Some(roles) = &self.direct_roles {
            return Ok(roles.clone());
        }
        let roles = self
            .assignments
            .objects_for(Relation::UserRole, self.user_id)
            .await?;
        self.direct_roles = Some(roles.clone());
        Ok(roles)
    }

    /// Direct roles plus all their ancestors.
    async fn effective_roles(&mut self) -> AppResult<HashSet<Uuid>> {
        let direct = self.direct_roles().await?;
        let mut effective = direct.clone();
        for role_id in direct {
            effective.extend(self.roles.ancestors(role_id).await?);
        }
        Ok(effective)
    }

    /// Permissions assigned to any effective role.
    async fn role_grants(&mut self) -> AppResult<HashSet<Uuid>> {
        if let Some(grants) = &self.role_grants {
            return Ok(grants.clone());
        }
        let roles = self.effective_roles().await?;
        let grants = self
            .assignments
            .objects_for_all(Relation::RolePermission, roles)
            .await?;
        self.role_grants = Some(grants.clone());
        Ok(grants)
    }

    async fn has_role(&mut self, role_id: Uuid) -> AppResult<bool> {
        let user_id = self.user_id;

        if self
            .assignments
            .has_edge(Relation::UserRole, user_id, role_id)
            .await?
        {
            tracing::debug!(%user_id, %role_id, "direct role");
            return Ok(true);
        }

        for direct in self.direct_roles().await? {
            if self.roles.ancestors(direct).await?.contains(&role_id) {
                tracing::debug!(%user_id, %role_id, via_role = %direct, "inherited role");
                return Ok(true);
            }
        }

        tracing::debug!(%user_id, %role_id, "role denied");
        Ok(false)
    }

    /// Exact grant of `permission_id`, directly or through a role.
    async fn grant_path(&mut self, permission_id: Uuid) -> AppResult<Option<&'static str>> {
        if self
            .assignments
            .has_edge(Relation::UserPermission, self.user_id, permission_id)
            .await?
        {
            return Ok(Some("direct"));
        }
        if self.role_grants().await?.contains(&permission_id) {
            return Ok(Some("role"));
        }
        Ok(None)
    }

    /// Worklist over the permission hierarchy, starting at the requested
    /// permission so direct and role grants are tried first.
    async fn has_permission(&mut self, permission_id: Uuid) -> AppResult<bool> {
        let user_id = self.user_id;
        let mut queue = VecDeque::from([permission_id]);
        let mut seen = HashSet::from([permission_id]);

        while let Some(candidate) = queue.pop_front() {
            if let Some(path) = self.grant_path(candidate).await? {
                tracing::debug!(%user_id, %permission_id, granted_by = %candidate, path, "permission granted");
                return Ok(true);
            }

            let next = match self.inheritance {
                PermissionInheritance::AncestorGrantsDescendant => self.permissions.parents(candidate).await?,
                PermissionInheritance::DescendantGrantsAncestor => self.permissions.children(candidate).await?,
                PermissionInheritance::Disabled => break,
            };
            for permission in next {
                if seen.insert(permission) {
                    queue.push_back(permission);
                }
            }
        }

        tracing::debug!(%user_id, %permission_id, inheritance = %self.inheritance, "permission denied");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::test_support::Fixture;
    use crate::errors::AppError;
    use crate::models::Lookup;

    fn user(id: Uuid) -> UserRef {
        Lookup::Id(id)
    }

    fn role(id: Uuid) -> RoleRef {
        Lookup::Id(id)
    }

    fn perm(id: Uuid) -> PermissionRef {
        Lookup::Id(id)
    }

    #[tokio::test]
    async fn direct_permission_is_granted() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let edit = fx.permission("posts.edit", None).await;
        fx.edge(Relation::UserPermission, alice, edit).await;

        let engine = fx.engine(PermissionInheritance::default());
        assert!(engine.has_permission(&user(alice), &perm(edit)).await.unwrap());
    }

    #[tokio::test]
    async fn permission_on_ancestor_role_reaches_grandchild_role() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let (a, b, c) = (fx.role("A").await, fx.role("B").await, fx.role("C").await);
        fx.role_parent(b, a).await;
        fx.role_parent(c, b).await;
        let p = fx.permission("reports.view", None).await;
        fx.edge(Relation::RolePermission, a, p).await;
        fx.edge(Relation::UserRole, alice, c).await;

        let engine = fx.engine(PermissionInheritance::default());
        assert!(engine.role_has_permission(&role(c), &perm(p)).await.unwrap());
        assert!(engine.has_permission(&user(alice), &perm(p)).await.unwrap());
        assert!(engine.has_role(&user(alice), &role(a)).await.unwrap());
        assert!(engine.has_role(&user(alice), &role(b)).await.unwrap());
        assert!(engine.has_role(&user(alice), &role(c)).await.unwrap());

        // A parent role does not hold its children.
        let bob = fx.user("bob").await;
        fx.edge(Relation::UserRole, bob, a).await;
        assert!(!engine.has_role(&user(bob), &role(c)).await.unwrap());
    }

    #[tokio::test]
    async fn user_without_edges_is_denied_everything() {
        let fx = Fixture::new();
        let nobody = fx.user("nobody").await;
        let admin = fx.role("Admin").await;
        let p = fx.permission("everything", None).await;
        fx.edge(Relation::RolePermission, admin, p).await;

        let engine = fx.engine(PermissionInheritance::default());
        assert!(!engine.has_permission(&user(nobody), &perm(p)).await.unwrap());
        assert!(!engine.has_role(&user(nobody), &role(admin)).await.unwrap());
        assert!(engine.role_has_permission(&role(admin), &perm(p)).await.unwrap());

        let principal = engine.principal(&user(nobody)).await.unwrap();
        assert!(principal.roles.is_empty());
        assert!(principal.permissions.is_empty());
    }

    #[tokio::test]
    async fn diamond_reaches_root_permission_through_both_paths() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let [a, b, c, d] = [fx.role("A").await, fx.role("B").await, fx.role("C").await, fx.role("D").await];
        fx.role_parent(b, a).await;
        fx.role_parent(c, a).await;
        fx.role_parent(d, b).await;
        fx.role_parent(d, c).await;
        let p = fx.permission("root.access", None).await;
        fx.edge(Relation::RolePermission, a, p).await;
        fx.edge(Relation::UserRole, alice, d).await;

        let engine = fx.engine(PermissionInheritance::default());
        let ancestors = engine.role_ancestors(&role(d)).await.unwrap();
        assert_eq!(ancestors, HashSet::from([a, b, c]));
        assert_eq!(engine.role_descendants(&role(a)).await.unwrap(), HashSet::from([b, c, d]));
        assert!(engine.role_has_permission(&role(d), &perm(p)).await.unwrap());
        assert!(engine.has_permission(&user(alice), &perm(p)).await.unwrap());
    }

    #[tokio::test]
    async fn permission_inheritance_direction_is_configurable() {
        let fx = Fixture::new();
        let general = fx.permission("posts", None).await;
        let specific = fx.permission("posts.edit", Some(general)).await;
        let holds_general = fx.user("holds-general").await;
        let holds_specific = fx.user("holds-specific").await;
        fx.edge(Relation::UserPermission, holds_general, general).await;
        fx.edge(Relation::UserPermission, holds_specific, specific).await;

        let ancestor = fx.engine(PermissionInheritance::AncestorGrantsDescendant);
        assert!(ancestor.has_permission(&user(holds_general), &perm(specific)).await.unwrap());
        assert!(!ancestor.has_permission(&user(holds_specific), &perm(general)).await.unwrap());

        let descendant = fx.engine(PermissionInheritance::DescendantGrantsAncestor);
        assert!(!descendant.has_permission(&user(holds_general), &perm(specific)).await.unwrap());
        assert!(descendant.has_permission(&user(holds_specific), &perm(general)).await.unwrap());

        let disabled = fx.engine(PermissionInheritance::Disabled);
        assert!(!disabled.has_permission(&user(holds_general), &perm(specific)).await.unwrap());
        assert!(!disabled.has_permission(&user(holds_specific), &perm(general)).await.unwrap());
    }

    #[tokio::test]
    async fn principal_agrees_with_predicates() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let (editor, writer) = (fx.role("Editor").await, fx.role("Writer").await);
        fx.role_parent(writer, editor).await;
        let content = fx.permission("content", None).await;
        let publish = fx.permission("content.publish", Some(content)).await;
        let draft = fx.permission("content.draft", Some(content)).await;
        let billing = fx.permission("billing", None).await;
        fx.edge(Relation::RolePermission, editor, publish).await;
        fx.edge(Relation::UserRole, alice, writer).await;

        let all = [content, publish, draft, billing];
        for inheritance in [
            PermissionInheritance::AncestorGrantsDescendant,
            PermissionInheritance::DescendantGrantsAncestor,
            PermissionInheritance::Disabled,
        ] {
            let engine = fx.engine(inheritance);
            let principal = engine.principal(&user(alice)).await.unwrap();
            assert_eq!(principal.roles, HashSet::from([editor, writer]));
            for p in all {
                assert_eq!(
                    principal.has_permission(p),
                    engine.has_permission(&user(alice), &perm(p)).await.unwrap(),
                    "{inheritance} disagrees on {p}"
                );
            }
        }
    }

    #[tokio::test]
    async fn check_combines_roles_and_permissions() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let (editor, admin) = (fx.role("Editor").await, fx.role("Admin").await);
        let edit = fx.permission("posts.edit", None).await;
        fx.edge(Relation::UserRole, alice, editor).await;
        fx.edge(Relation::RolePermission, editor, edit).await;

        let engine = fx.engine(PermissionInheritance::default());
        let any = AccessQuery::any().role(admin).permission(edit);
        let all = AccessQuery::all().role(admin).permission(edit);
        let by_key = AccessQuery::all().role("editor").permission("posts_edit");

        assert!(engine.check(&user(alice), &any).await.unwrap());
        assert!(!engine.check(&user(alice), &all).await.unwrap());
        assert!(engine.check(&user(alice), &by_key).await.unwrap());
    }

    #[tokio::test]
    async fn check_rejects_empty_and_unknown_inputs() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let engine = fx.engine(PermissionInheritance::default());

        let empty = engine.check(&Lookup::key("ghost"), &AccessQuery::any()).await;
        assert!(matches!(empty, Err(AppError::InvalidQuery(_))));

        let unknown = engine
            .check(&user(alice), &AccessQuery::any().role("missing"))
            .await;
        assert!(matches!(unknown, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let fx = Fixture::new();
        let p = fx.permission("anything", None).await;
        let engine = fx.engine(PermissionInheritance::default());

        let result = engine.has_permission(&Lookup::Id(Uuid::new_v4()), &perm(p)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn loaded_entities_are_checked_against_the_store() {
        let fx = Fixture::new();
        let alice = fx.user("alice").await;
        let editor = fx.role("Editor").await;
        let edit = fx.permission("posts.edit", None).await;
        fx.edge(Relation::UserPermission, alice, edit).await;
        fx.edge(Relation::UserRole, alice, editor).await;

        let engine = fx.engine(PermissionInheritance::default());
        let loaded = fx.store.get_user(alice).await.unwrap().unwrap();
        let entity: UserRef = loaded.into();
        assert!(engine.has_permission(&entity, &perm(edit)).await.unwrap());

        let editor_role = fx.store.get_role(editor).await.unwrap().unwrap();
        fx.store.delete_user(alice).await.unwrap();
        fx.store.delete_role(editor).await.unwrap();

        let by_id = engine.has_permission(&user(alice), &perm(edit)).await;
        let by_entity = engine.has_permission(&entity, &perm(edit)).await;
        assert!(matches!(by_id, Err(AppError::NotFound(_))));
        assert!(matches!(by_entity, Err(AppError::NotFound(_))));

        let bob = fx.user("bob").await;
        let stale_role = engine.has_role(&user(bob), &editor_role.into()).await;
        assert!(matches!(stale_role, Err(AppError::NotFound(_))));
    }
}
