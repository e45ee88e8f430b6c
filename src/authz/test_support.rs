//! In-memory graph builder shared by the authz unit tests.

use std::sync::Arc;

use uuid::Uuid;

use super::{AuthorizationEngine, PermissionInheritance};
use crate::models::{EdgeMetadata, Hierarchy, Permission, Relation, Role, User};
use crate::store::{GraphStore, InMemoryStore};
use crate::utils::{slugify, utc_now};

pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self { store: Arc::new(InMemoryStore::new()) }
    }

    pub fn shared(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    pub fn engine(&self, inheritance: PermissionInheritance) -> AuthorizationEngine {
        AuthorizationEngine::new(self.shared()).with_inheritance(inheritance)
    }

    pub async fn user(&self, name: &str) -> Uuid {
        let now = utc_now();
        let user = User { id: Uuid::new_v4(), name: name.to_string(), created_at: now, updated_at: now };
        self.store.insert_user(&user).await.unwrap();
        user.id
    }

    pub async fn role(&self, name: &str) -> Uuid {
        let now = utc_now();
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slugify(name).unwrap(),
            description: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_role(&role).await.unwrap();
        role.id
    }

    pub async fn permission(&self, name: &str, parent_id: Option<Uuid>) -> Uuid {
        let now = utc_now();
        let permission = Permission {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slugify(name).unwrap(),
            description: None,
            parent_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_permission(&permission).await.unwrap();
        permission.id
    }

    pub async fn edge(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) {
        self.store
            .insert_edge(relation, subject_id, object_id, EdgeMetadata::new())
            .await
            .unwrap();
    }

    /// Writes the edge unvalidated, straight through a transaction.
    pub async fn role_parent(&self, child_id: Uuid, parent_id: Uuid) {
        let mut tx = self.store.begin(Hierarchy::Role).await.unwrap();
        tx.insert_edge(Relation::RoleParent, child_id, parent_id, EdgeMetadata::new())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }
}
