use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::Relation;
use crate::store::GraphStore;

/// Existence checks and enumerations over the edge relations.
#[derive(Clone)]
pub struct AssignmentIndex {
    store: Arc<dyn GraphStore>,
}

impl AssignmentIndex {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn has_edge(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<bool> {
        self.store.edge_exists(relation, subject_id, object_id).await
    }

    /// Unordered; treat as a set.
    pub async fn objects_for(&self, relation: Relation, subject_id: Uuid) -> AppResult<HashSet<Uuid>> {
        self.store.objects_for_subject(relation, subject_id).await
    }

    /// Union of `objects_for` over several subjects.
    pub async fn objects_for_all(
        &self,
        relation: Relation,
        subject_ids: impl IntoIterator<Item = Uuid>,
    ) -> AppResult<HashSet<Uuid>> {
        let mut objects = HashSet::new();
        for subject_id in subject_ids {
            objects.extend(self.objects_for(relation, subject_id).await?);
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeMetadata, Role, User};
    use crate::store::InMemoryStore;
    use crate::utils::utc_now;

    fn user(name: &str) -> User {
        let now = utc_now();
        User { id: Uuid::new_v4(), name: name.to_string(), created_at: now, updated_at: now }
    }

    fn role(name: &str) -> Role {
        let now = utc_now();
        Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn reports_direct_edges_only() {
        let store = Arc::new(InMemoryStore::new());
        let alice = user("alice");
        let (editor, viewer) = (role("Editor"), role("Viewer"));
        store.insert_user(&alice).await.unwrap();
        store.insert_role(&editor).await.unwrap();
        store.insert_role(&viewer).await.unwrap();
        store
            .insert_edge(Relation::UserRole, alice.id, editor.id, EdgeMetadata::new())
            .await
            .unwrap();

        let index = AssignmentIndex::new(store);
        assert!(index.has_edge(Relation::UserRole, alice.id, editor.id).await.unwrap());
        assert!(!index.has_edge(Relation::UserRole, alice.id, viewer.id).await.unwrap());
        assert_eq!(
            index.objects_for(Relation::UserRole, alice.id).await.unwrap(),
            HashSet::from([editor.id])
        );
        assert!(index.objects_for(Relation::UserPermission, alice.id).await.unwrap().is_empty());
    }
}
