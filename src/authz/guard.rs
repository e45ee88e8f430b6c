use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::hierarchy::{HierarchyResolver, TxLinks};
use crate::errors::{AppError, AppResult};
use crate::models::{Assignment, EdgeMetadata, Hierarchy, PermissionParentChange, Relation};
use crate::store::{GraphStore, GraphTx};

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(25);

/// Validates hierarchy edges and persists them in the same transaction.
///
/// The transaction holds the hierarchy's write lock from `begin` to
/// `commit`, so the ancestor walk and the insert see one consistent graph.
/// Lock conflicts are retried a fixed number of times with linear backoff.
#[derive(Clone)]
pub struct MutationGuard {
    store: Arc<dyn GraphStore>,
    retries: u32,
    backoff: Duration,
}

impl MutationGuard {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Checks that `parent_id -> child_id` keeps the role graph acyclic,
    /// against the graph as seen by `tx`.
    pub async fn validate_role_parent_edge(
        tx: &mut dyn GraphTx,
        parent_id: Uuid,
        child_id: Uuid,
    ) -> AppResult<()> {
        if parent_id == child_id {
            return Err(AppError::self_reference(child_id));
        }
        for role_id in [parent_id, child_id] {
            if tx.get_role(role_id).await?.is_none() {
                return Err(AppError::not_found(format!("role {role_id}")));
            }
        }

        let mut roles = HierarchyResolver::new(TxLinks::new(tx, Hierarchy::Role));
        if roles.ancestors(parent_id).await?.contains(&child_id) {
            tracing::debug!(%parent_id, %child_id, "role parent edge would close a cycle");
            return Err(AppError::circular(parent_id, child_id));
        }
        Ok(())
    }

    /// Same discipline for the single-parent permission forest.
    pub async fn validate_permission_parent(
        tx: &mut dyn GraphTx,
        permission_id: Uuid,
        parent_id: Uuid,
    ) -> AppResult<()> {
        if parent_id == permission_id {
            return Err(AppError::self_reference(permission_id));
        }
        for id in [parent_id, permission_id] {
            if tx.get_permission(id).await?.is_none() {
                return Err(AppError::not_found(format!("permission {id}")));
            }
        }

        let mut permissions = HierarchyResolver::new(TxLinks::new(tx, Hierarchy::Permission));
        if permissions.ancestors(parent_id).await?.contains(&permission_id) {
            tracing::debug!(%parent_id, %permission_id, "permission parent would close a cycle");
            return Err(AppError::circular(parent_id, permission_id));
        }
        Ok(())
    }

    /// Makes `parent_id` a parent of `child_id`.
    pub async fn add_role_parent(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        self.retrying("add_role_parent", || {
            self.try_add_role_parent(parent_id, child_id, metadata.clone())
        })
        .await
    }

    /// Points `permission_id` at `parent_id`, or detaches it with `None`.
    pub async fn set_permission_parent(
        &self,
        permission_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> AppResult<PermissionParentChange> {
        self.retrying("set_permission_parent", || {
            self.try_set_permission_parent(permission_id, parent_id)
        })
        .await
    }

    async fn try_add_role_parent(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        let mut tx = self.store.begin(Hierarchy::Role).await?;
        Self::validate_role_parent_edge(tx.as_mut(), parent_id, child_id).await?;
        let edge = tx
            .insert_edge(Relation::RoleParent, child_id, parent_id, metadata)
            .await?;
        tx.commit().await?;
        Ok(edge)
    }

    async fn try_set_permission_parent(
        &self,
        permission_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> AppResult<PermissionParentChange> {
        let mut tx = self.store.begin(Hierarchy::Permission).await?;
        let current = tx
            .get_permission(permission_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("permission {permission_id}")))?;

        if let Some(parent_id) = parent_id {
            Self::validate_permission_parent(tx.as_mut(), permission_id, parent_id).await?;
        }
        tx.set_permission_parent(permission_id, parent_id).await?;
        tx.commit().await?;

        Ok(PermissionParentChange {
            permission_id,
            previous_parent_id: current.parent_id,
            parent_id,
        })
    }

    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && retries < self.retries => {
                    retries += 1;
                    tracing::warn!(operation, retries, error = %err, "hierarchy write conflict, retrying");
                    tokio::time::sleep(self.backoff * retries).await;
                }
                other => return other,
            }
        }
    }
}
