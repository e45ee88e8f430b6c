use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// RELATIONS
// =============================================================================

/// The four edge relations. Each edge points from a subject to an object and
/// is unique on that pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// user -> role
    UserRole,
    /// user -> permission
    UserPermission,
    /// role -> permission
    RolePermission,
    /// child role -> parent role
    RoleParent,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::UserRole => "user_role",
            Relation::UserPermission => "user_permission",
            Relation::RolePermission => "role_permission",
            Relation::RoleParent => "role_parent",
        }
    }

    /// Hierarchy edges may only be written through the mutation guard.
    pub fn is_hierarchy(&self) -> bool {
        matches!(self, Relation::RoleParent)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parent-pointing hierarchy the resolver can walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hierarchy {
    /// Many-parent DAG stored as `role_parents` rows.
    Role,
    /// Single-parent forest stored as `permissions.parent_id`.
    Permission,
}

impl Hierarchy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hierarchy::Role => "role",
            Hierarchy::Permission => "permission",
        }
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ASSIGNMENT EDGES
// =============================================================================

/// Optional audit metadata carried by every edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl EdgeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assigned_by(mut self, actor_id: Uuid) -> Self {
        self.assigned_by = Some(actor_id);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// One persisted edge of any relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub relation: Relation,
    pub subject_id: Uuid,
    pub object_id: Uuid,
    #[serde(flatten)]
    pub metadata: EdgeMetadata,
    pub created_at: DateTime<Utc>,
}

impl Loggable for Assignment {
    fn entity_type(&self) -> &'static str { self.relation.as_str() }
    fn subject_id(&self) -> Uuid { self.subject_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// Permission-parent pointer change. Not a join row, so it gets its own
/// loggable shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionParentChange {
    pub permission_id: Uuid,
    pub previous_parent_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
}

impl Loggable for PermissionParentChange {
    fn entity_type(&self) -> &'static str { "permission_parent" }
    fn subject_id(&self) -> Uuid { self.permission_id }
    fn severity(&self) -> Severity { Severity::Critical }
}
