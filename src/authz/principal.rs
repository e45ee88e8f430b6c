use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

/// Effective access of one user at the time it was computed.
///
/// `roles` holds direct roles plus all their ancestors. `permissions` holds
/// every permission the user would pass a check for under the engine's
/// inheritance policy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub roles: HashSet<Uuid>,
    pub permissions: HashSet<Uuid>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Uuid>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Uuid>) -> Self {
        self.permissions = permissions.into_iter().collect();
        self
    }

    pub fn has_role(&self, role_id: Uuid) -> bool {
        self.roles.contains(&role_id)
    }

    pub fn has_permission(&self, permission_id: Uuid) -> bool {
        self.permissions.contains(&permission_id)
    }
}
