use crate::errors::{AppError, AppResult};
use crate::models::{PermissionRef, RoleRef};

/// How the individual checks of an `AccessQuery` combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Match {
    /// At least one role or permission must be held.
    #[default]
    Any,
    /// Every role and permission must be held.
    All,
}

/// Input of the unified `AuthorizationEngine::check`.
#[derive(Debug, Clone, Default)]
pub struct AccessQuery {
    pub roles: Vec<RoleRef>,
    pub permissions: Vec<PermissionRef>,
    pub mode: Match,
}

impl AccessQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn any() -> Self {
        Self::new().with_mode(Match::Any)
    }

    pub fn all() -> Self {
        Self::new().with_mode(Match::All)
    }

    pub fn with_mode(mut self, mode: Match) -> Self {
        self.mode = mode;
        self
    }

    pub fn role(mut self, role: impl Into<RoleRef>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn permission(mut self, permission: impl Into<PermissionRef>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    /// Rejects a query that names neither a role nor a permission.
    pub fn validate(&self) -> AppResult<()> {
        if self.roles.is_empty() && self.permissions.is_empty() {
            return Err(AppError::invalid_query(
                "at least one role or permission must be supplied",
            ));
        }
        Ok(())
    }
}
