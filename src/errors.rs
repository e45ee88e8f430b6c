use std::borrow::Cow;

use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

// SQLite primary / extended result codes that mean "another writer holds the lock".
const SQLITE_BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("self reference: {0}")]
    SelfReference(String),
    #[error("circular dependency: {0}")]
    CircularDependency(String),
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("database error")]
    Database(#[source] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn self_reference(id: Uuid) -> Self {
        Self::SelfReference(format!("{id} cannot be its own parent"))
    }

    pub fn circular(parent_id: Uuid, child_id: Uuid) -> Self {
        Self::CircularDependency(format!(
            "{child_id} is already an ancestor of {parent_id}"
        ))
    }

    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::UniqueViolation(message.into())
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a write that failed with this error may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::UniqueViolation(db.message().to_string());
            }
            if db.is_foreign_key_violation() {
                return Self::NotFound(format!("referenced entity does not exist ({})", db.message()));
            }
            if db.is_check_violation() {
                return Self::BadRequest(db.message().to_string());
            }
            let code: Option<Cow<'_, str>> = db.code();
            if code.map(|c| SQLITE_BUSY_CODES.contains(&c.as_ref())).unwrap_or(false) {
                return Self::Conflict(db.message().to_string());
            }
        }
        Self::Database(err)
    }
}
