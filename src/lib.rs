pub mod admin;
pub mod authz;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod models;
pub mod store;
pub mod utils;

// Re-export commonly used items for tests and embedders
pub use admin::AdminService;
pub use authz::{AccessQuery, AuthorizationEngine, Match, MutationGuard, PermissionInheritance, Principal};
pub use errors::{AppError, AppResult};
pub use store::{GraphStore, GraphTx, InMemoryStore, SqliteStore};
