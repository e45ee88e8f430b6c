pub mod assignment;
pub mod lookup;
pub mod permission;
pub mod role;
pub mod user;

pub use assignment::{Assignment, EdgeMetadata, Hierarchy, PermissionParentChange, Relation};
pub use lookup::{Lookup, PermissionRef, RoleRef, UserRef};
pub use permission::{NewPermission, Permission};
pub use role::{NewRole, Role};
pub use user::{NewUser, User};
