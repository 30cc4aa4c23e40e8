//! Authorization engine: hierarchical roles, scoped/temporal grants, and
//! per-request permission resolution.

pub mod assignment_store;
pub mod models;
pub mod permission_resolver;
pub mod role_graph;

pub use assignment_store::AssignmentStore;
pub use models::{
    BulkAssignResult, GrantOptions, Permission, Role, RolePermissionGrant, RoleStatus,
    UserPermissionGrant, UserRoleGrant,
};
pub use permission_resolver::{Context, PermissionCheckCache, PermissionResolver};
pub use role_graph::RoleGraph;
