//! Data model for the authorization engine: roles, permissions, and the
//! three grant shapes that connect them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub uuid: Uuid,
    pub name: String,
    pub slug: String,
    pub parent_uuid: Option<Uuid>,
    pub level: i32,
    pub is_system: bool,
    pub metadata: serde_json::Value,
    pub status: RoleStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && matches!(self.status, RoleStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub uuid: Uuid,
    pub name: String,
    pub slug: String,
    pub category: Option<String>,
    pub resource_type: Option<String>,
    pub is_system: bool,
    pub metadata: serde_json::Value,
}

/// `UserRoleGrant` — a subject's assignment to a role, optionally scoped
/// and time-limited. `(user_uuid, role_uuid, scope)` is effectively
/// unique; re-assigning returns the existing grant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRoleGrant {
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub role_uuid: Uuid,
    pub scope: Option<serde_json::Value>,
    pub granted_by: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserRoleGrant {
    pub fn is_active(&self) -> bool {
        self.expires_at.map(|e| e > Utc::now()).unwrap_or(true)
    }
}

/// `RolePermissionGrant` — a permission attached to a role, optionally
/// filtered by resource and constrained by a key/operator/value map.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RolePermissionGrant {
    pub uuid: Uuid,
    pub role_uuid: Uuid,
    pub permission_uuid: Uuid,
    pub resource_filter: Option<serde_json::Value>,
    pub constraints: Option<serde_json::Value>,
    pub granted_by: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RolePermissionGrant {
    pub fn is_active(&self) -> bool {
        self.expires_at.map(|e| e > Utc::now()).unwrap_or(true)
    }
}

/// `UserPermissionGrant` — a direct grant bypassing roles. Same shape as
/// `RolePermissionGrant` with `user_uuid` in place of `role_uuid`. Checked
/// before role-derived grants in `PermissionResolver::can`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserPermissionGrant {
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub permission_uuid: Uuid,
    pub resource_filter: Option<serde_json::Value>,
    pub constraints: Option<serde_json::Value>,
    pub granted_by: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserPermissionGrant {
    pub fn is_active(&self) -> bool {
        self.expires_at.map(|e| e > Utc::now()).unwrap_or(true)
    }
}

/// Aggregate result of a bulk assignment call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkAssignResult {
    pub success: usize,
    pub failed: usize,
    pub grants: Vec<RolePermissionGrant>,
}

/// Options shared by the grant-creating calls.
#[derive(Debug, Clone, Default)]
pub struct GrantOptions {
    pub scope: Option<serde_json::Value>,
    pub resource_filter: Option<serde_json::Value>,
    pub constraints: Option<serde_json::Value>,
    pub granted_by: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}
