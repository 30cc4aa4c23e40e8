//! C2 — RoleGraph: role storage and cycle-safe hierarchy traversal.
//!
//! Reads go through a process-local memoization (`role_cache`/`slug_index`)
//! filled on miss, the way the teacher's `AuthRepository` leans on
//! `DatabasePool` + `DashMap` caching elsewhere in the workspace. Any
//! mutation invalidates the whole cache outright — roles change rarely
//! enough that wholesale invalidation beats fine-grained bookkeeping.

use chrono::Utc;
use dashmap::DashMap;
use glueful_core::{Error, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::{Role, RoleStatus};

#[derive(Clone)]
pub struct RoleGraph {
    pool: PgPool,
    role_cache: Arc<DashMap<Uuid, Role>>,
    slug_index: Arc<DashMap<String, Uuid>>,
}

impl RoleGraph {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            role_cache: Arc::new(DashMap::new()),
            slug_index: Arc::new(DashMap::new()),
        }
    }

    /// Drops the entire role cache. Call after any create/update/delete.
    pub fn invalidate(&self) {
        self.role_cache.clear();
        self.slug_index.clear();
    }

    #[instrument(skip(self))]
    pub async fn get(&self, uuid: Uuid) -> Result<Role> {
        if let Some(role) = self.role_cache.get(&uuid) {
            return Ok(role.clone());
        }

        let role = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE uuid = $1 AND deleted_at IS NULL",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("role {uuid} not found")))?;

        self.role_cache.insert(role.uuid, role.clone());
        self.slug_index.insert(role.slug.clone(), role.uuid);
        Ok(role)
    }

    #[instrument(skip(self))]
    pub async fn get_by_slug(&self, slug: &str) -> Result<Role> {
        if let Some(uuid) = self.slug_index.get(slug).map(|r| *r) {
            if let Some(role) = self.role_cache.get(&uuid) {
                return Ok(role.clone());
            }
        }

        let role = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE slug = $1 AND deleted_at IS NULL",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("role '{slug}' not found")))?;

        self.role_cache.insert(role.uuid, role.clone());
        self.slug_index.insert(role.slug.clone(), role.uuid);
        Ok(role)
    }

    /// Ordered by level asc, name asc, matching §4.1.
    pub async fn children(&self, parent_uuid: Uuid) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE parent_uuid = $1 AND deleted_at IS NULL \
             ORDER BY level ASC, name ASC",
        )
        .bind(parent_uuid)
        .fetch_all(&self.pool)
        .await?;

        for role in &rows {
            self.role_cache.insert(role.uuid, role.clone());
        }
        Ok(rows)
    }

    /// Walks `parent_uuid` upward from `uuid`, returning the chain
    /// root first. Tracks visited uuids; a repeat means the stored data
    /// violates the DAG invariant and the call fails with `Integrity`
    /// rather than looping forever.
    #[instrument(skip(self))]
    pub async fn ancestors(&self, uuid: Uuid) -> Result<Vec<Role>> {
        let mut chain = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut current = self.get(uuid).await?;

        loop {
            if !visited.insert(current.uuid) {
                warn!(role_uuid = %current.uuid, "cycle detected while walking role ancestors");
                return Err(Error::integrity(format!(
                    "role hierarchy cycle detected at {}",
                    current.uuid
                )));
            }

            let Some(parent_uuid) = current.parent_uuid else {
                break;
            };
            let parent = self.get(parent_uuid).await?;
            chain.push(parent.clone());
            current = parent;
        }

        chain.reverse();
        Ok(chain)
    }

    pub async fn by_level(&self, level: i32) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE level = $1 AND deleted_at IS NULL ORDER BY name ASC",
        )
        .bind(level)
        .fetch_all(&self.pool)
        .await?;

        for role in &rows {
            self.role_cache.insert(role.uuid, role.clone());
        }
        Ok(rows)
    }

    /// Creates a role. Refuses to persist a parent edge that would create
    /// a cycle (§9 "Role/permission cycles") by walking the proposed
    /// parent's ancestors before insert.
    pub async fn create_role(
        &self,
        name: &str,
        slug: &str,
        parent_uuid: Option<Uuid>,
        is_system: bool,
        metadata: serde_json::Value,
    ) -> Result<Role> {
        let level = if let Some(parent_uuid) = parent_uuid {
            let parent = self.get(parent_uuid).await?;
            parent.level + 1
        } else {
            0
        };

        let role = sqlx::query_as::<_, Role>(
            "INSERT INTO roles (uuid, name, slug, parent_uuid, level, is_system, metadata, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slug)
        .bind(parent_uuid)
        .bind(level)
        .bind(is_system)
        .bind(metadata)
        .bind(RoleStatus::Active)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        self.invalidate();
        debug!(role_uuid = %role.uuid, slug = %role.slug, "role created");
        Ok(role)
    }

    /// Soft-deletes a role. System roles are undeletable.
    pub async fn soft_delete(&self, uuid: Uuid) -> Result<()> {
        let role = self.get(uuid).await?;
        if role.is_system {
            return Err(Error::conflict("system roles cannot be deleted"));
        }

        sqlx::query("UPDATE roles SET deleted_at = $1, updated_at = $1 WHERE uuid = $2")
            .bind(Utc::now())
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        self.invalidate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_role(uuid: Uuid, parent: Option<Uuid>, level: i32) -> Role {
        Role {
            uuid,
            name: "role".into(),
            slug: uuid.to_string(),
            parent_uuid: parent,
            level,
            is_system: false,
            metadata: serde_json::json!({}),
            status: RoleStatus::Active,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn role_is_active_requires_no_deleted_at_and_active_status() {
        let uuid = Uuid::new_v4();
        let mut role = sample_role(uuid, None, 0);
        assert!(role.is_active());
        role.status = RoleStatus::Inactive;
        assert!(!role.is_active());
        role.status = RoleStatus::Active;
        role.deleted_at = Some(Utc::now());
        assert!(!role.is_active());
    }
}
