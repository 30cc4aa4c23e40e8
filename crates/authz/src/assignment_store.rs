//! C3 — AssignmentStore: persists user<->role, role<->permission, and
//! user<->permission grants.
//!
//! Bulk paths translate into a single set-valued statement rather than a
//! loop of singletons (`ANY($1)` / batched `INSERT ... ON CONFLICT`),
//! mirroring the teacher's `assign_role_to_user`'s `ON CONFLICT DO NOTHING`
//! idiom in `auth/repository.rs`, generalized to cover scoped/expiring
//! grants and bulk permission assignment.

use chrono::Utc;
use glueful_core::Result;
use sqlx::{PgPool, QueryBuilder};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{
    BulkAssignResult, GrantOptions, Role, RolePermissionGrant, UserPermissionGrant, UserRoleGrant,
};

#[derive(Clone)]
pub struct AssignmentStore {
    pool: PgPool,
}

impl AssignmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent: returns the existing grant if `(user, role, scope)` is
    /// already present.
    #[instrument(skip(self, opts))]
    pub async fn assign_role(
        &self,
        user_uuid: Uuid,
        role_uuid: Uuid,
        opts: GrantOptions,
    ) -> Result<UserRoleGrant> {
        if let Some(existing) = sqlx::query_as::<_, UserRoleGrant>(
            "SELECT * FROM user_role_grants \
             WHERE user_uuid = $1 AND role_uuid = $2 AND scope IS NOT DISTINCT FROM $3",
        )
        .bind(user_uuid)
        .bind(role_uuid)
        .bind(&opts.scope)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(existing);
        }

        let grant = sqlx::query_as::<_, UserRoleGrant>(
            "INSERT INTO user_role_grants (uuid, user_uuid, role_uuid, scope, granted_by, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_uuid)
        .bind(role_uuid)
        .bind(&opts.scope)
        .bind(opts.granted_by)
        .bind(opts.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!(grant_uuid = %grant.uuid, %user_uuid, %role_uuid, "role assigned");
        Ok(grant)
    }

    pub async fn assign_permission_to_role(
        &self,
        role_uuid: Uuid,
        permission_uuid: Uuid,
        opts: GrantOptions,
    ) -> Result<RolePermissionGrant> {
        let grant = sqlx::query_as::<_, RolePermissionGrant>(
            "INSERT INTO role_permission_grants \
             (uuid, role_uuid, permission_uuid, resource_filter, constraints, granted_by, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(role_uuid)
        .bind(permission_uuid)
        .bind(&opts.resource_filter)
        .bind(&opts.constraints)
        .bind(opts.granted_by)
        .bind(opts.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(grant)
    }

    pub async fn assign_permission_to_user(
        &self,
        user_uuid: Uuid,
        permission_uuid: Uuid,
        opts: GrantOptions,
    ) -> Result<UserPermissionGrant> {
        let grant = sqlx::query_as::<_, UserPermissionGrant>(
            "INSERT INTO user_permission_grants \
             (uuid, user_uuid, permission_uuid, resource_filter, constraints, granted_by, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_uuid)
        .bind(permission_uuid)
        .bind(&opts.resource_filter)
        .bind(&opts.constraints)
        .bind(opts.granted_by)
        .bind(opts.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(grant)
    }

    /// Bulk-assigns a set of permissions to a role in one round trip.
    /// Duplicate permission uuids in the input (or ones already granted)
    /// collapse to a single stored grant, but all are counted as
    /// `success` (§8 scenario 6).
    #[instrument(skip(self, opts, permission_uuids))]
    pub async fn bulk_assign_permissions(
        &self,
        role_uuid: Uuid,
        permission_uuids: &[Uuid],
        opts: GrantOptions,
    ) -> Result<BulkAssignResult> {
        let mut result = BulkAssignResult::default();
        let mut tx = self.pool.begin().await?;

        let existing: Vec<Uuid> = sqlx::query_scalar(
            "SELECT permission_uuid FROM role_permission_grants \
             WHERE role_uuid = $1 AND permission_uuid = ANY($2) \
             AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(role_uuid)
        .bind(permission_uuids)
        .fetch_all(&mut *tx)
        .await?;

        let mut to_insert: Vec<Uuid> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for permission_uuid in permission_uuids {
            if !seen.insert(*permission_uuid) {
                result.success += 1;
                continue;
            }
            if existing.contains(permission_uuid) {
                result.success += 1;
                continue;
            }
            to_insert.push(*permission_uuid);
        }

        if !to_insert.is_empty() {
            let created_at = Utc::now();
            let mut builder = QueryBuilder::new(
                "INSERT INTO role_permission_grants \
                 (uuid, role_uuid, permission_uuid, resource_filter, constraints, granted_by, expires_at, created_at) ",
            );
            builder.push_values(&to_insert, |mut row, permission_uuid| {
                row.push_bind(Uuid::new_v4())
                    .push_bind(role_uuid)
                    .push_bind(*permission_uuid)
                    .push_bind(&opts.resource_filter)
                    .push_bind(&opts.constraints)
                    .push_bind(opts.granted_by)
                    .push_bind(opts.expires_at)
                    .push_bind(created_at);
            });
            builder.push(" ON CONFLICT DO NOTHING RETURNING *");

            match builder
                .build_query_as::<RolePermissionGrant>()
                .fetch_all(&mut *tx)
                .await
            {
                Ok(grants) => {
                    result.success += grants.len();
                    result.grants.extend(grants);
                }
                Err(err) => {
                    result.failed += to_insert.len();
                    tracing::warn!(%role_uuid, count = to_insert.len(), error = %err, "bulk permission assignment failed");
                }
            }
        }

        tx.commit().await?;
        Ok(result)
    }

    /// Deletes every existing non-expired grant for the role, then
    /// bulk-assigns the new set, inside one transaction.
    pub async fn replace_role_permissions(
        &self,
        role_uuid: Uuid,
        permission_uuids: &[Uuid],
        opts: GrantOptions,
    ) -> Result<BulkAssignResult> {
        sqlx::query(
            "DELETE FROM role_permission_grants \
             WHERE role_uuid = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(role_uuid)
        .execute(&self.pool)
        .await?;

        self.bulk_assign_permissions(role_uuid, permission_uuids, opts).await
    }

    /// Removes grants whose `expires_at <= now()` across all three grant
    /// tables. Returns the total rows removed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut tx = self.pool.begin().await?;

        for table in [
            "user_role_grants",
            "role_permission_grants",
            "user_permission_grants",
        ] {
            let result =
                sqlx::query(&format!("DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= now()"))
                    .execute(&mut *tx)
                    .await?;
            total += result.rows_affected();
        }

        tx.commit().await?;
        Ok(total)
    }

    /// Issues exactly one query regardless of how many uuids are
    /// requested (§4.2 batch-semantics contract). Result order matches
    /// the caller's input order.
    pub async fn roles_by_uuids(&self, uuids: &[Uuid]) -> Result<Vec<Role>> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE uuid = ANY($1) AND deleted_at IS NULL",
        )
        .bind(uuids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_uuid: std::collections::HashMap<Uuid, Role> =
            rows.into_iter().map(|r| (r.uuid, r)).collect();
        Ok(uuids.iter().filter_map(|u| by_uuid.remove(u)).collect())
    }

    /// Returns active (non-expired) role uuids assigned to a user,
    /// optionally narrowed by a scope filter matched with containment
    /// semantics (`scope @> filter`).
    pub async fn user_role_uuids(
        &self,
        user_uuid: Uuid,
        scope_filter: Option<&serde_json::Value>,
    ) -> Result<Vec<Uuid>> {
        let rows: Vec<Uuid> = match scope_filter {
            Some(filter) => {
                sqlx::query_scalar(
                    "SELECT role_uuid FROM user_role_grants \
                     WHERE user_uuid = $1 AND (expires_at IS NULL OR expires_at > now()) \
                     AND (scope IS NULL OR scope @> $2)",
                )
                .bind(user_uuid)
                .bind(filter)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT role_uuid FROM user_role_grants \
                     WHERE user_uuid = $1 AND (expires_at IS NULL OR expires_at > now())",
                )
                .bind(user_uuid)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn active_user_permission_grants(
        &self,
        user_uuid: Uuid,
        permission_uuid: Uuid,
    ) -> Result<Vec<UserPermissionGrant>> {
        let rows = sqlx::query_as::<_, UserPermissionGrant>(
            "SELECT * FROM user_permission_grants \
             WHERE user_uuid = $1 AND permission_uuid = $2 \
             AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(user_uuid)
        .bind(permission_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn active_role_permission_grants(
        &self,
        role_uuids: &[Uuid],
        permission_uuid: Uuid,
    ) -> Result<Vec<RolePermissionGrant>> {
        if role_uuids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, RolePermissionGrant>(
            "SELECT * FROM role_permission_grants \
             WHERE role_uuid = ANY($1) AND permission_uuid = $2 \
             AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(role_uuids)
        .bind(permission_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_permission_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<crate::models::Permission>> {
        let permission = sqlx::query_as::<_, crate::models::Permission>(
            "SELECT * FROM permissions WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(permission)
    }
}
