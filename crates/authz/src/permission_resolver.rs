//! C1 — PermissionResolver: "does subject S have permission P in context
//! X?" against direct grants, role grants, expirations, resource filters
//! and the constraint operator grammar.

use dashmap::DashMap;
use glueful_core::error::ErrorCode;
use glueful_core::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use crate::assignment_store::AssignmentStore;
use crate::role_graph::RoleGraph;

pub type Context = HashMap<String, Value>;

/// Per-request memoization: authorization decisions keyed by
/// `(userUuid, permissionSlug, contextHash)`, plus the shorter-lived
/// `(userUuid) -> active role uuids` cache from §4.1. Construct one per
/// request and let it drop at request end; any grant or role mutation
/// during the request should be followed by a fresh cache.
#[derive(Default)]
pub struct PermissionCheckCache {
    decisions: DashMap<(Uuid, String, u64), bool>,
    active_roles: DashMap<Uuid, Vec<Uuid>>,
}

impl PermissionCheckCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stable_context_hash(context: &Context) -> u64 {
    let sorted: BTreeMap<&String, &Value> = context.iter().collect();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (key, value) in sorted {
        key.hash(&mut hasher);
        value.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Clone)]
pub struct PermissionResolver {
    role_graph: RoleGraph,
    assignments: AssignmentStore,
}

impl PermissionResolver {
    pub fn new(role_graph: RoleGraph, assignments: AssignmentStore) -> Self {
        Self {
            role_graph,
            assignments,
        }
    }

    /// `can(userUuid, permissionSlug, context) -> bool`. Never errors for
    /// an ordinary deny; only `Configuration`/`Integrity`/`Transient`
    /// store failures propagate.
    #[tracing::instrument(skip(self, context, cache))]
    pub async fn can(
        &self,
        user_uuid: Uuid,
        permission_slug: &str,
        context: &Context,
        cache: &PermissionCheckCache,
    ) -> Result<bool> {
        let context_hash = stable_context_hash(context);
        let cache_key = (user_uuid, permission_slug.to_string(), context_hash);
        if let Some(decision) = cache.decisions.get(&cache_key) {
            return Ok(*decision);
        }

        let decision = self.evaluate(user_uuid, permission_slug, context, cache).await?;
        cache.decisions.insert(cache_key, decision);
        Ok(decision)
    }

    async fn evaluate(
        &self,
        user_uuid: Uuid,
        permission_slug: &str,
        context: &Context,
        cache: &PermissionCheckCache,
    ) -> Result<bool> {
        let Some(permission) = self.assignments.get_permission_by_slug(permission_slug).await? else {
            tracing::debug!(%user_uuid, permission_slug, "permission slug not found, denying");
            return Ok(false);
        };

        let direct_grants = self
            .assignments
            .active_user_permission_grants(user_uuid, permission.uuid)
            .await?;
        for grant in &direct_grants {
            if grant.is_active() && grant_matches(context, grant.resource_filter.as_ref(), grant.constraints.as_ref()) {
                return Ok(true);
            }
        }

        let role_uuids = self.active_role_closure(user_uuid, cache).await?;
        if role_uuids.is_empty() {
            tracing::debug!(%user_uuid, permission_slug, "no active roles, denying");
            return Ok(false);
        }

        let role_grants = self
            .assignments
            .active_role_permission_grants(&role_uuids, permission.uuid)
            .await?;
        for grant in &role_grants {
            if grant.is_active() && grant_matches(context, grant.resource_filter.as_ref(), grant.constraints.as_ref()) {
                return Ok(true);
            }
        }

        tracing::debug!(%user_uuid, permission_slug, "no matching grant, denying");
        Ok(false)
    }

    /// `assigned ∪ ancestors(assigned)`, de-duplicated. Cached per
    /// request under `(userUuid) -> active role uuids`.
    async fn active_role_closure(&self, user_uuid: Uuid, cache: &PermissionCheckCache) -> Result<Vec<Uuid>> {
        if let Some(roles) = cache.active_roles.get(&user_uuid) {
            return Ok(roles.clone());
        }

        let assigned = self.assignments.user_role_uuids(user_uuid, None).await?;
        let mut closure: Vec<Uuid> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for role_uuid in &assigned {
            if seen.insert(*role_uuid) {
                closure.push(*role_uuid);
            }
        }

        for role_uuid in &assigned {
            // A cycle here is data corruption (§4.1/P5): surface as
            // `Integrity` rather than loop or silently truncate.
            let ancestors = self.role_graph.ancestors(*role_uuid).await.map_err(|err| {
                if err.code() == ErrorCode::RoleCycleDetected {
                    err
                } else {
                    Error::integrity(format!("failed resolving ancestors for role {role_uuid}")).with_cause(err)
                }
            })?;
            for ancestor in ancestors {
                if !ancestor.is_active() {
                    continue;
                }
                if seen.insert(ancestor.uuid) {
                    closure.push(ancestor.uuid);
                }
            }
        }

        cache.active_roles.insert(user_uuid, closure.clone());
        Ok(closure)
    }
}

/// Applies the resource-filter and constraint-map checks shared by direct
/// and role-derived grants.
fn grant_matches(
    context: &Context,
    resource_filter: Option<&Value>,
    constraints: Option<&Value>,
) -> bool {
    if let Some(filter) = resource_filter {
        let Some(pattern) = filter.as_str() else {
            return false;
        };
        match context.get("resource").and_then(Value::as_str) {
            Some(resource) if resource_matches(pattern, resource) => {}
            _ => return false,
        }
    }

    if let Some(Value::Object(map)) = constraints {
        for (key, constraint_value) in map {
            let Some(context_value) = context.get(key) else {
                return false;
            };
            if !evaluate_constraint(constraint_value, context_value) {
                return false;
            }
        }
    }

    true
}

/// (a) wildcard `*`, (b) exact equality, (c) glob with `*` -> `.*`
/// anchored regex. Absence of a filter is handled by the caller.
fn resource_matches(pattern: &str, resource: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern == resource {
        return true;
    }
    if pattern.contains('*') {
        let escaped = regex::escape(pattern).replace("\\*", ".*");
        if let Ok(re) = Regex::new(&format!("^{escaped}$")) {
            return re.is_match(resource);
        }
    }
    false
}

static TAGGED_OP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(>=|<=|!=|>|<|in|not_in):(.*)$").unwrap());

/// A constraint value is a list (membership), a tagged string
/// `"<op>:<value>"`, or a scalar (loose equality).
fn evaluate_constraint(constraint_value: &Value, context_value: &Value) -> bool {
    if let Value::Array(list) = constraint_value {
        return list.iter().any(|item| loosely_equal(item, context_value));
    }

    if let Value::String(s) = constraint_value {
        if let Some(captures) = TAGGED_OP.captures(s) {
            let op = &captures[1];
            let rhs = &captures[2];
            return apply_operator(op, rhs, context_value);
        }
    }

    loosely_equal(constraint_value, context_value)
}

fn apply_operator(op: &str, rhs: &str, context_value: &Value) -> bool {
    match op {
        "in" => rhs.split(',').any(|v| loosely_equal_str(v.trim(), context_value)),
        "not_in" => !rhs.split(',').any(|v| loosely_equal_str(v.trim(), context_value)),
        ">" | ">=" | "<" | "<=" => {
            let (Some(lhs), Some(rhs)) = (as_f64(context_value), rhs.trim().parse::<f64>().ok()) else {
                return false;
            };
            match op {
                ">" => lhs > rhs,
                ">=" => lhs >= rhs,
                "<" => lhs < rhs,
                "<=" => lhs <= rhs,
                _ => unreachable!(),
            }
        }
        "!=" => !loosely_equal_str(rhs.trim(), context_value),
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn loosely_equal_str(rhs: &str, context_value: &Value) -> bool {
    match context_value {
        Value::String(s) => s == rhs,
        Value::Number(n) => n.to_string() == rhs,
        Value::Bool(b) => b.to_string() == rhs,
        _ => false,
    }
}

fn loosely_equal(constraint_value: &Value, context_value: &Value) -> bool {
    if constraint_value == context_value {
        return true;
    }
    match (constraint_value, context_value) {
        (Value::String(s), other) | (other, Value::String(s)) => loosely_equal_str(s, other),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn list_constraint_checks_membership() {
        let constraint = json!(["acme", "globex"]);
        assert!(evaluate_constraint(&constraint, &json!("acme")));
        assert!(!evaluate_constraint(&constraint, &json!("initech")));
    }

    #[test]
    fn tagged_operator_handles_comparisons() {
        assert!(evaluate_constraint(&json!(">:100"), &json!(500)));
        assert!(!evaluate_constraint(&json!(">:1000"), &json!(500)));
        assert!(evaluate_constraint(&json!("in:acme,globex"), &json!("globex")));
        assert!(evaluate_constraint(&json!("not_in:acme"), &json!("globex")));
    }

    #[test]
    fn scalar_constraint_is_loose_equality() {
        assert!(evaluate_constraint(&json!("acme"), &json!("acme")));
        assert!(!evaluate_constraint(&json!("acme"), &json!("globex")));
    }

    #[test]
    fn resource_filter_supports_wildcard_exact_and_glob() {
        assert!(resource_matches("*", "invoices.read"));
        assert!(resource_matches("invoices.read", "invoices.read"));
        assert!(resource_matches("invoices.*", "invoices.read"));
        assert!(!resource_matches("invoices.*", "reports.read"));
    }

    #[test]
    fn grant_matches_requires_every_constraint_key_present() {
        let constraints = json!({"tenant": "acme"});
        assert!(grant_matches(&ctx(&[("tenant", json!("acme"))]), None, Some(&constraints)));
        assert!(!grant_matches(&ctx(&[]), None, Some(&constraints)));
        assert!(!grant_matches(&ctx(&[("tenant", json!("globex"))]), None, Some(&constraints)));
    }

    #[test]
    fn context_hash_is_stable_regardless_of_insertion_order() {
        let a = ctx(&[("tenant", json!("acme")), ("amount", json!(500))]);
        let b = ctx(&[("amount", json!(500)), ("tenant", json!("acme"))]);
        assert_eq!(stable_context_hash(&a), stable_context_hash(&b));
    }
}
