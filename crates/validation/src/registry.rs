//! C8 — ConstraintRegistry: discovers and activates extension-contributed
//! rules without ever letting a malformed extension poison the host
//! Validator (§4.8).

use dashmap::DashMap;
use tracing::warn;

use crate::rules::{MessageFn, RuleEvaluator};
use crate::validator::Validator;

/// A candidate extension rule, analogous to a `Constraint` class paired
/// with its `ConstraintValidator` in the source layout.
pub struct ExtensionRule {
    pub name: String,
    pub evaluator: RuleEvaluator,
    pub message: MessageFn,
}

struct RegisteredExtension {
    evaluator: RuleEvaluator,
    message: MessageFn,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStatistics {
    pub registered: usize,
    pub skipped: usize,
}

/// Process-global, keyed by rule name; re-registration under the same
/// name is idempotent.
pub struct ConstraintRegistry {
    extensions: DashMap<String, RegisteredExtension>,
    skipped: std::sync::atomic::AtomicUsize,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self {
            extensions: DashMap::new(),
            skipped: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Registers one extension rule. A rule with an empty name is
    /// considered malformed and is logged and skipped rather than
    /// rejected with an error — discovery failures must never stop the
    /// rest of the batch from loading.
    pub fn register(&self, rule: ExtensionRule) {
        if rule.name.trim().is_empty() {
            warn!("skipping extension rule with empty name");
            self.skipped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        }
        self.extensions.insert(
            rule.name,
            RegisteredExtension {
                evaluator: rule.evaluator,
                message: rule.message,
            },
        );
    }

    /// Discovers and registers every rule in `candidates`, isolating
    /// individual failures per §4.8.
    pub fn discover(&self, candidates: Vec<ExtensionRule>) {
        for candidate in candidates {
            self.register(candidate);
        }
    }

    pub fn unregister(&self, name: &str) {
        self.extensions.remove(name);
    }

    pub fn lookup(&self, name: &str) -> Option<(RuleEvaluator, MessageFn)> {
        self.extensions.get(name).map(|entry| (entry.evaluator.clone(), entry.message.clone()))
    }

    pub fn statistics(&self) -> RegistryStatistics {
        RegistryStatistics {
            registered: self.extensions.len(),
            skipped: self.skipped.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Activates every currently registered extension rule on `validator`.
    pub fn apply_to(&self, validator: &Validator) {
        for entry in self.extensions.iter() {
            validator.add_rule(entry.key().clone(), entry.value().evaluator.clone(), entry.value().message.clone());
        }
    }
}

impl Default for ConstraintRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn dummy_rule(name: &str) -> ExtensionRule {
        ExtensionRule {
            name: name.to_string(),
            evaluator: std::sync::Arc::new(|_v: &Value, _a: &[String]| true),
            message: std::sync::Arc::new(|field: &str, _a: &[String]| format!("{field} failed.")),
        }
    }

    #[test]
    fn malformed_extension_is_skipped_not_rejected() {
        let registry = ConstraintRegistry::new();
        registry.discover(vec![dummy_rule(""), dummy_rule("always_true")]);

        let stats = registry.statistics();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.skipped, 1);
        assert!(registry.lookup("always_true").is_some());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn re_registration_under_the_same_name_is_idempotent() {
        let registry = ConstraintRegistry::new();
        registry.register(dummy_rule("custom"));
        registry.register(dummy_rule("custom"));
        assert_eq!(registry.statistics().registered, 1);
    }
}
