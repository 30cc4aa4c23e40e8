//! C7 — Validator: walks an `ObjectDescriptor` against a value map,
//! applying sanitizers then rules per field, then the object-level
//! constraints (§4.7).

use std::collections::HashMap;

use dashmap::DashMap;
use glueful_core::error::ErrorCode;
use glueful_core::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::descriptor::ObjectDescriptor;
use crate::rules::{built_in_rules, MessageFn, RuleEvaluator};
use crate::sanitizers::apply_sanitizer;

pub type ErrorMap = HashMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub sanitized: Map<String, Value>,
    pub errors: ErrorMap,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The `{ "errors": { field: [messages] } }` envelope (§6).
    pub fn error_envelope(&self) -> ErrorEnvelope<'_> {
        ErrorEnvelope { errors: &self.errors }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    pub errors: &'a ErrorMap,
}

struct RegisteredRule {
    evaluator: RuleEvaluator,
    message: MessageFn,
}

pub struct Validator {
    descriptors: DashMap<String, ObjectDescriptor>,
    rules: DashMap<String, RegisteredRule>,
    cache_descriptors: bool,
}

impl Validator {
    pub fn new(cache_descriptors: bool) -> Self {
        let rules = DashMap::new();
        for (name, evaluator, message) in built_in_rules() {
            rules.insert(name.to_string(), RegisteredRule { evaluator, message });
        }
        Self {
            descriptors: DashMap::new(),
            rules,
            cache_descriptors,
        }
    }

    /// Registers a compiled descriptor for `descriptor.class_name`. When
    /// descriptor caching is disabled (dev mode), re-registration always
    /// overwrites the prior entry rather than being treated as a no-op.
    pub fn register_descriptor(&self, descriptor: ObjectDescriptor) {
        if !self.cache_descriptors {
            self.descriptors.remove(&descriptor.class_name);
        }
        self.descriptors.insert(descriptor.class_name.clone(), descriptor);
    }

    /// Registers a custom rule for the lifetime of this Validator instance
    /// (§4.7's extension hook).
    pub fn add_rule(&self, name: impl Into<String>, evaluator: RuleEvaluator, message: MessageFn) {
        self.rules.insert(name.into(), RegisteredRule { evaluator, message });
    }

    #[instrument(skip(self, values))]
    pub fn validate_by_class(&self, class_name: &str, values: &Map<String, Value>) -> Result<ValidationOutcome> {
        let descriptor = self
            .descriptors
            .get(class_name)
            .ok_or_else(|| Error::not_found(format!("no descriptor registered for class '{class_name}'")))?;
        self.validate(&descriptor, values)
    }

    #[instrument(skip(self, descriptor, values))]
    pub fn validate(&self, descriptor: &ObjectDescriptor, values: &Map<String, Value>) -> Result<ValidationOutcome> {
        let mut sanitized = values.clone();
        let mut errors: ErrorMap = HashMap::new();

        for field in &descriptor.fields {
            if !values.contains_key(&field.name) {
                errors
                    .entry(field.name.clone())
                    .or_default()
                    .push(format!("{} is not initialized", field.name));
                continue;
            }

            let mut value = values[&field.name].clone();
            for sanitizer in &field.sanitizers {
                value = apply_sanitizer(*sanitizer, &value);
            }
            sanitized.insert(field.name.clone(), value.clone());

            for rule in &field.rules {
                let registered = self
                    .rules
                    .get(&rule.name)
                    .ok_or_else(|| Error::new(ErrorCode::UnknownRule, format!("unknown rule '{}'", rule.name)))?;
                if !(registered.evaluator)(&value, &rule.args) {
                    errors
                        .entry(field.name.clone())
                        .or_default()
                        .push((registered.message)(&field.name, &rule.args));
                }
            }
        }

        for constraint in &descriptor.fields_match {
            let a = sanitized.get(&constraint.a).cloned().unwrap_or(Value::Null);
            let b = sanitized.get(&constraint.b).cloned().unwrap_or(Value::Null);
            let both_empty = matches!(&a, Value::Null | Value::String(s) if s.is_empty())
                && matches!(&b, Value::Null | Value::String(s) if s.is_empty());
            if both_empty {
                continue;
            }
            let matches = match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) if constraint.case_sensitive => a == b,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => a == b,
            };
            if !matches {
                errors
                    .entry(constraint.b.clone())
                    .or_default()
                    .push(format!("{} must match {}.", constraint.b, constraint.a));
            }
        }

        for conditional in &descriptor.conditionals {
            let gate = sanitized.get(&conditional.gate_field).cloned().unwrap_or(Value::Null);
            if gate != conditional.gate_value {
                continue;
            }
            for (target_field, rule) in &conditional.rules {
                let value = sanitized.get(target_field).cloned().unwrap_or(Value::Null);
                let registered = self
                    .rules
                    .get(&rule.name)
                    .ok_or_else(|| Error::new(ErrorCode::UnknownRule, format!("unknown rule '{}'", rule.name)))?;
                if !(registered.evaluator)(&value, &rule.args) {
                    errors
                        .entry(target_field.clone())
                        .or_default()
                        .push((registered.message)(target_field, &rule.args));
                }
            }
        }

        for collection in &descriptor.collections {
            let Some(Value::Array(items)) = sanitized.get(&collection.field) else {
                continue;
            };
            for (idx, item) in items.iter().enumerate() {
                for rule in &collection.element_rules {
                    let registered = self
                        .rules
                        .get(&rule.name)
                        .ok_or_else(|| Error::new(ErrorCode::UnknownRule, format!("unknown rule '{}'", rule.name)))?;
                    if !(registered.evaluator)(item, &rule.args) {
                        let key = format!("{}[{}]", collection.field, idx);
                        errors.entry(key).or_default().push((registered.message)(&collection.field, &rule.args));
                    }
                }
            }
        }

        Ok(ValidationOutcome { sanitized, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ObjectDescriptor, Rule, SanitizeFilter};
    use serde_json::json;

    fn person_descriptor() -> ObjectDescriptor {
        ObjectDescriptor::builder("Person")
            .field("name", vec![SanitizeFilter::Trim], vec![Rule::required(), Rule::string(), Rule::min(3.0)])
            .field("age", vec![SanitizeFilter::Intval], vec![Rule::required(), Rule::int(), Rule::between(18.0, 99.0)])
            .field("email", vec![], vec![Rule::required(), Rule::email()])
            .build()
    }

    #[test]
    fn scenario_validator_rule_set() {
        let validator = Validator::new(true);
        let values = json!({ "name": " Jo ", "age": "25", "email": "jo@example.com" })
            .as_object()
            .unwrap()
            .clone();

        let outcome = validator.validate(&person_descriptor(), &values).unwrap();

        assert_eq!(outcome.sanitized.get("name"), Some(&json!("Jo")));
        assert_eq!(outcome.sanitized.get("age"), Some(&json!(25)));
        assert_eq!(
            outcome.errors.get("name"),
            Some(&vec!["name must be at least 3 characters.".to_string()])
        );
        assert_eq!(outcome.errors.len(), 1);

        let envelope = serde_json::to_value(outcome.error_envelope()).unwrap();
        assert_eq!(
            envelope,
            json!({ "errors": { "name": ["name must be at least 3 characters."] } })
        );
    }

    #[test]
    fn validation_is_pure_across_repeated_runs() {
        let validator = Validator::new(true);
        let values = json!({ "name": "Joe", "age": "25", "email": "jo@example.com" })
            .as_object()
            .unwrap()
            .clone();

        let first = validator.validate(&person_descriptor(), &values).unwrap();
        let second = validator.validate(&person_descriptor(), &values).unwrap();
        assert_eq!(first.errors, second.errors);
        assert!(first.is_valid());
    }

    #[test]
    fn missing_field_reports_not_initialized() {
        let validator = Validator::new(true);
        let values = json!({ "age": "25", "email": "jo@example.com" }).as_object().unwrap().clone();

        let outcome = validator.validate(&person_descriptor(), &values).unwrap();
        assert_eq!(outcome.errors.get("name"), Some(&vec!["name is not initialized".to_string()]));
    }

    #[test]
    fn unknown_rule_is_rejected() {
        let validator = Validator::new(true);
        let descriptor = ObjectDescriptor::builder("Widget")
            .field("sku", vec![], vec![Rule::named("not_a_real_rule", vec![])])
            .build();
        let values = json!({ "sku": "abc" }).as_object().unwrap().clone();

        let err = validator.validate(&descriptor, &values).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownRule);
    }

    #[test]
    fn extension_rule_does_not_change_previously_valid_results() {
        let validator = Validator::new(true);
        let values = json!({ "name": "Joe", "age": "25", "email": "jo@example.com" })
            .as_object()
            .unwrap()
            .clone();

        let before = validator.validate(&person_descriptor(), &values).unwrap();

        validator.add_rule(
            "always_passes",
            std::sync::Arc::new(|_value: &Value, _args: &[String]| true),
            std::sync::Arc::new(|field: &str, _args: &[String]| format!("{field} failed.")),
        );

        let mut descriptor = person_descriptor();
        descriptor.fields[0].rules.push(Rule::named("always_passes", vec![]));
        let after = validator.validate(&descriptor, &values).unwrap();

        assert_eq!(before.errors, after.errors);
    }
}
