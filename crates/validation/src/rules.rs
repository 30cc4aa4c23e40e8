//! Built-in rule evaluators (§4.7 step 1c, rule semantics table).

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use validator::ValidateEmail;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

/// `(value, args) -> passes`.
pub type RuleEvaluator = Arc<dyn Fn(&Value, &[String]) -> bool + Send + Sync>;
/// `(fieldName, args) -> message`.
pub type MessageFn = Arc<dyn Fn(&str, &[String]) -> String + Send + Sync>;

fn is_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn string_len(value: &Value) -> Option<usize> {
    value.as_str().map(|s| s.chars().count())
}

fn arg_f64(args: &[String], idx: usize) -> f64 {
    args.get(idx).and_then(|a| a.parse::<f64>().ok()).unwrap_or(0.0)
}

/// Registers every rule named in §4.7's semantics table.
pub fn built_in_rules() -> Vec<(&'static str, RuleEvaluator, MessageFn)> {
    vec![
        (
            "required",
            Arc::new(|value: &Value, _args: &[String]| !is_empty(value)),
            Arc::new(|field: &str, _args: &[String]| format!("{field} is required.")),
        ),
        (
            "string",
            Arc::new(|value: &Value, _args: &[String]| value.is_string()),
            Arc::new(|field: &str, _args: &[String]| format!("{field} must be a string.")),
        ),
        (
            "int",
            Arc::new(|value: &Value, _args: &[String]| match value {
                Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false),
                _ => false,
            }),
            Arc::new(|field: &str, _args: &[String]| format!("{field} must be an integer.")),
        ),
        (
            "min",
            Arc::new(|value: &Value, args: &[String]| {
                let n = arg_f64(args, 0);
                if let Some(len) = string_len(value) {
                    (len as f64) >= n
                } else if let Some(v) = as_number(value) {
                    v >= n
                } else {
                    false
                }
            }),
            Arc::new(|field: &str, args: &[String]| {
                format!("{field} must be at least {} characters.", arg_f64(args, 0))
            }),
        ),
        (
            "max",
            Arc::new(|value: &Value, args: &[String]| {
                let n = arg_f64(args, 0);
                if let Some(len) = string_len(value) {
                    (len as f64) <= n
                } else if let Some(v) = as_number(value) {
                    v <= n
                } else {
                    false
                }
            }),
            Arc::new(|field: &str, args: &[String]| {
                format!("{field} must be at most {} characters.", arg_f64(args, 0))
            }),
        ),
        (
            "between",
            Arc::new(|value: &Value, args: &[String]| {
                let (a, b) = (arg_f64(args, 0), arg_f64(args, 1));
                as_number(value).map(|v| v >= a && v <= b).unwrap_or(false)
            }),
            Arc::new(|field: &str, args: &[String]| {
                format!(
                    "{field} must be a number between {} and {}.",
                    arg_f64(args, 0),
                    arg_f64(args, 1)
                )
            }),
        ),
        (
            "email",
            Arc::new(|value: &Value, _args: &[String]| match value.as_str() {
                Some(s) => EMAIL_RE.is_match(s) && s.validate_email(),
                None => false,
            }),
            Arc::new(|field: &str, _args: &[String]| format!("{field} must be a valid email address.")),
        ),
        (
            "in",
            Arc::new(|value: &Value, args: &[String]| match value.as_str() {
                Some(s) => args.iter().any(|a| a == s),
                None => false,
            }),
            Arc::new(|field: &str, args: &[String]| format!("{field} must be one of: {}.", args.join(", "))),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(name: &str, value: &Value, args: &[String]) -> bool {
        built_in_rules()
            .into_iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, f, _)| f(value, args))
            .unwrap()
    }

    #[test]
    fn required_treats_zero_and_false_as_present() {
        assert!(eval("required", &Value::Number(0.into()), &[]));
        assert!(eval("required", &Value::Bool(false), &[]));
        assert!(eval("required", &Value::String("0".into()), &[]));
        assert!(!eval("required", &Value::Null, &[]));
        assert!(!eval("required", &Value::String("".into()), &[]));
    }

    #[test]
    fn min_counts_characters_for_strings() {
        assert!(!eval("min", &Value::String("Jo".into()), &["3".to_string()]));
        assert!(eval("min", &Value::String("Joe".into()), &["3".to_string()]));
    }

    #[test]
    fn between_requires_numeric_value() {
        assert!(eval(
            "between",
            &Value::Number(25.into()),
            &["18".to_string(), "99".to_string()]
        ));
        assert!(!eval(
            "between",
            &Value::String("not-a-number".into()),
            &["18".to_string(), "99".to_string()]
        ));
    }

    #[test]
    fn email_requires_regex_and_library_validation() {
        assert!(eval("email", &Value::String("jo@example.com".into()), &[]));
        assert!(!eval("email", &Value::String("not-an-email".into()), &[]));
    }
}
