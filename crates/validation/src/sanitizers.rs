//! Built-in sanitizer filters (§4.7 step 1b). Sanitizers never fail; they
//! transform a value in place and are idempotent — applying a filter set
//! twice must equal applying it once (V1).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::descriptor::SanitizeFilter;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

fn map_str(value: &Value, f: impl FnOnce(&str) -> String) -> Value {
    match as_str(value) {
        Some(s) => Value::String(f(s)),
        None => value.clone(),
    }
}

pub fn apply_sanitizer(filter: SanitizeFilter, value: &Value) -> Value {
    match filter {
        SanitizeFilter::Trim => map_str(value, |s| s.trim().to_string()),
        SanitizeFilter::StripTags | SanitizeFilter::RemoveHtml => {
            map_str(value, |s| TAG_RE.replace_all(s, "").into_owned())
        }
        SanitizeFilter::SanitizeEmail => map_str(value, |s| s.trim().to_lowercase()),
        SanitizeFilter::SanitizeString => {
            map_str(value, |s| TAG_RE.replace_all(s.trim(), "").into_owned())
        }
        SanitizeFilter::Intval => {
            let n = match value {
                Value::Number(n) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
                Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0) as i64,
                Value::Bool(b) => *b as i64,
                _ => 0,
            };
            Value::Number(n.into())
        }
        SanitizeFilter::Floatval => {
            let n = match value {
                Value::Number(n) => n.as_f64().unwrap_or(0.0),
                Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
                Value::Bool(b) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Number(0.into()))
        }
        SanitizeFilter::Boolval => {
            let b = match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
                Value::Null => false,
                _ => true,
            };
            Value::Bool(b)
        }
        SanitizeFilter::Lowercase => map_str(value, |s| s.to_lowercase()),
        SanitizeFilter::Uppercase => map_str(value, |s| s.to_uppercase()),
        SanitizeFilter::NormalizeWhitespace => {
            map_str(value, |s| WHITESPACE_RE.replace_all(s.trim(), " ").into_owned())
        }
        SanitizeFilter::RemoveWhitespace => {
            map_str(value, |s| s.chars().filter(|c| !c.is_whitespace()).collect())
        }
        SanitizeFilter::SanitizeUrl => map_str(value, |s| s.trim().to_string()),
        SanitizeFilter::Alphanumeric => {
            map_str(value, |s| s.chars().filter(|c| c.is_alphanumeric()).collect())
        }
        SanitizeFilter::Alpha => map_str(value, |s| s.chars().filter(|c| c.is_alphabetic()).collect()),
        SanitizeFilter::Numeric => map_str(value, |s| s.chars().filter(|c| c.is_ascii_digit()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idempotent(filter: SanitizeFilter, input: Value) {
        let once = apply_sanitizer(filter, &input);
        let twice = apply_sanitizer(filter, &once);
        assert_eq!(once, twice, "{filter:?} is not idempotent for {input:?}");
    }

    #[test]
    fn built_in_filters_are_idempotent() {
        idempotent(SanitizeFilter::Trim, Value::String("  hi  ".into()));
        idempotent(SanitizeFilter::StripTags, Value::String("<b>hi</b>".into()));
        idempotent(SanitizeFilter::SanitizeEmail, Value::String(" Jo@Example.COM ".into()));
        idempotent(SanitizeFilter::Intval, Value::String("25".into()));
        idempotent(SanitizeFilter::Floatval, Value::String("3.5".into()));
        idempotent(SanitizeFilter::Boolval, Value::String("true".into()));
        idempotent(SanitizeFilter::Lowercase, Value::String("HeLLo".into()));
        idempotent(SanitizeFilter::NormalizeWhitespace, Value::String("a   b\t c".into()));
        idempotent(SanitizeFilter::RemoveWhitespace, Value::String(" a b c ".into()));
        idempotent(SanitizeFilter::Alphanumeric, Value::String("a1!b2@".into()));
    }

    #[test]
    fn trim_removes_surrounding_whitespace() {
        let sanitized = apply_sanitizer(SanitizeFilter::Trim, &Value::String(" Jo ".into()));
        assert_eq!(sanitized, Value::String("Jo".into()));
    }

    #[test]
    fn intval_parses_numeric_strings() {
        let sanitized = apply_sanitizer(SanitizeFilter::Intval, &Value::String("25".into()));
        assert_eq!(sanitized, Value::Number(25.into()));
    }
}
