//! `{{...}}` template interpolation over node configs
//!
//! Before a node is invoked, every string leaf of its config is scanned for
//! `{{expr}}` placeholders and resolved against the current state snapshot.
//! This is a single pass: expression strings that control nodes later hand to
//! the expression evaluator are never re-templated, so there is no double
//! evaluation.
//!
//! Two substitution rules:
//!
//! - A string that is exactly one placeholder keeps the resolved value's
//!   type: `"{{count}}"` with `count = 3` becomes the number `3`.
//! - A string with surrounding text coerces resolved values to text:
//!   `"total: {{count}}"` becomes `"total: 3"`.
//!
//! A placeholder that fails to resolve (missing path, malformed expression)
//! is left literally in place. This is intentional: downstream nodes observe
//! absence instead of receiving an empty string.

use crate::expr::resolve_for_template;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid placeholder regex"))
}

/// Interpolate every string leaf of a config document
///
/// Maps and sequences are walked recursively; non-string leaves pass through
/// untouched.
pub fn interpolate_config(config: &Value, state: &Value) -> Value {
    match config {
        Value::String(s) => interpolate_string(s, state),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_config(item, state))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_config(v, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Interpolate a single string
///
/// Returns a non-string [`Value`] only for the whole-string placeholder case.
pub fn interpolate_string(input: &str, state: &Value) -> Value {
    let re = placeholder_re();

    // Whole-string placeholder keeps the resolved type.
    if let Some(captures) = re.captures(input) {
        let full = captures.get(0).expect("match exists");
        if full.start() == 0 && full.end() == input.len() {
            let expr = captures[1].trim();
            return match resolve_for_template(expr, state) {
                Some(value) => value,
                None => Value::String(input.to_string()),
            };
        }
    }

    let replaced = re.replace_all(input, |captures: &regex::Captures<'_>| {
        let expr = captures[1].trim();
        match resolve_for_template(expr, state) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => captures[0].to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Value {
        json!({
            "item": "b",
            "count": 3,
            "user": { "name": "Ada" },
            "flags": [true, false]
        })
    }

    #[test]
    fn test_whole_string_keeps_type() {
        let s = state();
        assert_eq!(interpolate_string("{{count}}", &s), json!(3));
        assert_eq!(interpolate_string("{{flags}}", &s), json!([true, false]));
        assert_eq!(interpolate_string("{{user}}", &s), json!({"name": "Ada"}));
        assert_eq!(interpolate_string("{{item}}", &s), json!("b"));
    }

    #[test]
    fn test_partial_placeholders_coerce_to_string() {
        let s = state();
        assert_eq!(
            interpolate_string("seen {{count}} of {{item}}", &s),
            json!("seen 3 of b")
        );
    }

    #[test]
    fn test_unresolved_placeholder_left_literal() {
        let s = state();
        assert_eq!(
            interpolate_string("{{missing.path}}", &s),
            json!("{{missing.path}}")
        );
        assert_eq!(
            interpolate_string("got {{missing.path}}!", &s),
            json!("got {{missing.path}}!")
        );
    }

    #[test]
    fn test_expression_placeholders() {
        let s = state();
        assert_eq!(interpolate_string("{{count + 1}}", &s), json!(4));
        assert_eq!(interpolate_string("{{count > 2}}", &s), json!(true));
    }

    #[test]
    fn test_config_walk() {
        let s = state();
        let config = json!({
            "path": "seen",
            "value": "{{item}}",
            "nested": { "label": "user={{user.name}}" },
            "list": ["{{count}}", "plain"],
            "number": 7
        });
        let interpolated = interpolate_config(&config, &s);
        assert_eq!(
            interpolated,
            json!({
                "path": "seen",
                "value": "b",
                "nested": { "label": "user=Ada" },
                "list": [3, "plain"],
                "number": 7
            })
        );
    }

    #[test]
    fn test_whitespace_inside_placeholder() {
        let s = state();
        assert_eq!(interpolate_string("{{ count }}", &s), json!(3));
    }
}
