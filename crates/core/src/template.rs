//! Template interpolation
//!
//! `{{expr}}` substrings in string leaves are replaced with the evaluated
//! expression. The reserved form `{{now}}` resolves to the supplied UTC
//! instant in RFC 3339. Evaluation failure yields the empty string; host
//! state is never reachable (see `expr`).

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::context::StepContext;
use crate::expr;

/// Interpolate every `{{expr}}` occurrence in `template`.
pub fn interpolate_string(template: &str, ctx: &StepContext, now: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let raw = after[..end].trim();
                out.push_str(&render_expr(raw, ctx, now));
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated opener passes through verbatim.
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Walk a JSON value, interpolating every string leaf.
pub fn interpolate_value(value: &Value, ctx: &StepContext, now: DateTime<Utc>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_string(s, ctx, now)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, ctx, now))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, ctx, now)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_expr(raw: &str, ctx: &StepContext, now: DateTime<Utc>) -> String {
    if raw == "now" {
        return now.to_rfc3339_opts(SecondsFormat::Secs, true);
    }
    match expr::eval(raw, ctx) {
        Ok(value) => stringify(&value),
        Err(_) => String::new(),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            // Render whole floats without the trailing `.0`.
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    return format!("{}", f as i64);
                }
            }
            n.to_string()
        }
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::StepStatus;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> StepContext {
        let mut ctx = StepContext::new(json!({"user": "ada", "count": 3}));
        ctx.record_step("fetch", json!({"statusCode": 200}), StepStatus::Completed);
        ctx.env.insert("BASE".to_string(), "https://api.example.com".to_string());
        ctx
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn substitutes_paths() {
        let out = interpolate_string("hello {{input.user}}, you have {{input.count}}", &ctx(), at());
        assert_eq!(out, "hello ada, you have 3");
    }

    #[test]
    fn substitutes_now_as_rfc3339() {
        let out = interpolate_string("at {{now}}", &ctx(), at());
        assert_eq!(out, "at 2024-05-01T12:00:00Z");
    }

    #[test]
    fn failure_yields_empty_string() {
        let out = interpolate_string("x={{input.missing}}!", &ctx(), at());
        assert_eq!(out, "x=!");
        let out = interpolate_string("x={{not a valid expr %}}", &ctx(), at());
        assert_eq!(out, "x=");
    }

    #[test]
    fn unterminated_braces_pass_through() {
        let out = interpolate_string("hello {{input.user", &ctx(), at());
        assert_eq!(out, "hello {{input.user");
    }

    #[test]
    fn interpolates_nested_values() {
        let template = json!({
            "url": "{{env.BASE}}/users/{{input.user}}",
            "status": "{{steps.fetch.output.statusCode}}",
            "list": ["{{input.user}}", 7, {"deep": "{{input.count}}"}],
            "untouched": 42
        });
        let out = interpolate_value(&template, &ctx(), at());
        assert_eq!(
            out,
            json!({
                "url": "https://api.example.com/users/ada",
                "status": "200",
                "list": ["ada", 7, {"deep": "3"}],
                "untouched": 42
            })
        );
    }

    #[test]
    fn plain_strings_are_unchanged() {
        assert_eq!(interpolate_string("no braces", &ctx(), at()), "no braces");
    }
}
