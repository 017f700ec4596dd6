//! Template rendering
//!
//! Walks a topic string and a payload tree and substitutes `{{name}}`
//! placeholders from a context map. Rendering is pure: same inputs,
//! identical outputs. Payload tree structure and mapping key order are
//! preserved verbatim because some downstream modules are
//! position-sensitive in their logs.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Context key for the stable run identifier.
pub const KEY_ORDER_ID: &str = "orderId";
/// Context key for the per-run monotone update counter.
pub const KEY_ORDER_UPDATE_ID: &str = "orderUpdateId";
/// Context key for the per-step fresh identifier.
pub const KEY_ACTION_ID: &str = "action_id";

/// Keys the engine injects into the context before each render.
pub const INJECTED_KEYS: &[&str] = &[KEY_ORDER_ID, KEY_ORDER_UPDATE_ID, KEY_ACTION_ID];

/// Placeholder name to value.
pub type RenderContext = HashMap<String, Value>;

/// Rendering errors. Both fail the step that triggered them.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown placeholder '{name}' in template '{template}'")]
    UnknownPlaceholder { name: String, template: String },
    #[error("unterminated placeholder in template '{0}'")]
    Unterminated(String),
}

/// Render a string template, stringifying scalar values.
pub fn render_str(template: &str, ctx: &RenderContext) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    for segment in segments(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                let value = lookup(name, template, ctx)?;
                out.push_str(&scalar_to_string(value));
            }
        }
    }
    Ok(out)
}

/// Render a payload tree. A string leaf that is exactly one placeholder
/// is replaced by the context value with its native type (so a numeric
/// `orderUpdateId` stays a number); mixed strings interpolate.
pub fn render_value(template: &Value, ctx: &RenderContext) -> Result<Value, RenderError> {
    match template {
        Value::String(text) => {
            if let Some(name) = whole_placeholder(text) {
                let value = lookup(name, text, ctx)?;
                Ok(value.clone())
            } else {
                Ok(Value::String(render_str(text, ctx)?))
            }
        }
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                rendered.push(render_value(item, ctx)?);
            }
            Ok(Value::Array(rendered))
        }
        Value::Object(map) => {
            // serde_json is built with preserve_order; iteration order is
            // the recipe's declared key order.
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render_value(value, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

/// Placeholder names appearing in a string template, in order.
/// Used by the loader to reject unresolvable topics at load time.
pub fn placeholder_names(template: &str) -> Result<Vec<String>, RenderError> {
    let mut names = Vec::new();
    for segment in segments(template)? {
        if let Segment::Placeholder(name) = segment {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn segments(template: &str) -> Result<Vec<Segment<'_>>, RenderError> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            out.push(Segment::Literal(&rest[..open]));
        }
        let after_open = &rest[open + 2..];
        let close = after_open
            .find("}}")
            .ok_or_else(|| RenderError::Unterminated(template.to_string()))?;
        out.push(Segment::Placeholder(after_open[..close].trim()));
        rest = &after_open[close + 2..];
    }
    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    Ok(out)
}

/// `Some(name)` when the whole string is a single placeholder.
fn whole_placeholder(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    let name = inner.trim();
    if name.is_empty() || name.contains("{{") || name.contains("}}") {
        return None;
    }
    Some(name)
}

fn lookup<'a>(
    name: &str,
    template: &str,
    ctx: &'a RenderContext,
) -> Result<&'a Value, RenderError> {
    ctx.get(name).ok_or_else(|| RenderError::UnknownPlaceholder {
        name: name.to_string(),
        template: template.to_string(),
    })
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RenderContext {
        HashMap::from([
            ("module_serial".to_string(), json!("XYZ")),
            (KEY_ORDER_ID.to_string(), json!("abc-def")),
            (KEY_ORDER_UPDATE_ID.to_string(), json!(3)),
        ])
    }

    #[test]
    fn test_render_str_substring_substitution() {
        let rendered = render_str("module/v1/ff/{{module_serial}}/order", &ctx()).unwrap();
        assert_eq!(rendered, "module/v1/ff/XYZ/order");
    }

    #[test]
    fn test_render_str_stringifies_numbers() {
        let rendered = render_str("update {{orderUpdateId}} done", &ctx()).unwrap();
        assert_eq!(rendered, "update 3 done");
    }

    #[test]
    fn test_render_value_whole_placeholder_keeps_native_type() {
        let rendered = render_value(&json!({"orderUpdateId": "{{orderUpdateId}}"}), &ctx()).unwrap();
        assert_eq!(rendered, json!({"orderUpdateId": 3}));
    }

    #[test]
    fn test_render_value_preserves_key_order() {
        let template = json!({
            "serialNumber": "EX",
            "action": {"command": "PICK"},
            "orderId": "{{orderId}}",
            "orderUpdateId": "{{orderUpdateId}}"
        });
        let rendered = render_value(&template, &ctx()).unwrap();
        let keys: Vec<&str> = rendered.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["serialNumber", "action", "orderId", "orderUpdateId"]);
    }

    #[test]
    fn test_render_value_walks_arrays() {
        let rendered = render_value(&json!(["{{module_serial}}", 1, true]), &ctx()).unwrap();
        assert_eq!(rendered, json!(["XYZ", 1, true]));
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let err = render_str("{{missing}}", &ctx()).unwrap_err();
        assert!(matches!(err, RenderError::UnknownPlaceholder { ref name, .. } if name == "missing"));
    }

    #[test]
    fn test_unterminated_placeholder_is_an_error() {
        let err = render_str("module/{{oops", &ctx()).unwrap_err();
        assert!(matches!(err, RenderError::Unterminated(_)));
    }

    #[test]
    fn test_placeholder_names_in_order() {
        let names = placeholder_names("a/{{x}}/b/{{ y }}").unwrap();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_render_is_pure() {
        let template = json!({"topic": "m/{{module_serial}}", "n": "{{orderUpdateId}}"});
        let first = render_value(&template, &ctx()).unwrap();
        let second = render_value(&template, &ctx()).unwrap();
        assert_eq!(first, second);
    }
}
