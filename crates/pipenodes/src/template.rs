//! `{{path}}` placeholders resolved against a node's inputs.
//!
//! A path is an input key optionally followed by dotted field names, e.g.
//! `{{fetch.body.id}}`. Unknown paths render as an empty string.

use pipecore::Value;
use std::collections::HashMap;

/// Look up a dotted path in the inputs.
pub fn lookup<'a>(path: &str, inputs: &'a HashMap<String, Value>) -> Option<&'a Value> {
    let mut parts = path.trim().split('.');
    let mut current = inputs.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Text form of a value as it appears inside rendered strings.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

pub fn render(template: &str, inputs: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                if let Some(value) = lookup(&after[..end], inputs) {
                    out.push_str(&display(value));
                }
                rest = &after[end + 2..];
            }
            None => {
                // unterminated: keep verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render string values; other values pass through untouched.
pub fn render_value(value: &Value, inputs: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            // A lone placeholder keeps the referenced value's type.
            let trimmed = s.trim();
            if trimmed.starts_with("{{") && trimmed.ends_with("}}") && trimmed.matches("{{").count() == 1 {
                if let Some(found) = lookup(&trimmed[2..trimmed.len() - 2], inputs) {
                    return found.clone();
                }
            }
            Value::String(render(s, inputs))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> HashMap<String, Value> {
        let mut fetch = HashMap::new();
        fetch.insert("status".to_string(), Value::from(200.0));
        fetch.insert(
            "items".to_string(),
            Value::Array(vec![Value::from("a"), Value::from("b")]),
        );
        let mut inputs = HashMap::new();
        inputs.insert("fetch".to_string(), Value::Object(fetch));
        inputs.insert("user".to_string(), Value::from("ada"));
        inputs
    }

    #[test]
    fn test_render_paths() {
        let rendered = render("{{user}} got {{ fetch.status }} ({{fetch.items.1}}){{missing}}", &inputs());
        assert_eq!(rendered, "ada got 200 (b)");
    }

    #[test]
    fn test_unterminated_placeholder_is_kept() {
        assert_eq!(render("hello {{user", &inputs()), "hello {{user");
    }

    #[test]
    fn test_lone_placeholder_keeps_type() {
        assert_eq!(render_value(&Value::from("{{fetch.status}}"), &inputs()), Value::from(200.0));
        assert_eq!(
            render_value(&Value::from("id-{{fetch.status}}"), &inputs()),
            Value::from("id-200")
        );
    }
}
