//! Context lookups and `{{path}}` interpolation for action parameters.

use serde_json::{Map, Value};

use crate::NodeError;

/// Resolve a dotted path (`"lead.email"`, `"items.0"`) against the context.
pub fn lookup<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace every `{{path}}` in `template` with the value found in `data`.
///
/// Strings are inserted verbatim, other values as compact JSON.
///
/// # Errors
/// [`NodeError::Fatal`] when a placeholder is unterminated or its path does
/// not resolve.
pub fn render(template: &str, data: &Map<String, Value>) -> Result<String, NodeError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| NodeError::fatal(format!("unterminated placeholder in '{template}'")))?;
        let path = after[..end].trim();
        let value = lookup(data, path)
            .filter(|v| !v.is_null())
            .ok_or_else(|| NodeError::fatal(format!("placeholder '{{{{{path}}}}}' has no value in the context")))?;
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Map<String, Value> {
        json!({ "email": "a@b.com", "lead": { "id": 42, "tags": ["x", "y"] } })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let d = data();
        assert_eq!(lookup(&d, "lead.id"), Some(&json!(42)));
        assert_eq!(lookup(&d, "lead.tags.1"), Some(&json!("y")));
        assert_eq!(lookup(&d, "lead.missing"), None);
        assert_eq!(lookup(&d, "email.deeper"), None);
    }

    #[test]
    fn render_substitutes_values() {
        let out = render("Hi {{ email }}, lead #{{lead.id}}", &data()).unwrap();
        assert_eq!(out, "Hi a@b.com, lead #42");
        assert_eq!(render("no placeholders", &data()).unwrap(), "no placeholders");
    }

    #[test]
    fn render_fails_on_unknown_or_unterminated() {
        assert!(render("{{phone}}", &data()).is_err());
        assert!(render("{{email", &data()).is_err());
    }
}
