//! Condition predicates over the execution context.
//!
//! Evaluation is pure and total: every well-formed context yields a boolean,
//! and a context the predicate cannot be applied to (missing field, wrong
//! type) yields [`NodeError::Configuration`]. There is no silent default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::template::lookup;
use crate::NodeError;

/// Comparison operators available to [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring for strings, membership for arrays.
    Contains,
    /// Field is present and not null. Never fails on a missing field.
    Exists,
    /// Field is an RFC 3339 timestamp no older than `value` seconds.
    Within,
}

/// A boolean expression evaluated by condition nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        /// Dotted path into the context, e.g. `"lead.score"`.
        field: String,
        op: CompareOp,
        #[serde(default)]
        value: Value,
    },
    /// Short-circuiting conjunction.
    All(Vec<Predicate>),
    /// Short-circuiting disjunction.
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Shorthand for a single comparison.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// Static checks run at graph-save time.
    pub fn validate(&self) -> Result<(), NodeError> {
        match self {
            Self::Compare { field, op, value } => {
                if field.trim().is_empty() {
                    return Err(NodeError::configuration("predicate field must not be empty"));
                }
                match op {
                    CompareOp::Exists => Ok(()),
                    CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
                        if as_number(value).is_none() {
                            return Err(NodeError::configuration(format!(
                                "predicate on '{field}' needs a numeric comparison value"
                            )));
                        }
                        Ok(())
                    }
                    CompareOp::Within => match value.as_f64() {
                        Some(secs) if secs >= 0.0 => Ok(()),
                        _ => Err(NodeError::configuration(format!(
                            "'within' predicate on '{field}' needs a non-negative number of seconds"
                        ))),
                    },
                    CompareOp::Eq | CompareOp::Ne | CompareOp::Contains => {
                        if value.is_null() {
                            return Err(NodeError::configuration(format!(
                                "predicate on '{field}' needs a comparison value"
                            )));
                        }
                        Ok(())
                    }
                }
            }
            Self::All(items) | Self::Any(items) => {
                if items.is_empty() {
                    return Err(NodeError::configuration("all/any predicate must not be empty"));
                }
                items.iter().try_for_each(Predicate::validate)
            }
            Self::Not(inner) => inner.validate(),
        }
    }

    /// Evaluate against the context at time `now`.
    pub fn evaluate(&self, data: &Map<String, Value>, now: DateTime<Utc>) -> Result<bool, NodeError> {
        match self {
            Self::Compare { field, op, value } => evaluate_compare(field, *op, value, data, now),
            Self::All(items) => {
                for item in items {
                    if !item.evaluate(data, now)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(items) => {
                for item in items {
                    if item.evaluate(data, now)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.evaluate(data, now)?),
        }
    }
}

fn evaluate_compare(
    field: &str,
    op: CompareOp,
    expected: &Value,
    data: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<bool, NodeError> {
    let actual = match lookup(data, field).filter(|v| !v.is_null()) {
        Some(actual) => actual,
        None if op == CompareOp::Exists => return Ok(false),
        None => {
            return Err(NodeError::configuration(format!(
                "field '{field}' is missing from the context"
            )))
        }
    };

    match op {
        CompareOp::Exists => Ok(true),
        CompareOp::Eq => Ok(values_equal(actual, expected)),
        CompareOp::Ne => Ok(!values_equal(actual, expected)),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let (a, b) = match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(NodeError::configuration(format!(
                        "cannot compare field '{field}' ({}) numerically",
                        type_name(actual)
                    )))
                }
            };
            Ok(match op {
                CompareOp::Gt => a > b,
                CompareOp::Gte => a >= b,
                CompareOp::Lt => a < b,
                _ => a <= b,
            })
        }
        CompareOp::Contains => match (actual, expected) {
            (Value::String(s), Value::String(needle)) => Ok(s.contains(needle.as_str())),
            (Value::Array(items), needle) => Ok(items.iter().any(|item| values_equal(item, needle))),
            _ => Err(NodeError::configuration(format!(
                "'contains' is not defined for field '{field}' ({})",
                type_name(actual)
            ))),
        },
        CompareOp::Within => {
            let raw = actual.as_str().ok_or_else(|| {
                NodeError::configuration(format!("field '{field}' is not a timestamp"))
            })?;
            let at = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| {
                    NodeError::configuration(format!("field '{field}' is not an RFC 3339 timestamp: {e}"))
                })?
                .with_timezone(&Utc);
            let window = expected.as_f64().ok_or_else(|| {
                NodeError::configuration(format!("'within' on '{field}' needs a number of seconds"))
            })?;
            let age = now.signed_duration_since(at);
            Ok(age.num_milliseconds() >= 0 && (age.num_milliseconds() as f64) <= window * 1000.0)
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Numbers compare by value, and a numeric string equals the number it
/// spells, matching the coercion used by the ordering operators.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_) | Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        _ => a == b,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn ctx(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn greater_than_threshold() {
        let p = Predicate::compare("value", CompareOp::Gt, json!(10000));
        let now = Utc::now();
        assert!(p.evaluate(&ctx(json!({ "value": 15000 })), now).unwrap());
        assert!(!p.evaluate(&ctx(json!({ "value": 5000 })), now).unwrap());
    }

    #[test]
    fn missing_field_is_a_configuration_error() {
        let p = Predicate::compare("value", CompareOp::Gt, json!(10000));
        let err = p.evaluate(&ctx(json!({ "other": 1 })), Utc::now()).unwrap_err();
        assert!(matches!(err, NodeError::Configuration(msg) if msg.contains("value")));
    }

    #[test]
    fn non_numeric_field_cannot_be_ordered() {
        let p = Predicate::compare("value", CompareOp::Lt, json!(3));
        assert!(p.evaluate(&ctx(json!({ "value": [1, 2] })), Utc::now()).is_err());
        // numeric strings are accepted
        assert!(p.evaluate(&ctx(json!({ "value": "2" })), Utc::now()).unwrap());
    }

    #[test]
    fn nested_paths_and_equality() {
        let p = Predicate::compare("lead.stage", CompareOp::Eq, json!("qualified"));
        let data = ctx(json!({ "lead": { "stage": "qualified" } }));
        assert!(p.evaluate(&data, Utc::now()).unwrap());

        let n = Predicate::compare("lead.score", CompareOp::Eq, json!(10));
        assert!(n.evaluate(&ctx(json!({ "lead": { "score": 10.0 } })), Utc::now()).unwrap());
    }

    #[test]
    fn equality_coerces_numeric_strings_like_ordering() {
        let eq = Predicate::compare("value", CompareOp::Eq, json!(15000));
        let ne = Predicate::compare("value", CompareOp::Ne, json!(15000));
        let now = Utc::now();
        assert!(eq.evaluate(&ctx(json!({ "value": "15000" })), now).unwrap());
        assert!(!ne.evaluate(&ctx(json!({ "value": "15000" })), now).unwrap());
        assert!(!eq.evaluate(&ctx(json!({ "value": "15000 leads" })), now).unwrap());

        // Two strings still compare as text.
        let text = Predicate::compare("code", CompareOp::Eq, json!("007"));
        assert!(!text.evaluate(&ctx(json!({ "code": "7" })), now).unwrap());
    }

    #[test]
    fn contains_on_strings_and_arrays() {
        let p = Predicate::compare("tags", CompareOp::Contains, json!("vip"));
        assert!(p.evaluate(&ctx(json!({ "tags": ["new", "vip"] })), Utc::now()).unwrap());
        assert!(p.evaluate(&ctx(json!({ "tags": "vip-lead" })), Utc::now()).unwrap());
        assert!(p.evaluate(&ctx(json!({ "tags": 7 })), Utc::now()).is_err());
    }

    #[test]
    fn exists_never_fails() {
        let p = Predicate::compare("email_opened_at", CompareOp::Exists, Value::Null);
        assert!(!p.evaluate(&ctx(json!({})), Utc::now()).unwrap());
        assert!(!p.evaluate(&ctx(json!({ "email_opened_at": null })), Utc::now()).unwrap());
        assert!(p.evaluate(&ctx(json!({ "email_opened_at": "x" })), Utc::now()).unwrap());
    }

    #[test]
    fn within_window() {
        let now = Utc::now();
        let p = Predicate::compare("opened_at", CompareOp::Within, json!(3600));
        let recent = (now - Duration::minutes(10)).to_rfc3339();
        let old = (now - Duration::hours(3)).to_rfc3339();
        assert!(p.evaluate(&ctx(json!({ "opened_at": recent })), now).unwrap());
        assert!(!p.evaluate(&ctx(json!({ "opened_at": old })), now).unwrap());
        assert!(p.evaluate(&ctx(json!({ "opened_at": "yesterday" })), now).is_err());
    }

    #[test]
    fn all_short_circuits_before_missing_field() {
        let p = Predicate::All(vec![
            Predicate::compare("email_opened_at", CompareOp::Exists, Value::Null),
            Predicate::compare("email_opened_at", CompareOp::Within, json!(3600)),
        ]);
        assert!(!p.evaluate(&ctx(json!({ "lead_id": 42 })), Utc::now()).unwrap());
    }

    #[test]
    fn any_and_not() {
        let p = Predicate::Not(Box::new(Predicate::Any(vec![
            Predicate::compare("a", CompareOp::Eq, json!(1)),
            Predicate::compare("b", CompareOp::Eq, json!(2)),
        ])));
        assert!(!p.evaluate(&ctx(json!({ "a": 1 })), Utc::now()).unwrap());
        assert!(p.evaluate(&ctx(json!({ "a": 0, "b": 0 })), Utc::now()).unwrap());
    }

    #[test]
    fn validation() {
        assert!(Predicate::compare("", CompareOp::Exists, Value::Null).validate().is_err());
        assert!(Predicate::compare("v", CompareOp::Gt, json!("x")).validate().is_err());
        assert!(Predicate::compare("v", CompareOp::Eq, Value::Null).validate().is_err());
        assert!(Predicate::compare("v", CompareOp::Within, json!(-1)).validate().is_err());
        assert!(Predicate::All(vec![]).validate().is_err());
        assert!(Predicate::compare("v", CompareOp::Gt, json!(10000)).validate().is_ok());
    }

    #[test]
    fn json_shape() {
        let p: Predicate = serde_json::from_value(json!({
            "all": [
                { "compare": { "field": "email_opened_at", "op": "exists" } },
                { "compare": { "field": "email_opened_at", "op": "within", "value": 3600 } }
            ]
        }))
        .unwrap();
        assert!(matches!(p, Predicate::All(ref items) if items.len() == 2));
    }
}
