//! Typed node configuration.
//!
//! Each node type has its own strictly-shaped config. The JSON form is
//! tagged by `type`:
//!
//! ```json
//! { "type": "trigger",   "event_type": "lead.created" }
//! { "type": "action",    "action": { "operation": "send_email", "to": "{{email}}", "template": "welcome" } }
//! { "type": "condition", "predicate": { "compare": { "field": "value", "op": "gt", "value": 10000 } } }
//! { "type": "delay",     "seconds": 86400 }
//! ```
//!
//! [`NodeConfig::validate`] is meant to run when a graph is saved, so a
//! malformed config never reaches the engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::predicate::Predicate;
use crate::NodeError;

/// Longest delay a node may request (one year).
pub const MAX_DELAY_SECONDS: u64 = 365 * 24 * 60 * 60;

/// The closed set of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Action,
    Condition,
    Delay,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Delay => "delay",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trigger"   => Ok(Self::Trigger),
            "action"    => Ok(Self::Action),
            "condition" => Ok(Self::Condition),
            "delay"     => Ok(Self::Delay),
            other       => Err(format!("unknown node type: {other}")),
        }
    }
}

/// Per-type node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Entry marker; matched against incoming domain events.
    Trigger {
        /// Exact event name, e.g. `"lead.created"`.
        event_type: String,
    },
    /// One call to an external collaborator.
    Action { action: ActionOperation },
    /// Binary branch on a predicate over the context.
    Condition { predicate: Predicate },
    /// Suspend the run for a fixed duration.
    Delay { seconds: u64 },
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger { .. } => NodeKind::Trigger,
            Self::Action { .. } => NodeKind::Action,
            Self::Condition { .. } => NodeKind::Condition,
            Self::Delay { .. } => NodeKind::Delay,
        }
    }

    /// Check the config's own schema.
    ///
    /// # Errors
    /// [`NodeError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<(), NodeError> {
        match self {
            Self::Trigger { event_type } => {
                if event_type.trim().is_empty() {
                    return Err(NodeError::configuration("trigger event_type must not be empty"));
                }
                Ok(())
            }
            Self::Action { action } => action.validate(),
            Self::Condition { predicate } => predicate.validate(),
            Self::Delay { seconds } => {
                if *seconds > MAX_DELAY_SECONDS {
                    return Err(NodeError::configuration(format!(
                        "delay of {seconds}s exceeds the maximum of {MAX_DELAY_SECONDS}s"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn default_text_key() -> String {
    "ai_text".into()
}

fn default_image_key() -> String {
    "ai_image_url".into()
}

/// Operations an action node can perform.
///
/// String parameters may contain `{{path}}` placeholders that are filled in
/// from the execution context at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ActionOperation {
    SendEmail {
        to: String,
        template: String,
        #[serde(default)]
        subject: Option<String>,
    },
    SendSms {
        to: String,
        body: String,
    },
    GenerateAiText {
        prompt: String,
        model: String,
        #[serde(default = "default_text_key")]
        output_key: String,
    },
    GenerateAiImage {
        prompt: String,
        model: String,
        #[serde(default = "default_image_key")]
        output_key: String,
    },
    /// Write fixed values into the context without calling anything.
    SetFields { values: Map<String, Value> },
}

impl ActionOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendEmail { .. } => "send_email",
            Self::SendSms { .. } => "send_sms",
            Self::GenerateAiText { .. } => "generate_ai_text",
            Self::GenerateAiImage { .. } => "generate_ai_image",
            Self::SetFields { .. } => "set_fields",
        }
    }

    fn validate(&self) -> Result<(), NodeError> {
        let required: Vec<(&str, &str)> = match self {
            Self::SendEmail { to, template, .. } => vec![("to", to.as_str()), ("template", template.as_str())],
            Self::SendSms { to, body } => vec![("to", to.as_str()), ("body", body.as_str())],
            Self::GenerateAiText { prompt, model, output_key }
            | Self::GenerateAiImage { prompt, model, output_key } => vec![
                ("prompt", prompt.as_str()),
                ("model", model.as_str()),
                ("output_key", output_key.as_str()),
            ],
            Self::SetFields { values } => {
                if values.is_empty() {
                    return Err(NodeError::configuration("set_fields requires at least one value"));
                }
                Vec::new()
            }
        };

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(NodeError::configuration(format!(
                    "{}: '{field}' must not be empty",
                    self.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_configs() {
        let trigger: NodeConfig =
            serde_json::from_value(json!({ "type": "trigger", "event_type": "lead.created" })).unwrap();
        assert_eq!(trigger.kind(), NodeKind::Trigger);

        let action: NodeConfig = serde_json::from_value(json!({
            "type": "action",
            "action": { "operation": "send_email", "to": "{{email}}", "template": "welcome" }
        }))
        .unwrap();
        match action {
            NodeConfig::Action { action: ActionOperation::SendEmail { template, subject, .. } } => {
                assert_eq!(template, "welcome");
                assert_eq!(subject, None);
            }
            other => panic!("unexpected config: {other:?}"),
        }

        let delay: NodeConfig =
            serde_json::from_value(json!({ "type": "delay", "seconds": 86400 })).unwrap();
        assert_eq!(delay, NodeConfig::Delay { seconds: 86400 });
    }

    #[test]
    fn unknown_type_is_rejected_by_serde() {
        let parsed: Result<NodeConfig, _> =
            serde_json::from_value(json!({ "type": "loop", "times": 3 }));
        assert!(parsed.is_err());
    }

    #[test]
    fn ai_text_output_key_defaults() {
        let cfg: NodeConfig = serde_json::from_value(json!({
            "type": "action",
            "action": { "operation": "generate_ai_text", "prompt": "hi", "model": "m" }
        }))
        .unwrap();
        assert!(matches!(
            cfg,
            NodeConfig::Action { action: ActionOperation::GenerateAiText { ref output_key, .. } }
                if output_key == "ai_text"
        ));
    }

    #[test]
    fn validation_rejects_empty_fields() {
        let empty_trigger = NodeConfig::Trigger { event_type: "  ".into() };
        assert!(matches!(empty_trigger.validate(), Err(NodeError::Configuration(_))));

        let empty_sms = NodeConfig::Action {
            action: ActionOperation::SendSms { to: "".into(), body: "hi".into() },
        };
        assert!(empty_sms.validate().is_err());

        let empty_fields = NodeConfig::Action {
            action: ActionOperation::SetFields { values: Map::new() },
        };
        assert!(empty_fields.validate().is_err());

        let too_long = NodeConfig::Delay { seconds: MAX_DELAY_SECONDS + 1 };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn node_kind_round_trips_through_str() {
        for kind in [NodeKind::Trigger, NodeKind::Action, NodeKind::Condition, NodeKind::Delay] {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        assert!("loop".parse::<NodeKind>().is_err());
    }
}
