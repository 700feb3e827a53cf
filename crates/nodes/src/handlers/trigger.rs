use async_trait::async_trait;

use crate::{ExecutionContext, NodeConfig, NodeError, NodeHandler, Outcome};

/// Entry marker. Passes the incoming event payload through as its patch.
pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn execute(&self, config: &NodeConfig, ctx: &ExecutionContext) -> Result<Outcome, NodeError> {
        match config {
            NodeConfig::Trigger { .. } => Ok(Outcome::patch(ctx.data.clone())),
            other => Err(NodeError::configuration(format!(
                "trigger handler received a {} config",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::ctx;
    use serde_json::json;

    #[tokio::test]
    async fn payload_becomes_patch() {
        let cfg = NodeConfig::Trigger { event_type: "lead.created".into() };
        let c = ctx(json!({ "lead_id": 42, "email": "a@b.com" }));
        let out = TriggerHandler.execute(&cfg, &c).await.unwrap();
        assert_eq!(out.patch, c.data);
        assert_eq!(out.next_label, None);
        assert_eq!(out.suspend_until, None);
    }

    #[tokio::test]
    async fn wrong_config_is_rejected() {
        let cfg = NodeConfig::Delay { seconds: 1 };
        assert!(TriggerHandler.execute(&cfg, &ctx(json!({}))).await.is_err());
    }
}
