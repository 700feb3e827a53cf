use async_trait::async_trait;
use tracing::debug;

use crate::{ExecutionContext, NodeConfig, NodeError, NodeHandler, Outcome};

pub const TRUE_PATH: &str = "true_path";
pub const FALSE_PATH: &str = "false_path";

/// Evaluates the node's predicate and names the branch to follow.
///
/// Pure: no collaborator calls, no patch.
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, config: &NodeConfig, ctx: &ExecutionContext) -> Result<Outcome, NodeError> {
        let NodeConfig::Condition { predicate } = config else {
            return Err(NodeError::configuration(format!(
                "condition handler received a {} config",
                config.kind()
            )));
        };

        let result = predicate.evaluate(&ctx.data, ctx.now)?;
        let label = if result { TRUE_PATH } else { FALSE_PATH };
        debug!(node_id = %ctx.node_id, label, "condition evaluated");
        Ok(Outcome::branch(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::ctx;
    use crate::predicate::{CompareOp, Predicate};
    use serde_json::json;

    fn over_10k() -> NodeConfig {
        NodeConfig::Condition {
            predicate: Predicate::compare("value", CompareOp::Gt, json!(10000)),
        }
    }

    #[tokio::test]
    async fn routes_by_predicate() {
        let yes = ConditionHandler.execute(&over_10k(), &ctx(json!({ "value": 15000 }))).await.unwrap();
        assert_eq!(yes.next_label.as_deref(), Some(TRUE_PATH));
        assert!(yes.patch.is_empty());

        let no = ConditionHandler.execute(&over_10k(), &ctx(json!({ "value": 5000 }))).await.unwrap();
        assert_eq!(no.next_label.as_deref(), Some(FALSE_PATH));
    }

    #[tokio::test]
    async fn missing_field_surfaces_configuration_error() {
        let err = ConditionHandler.execute(&over_10k(), &ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));
    }
}
