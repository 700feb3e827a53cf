use async_trait::async_trait;
use chrono::Duration;

use crate::{ExecutionContext, NodeConfig, NodeError, NodeHandler, Outcome};

/// Computes the resume instant; the engine does the actual suspending.
pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn execute(&self, config: &NodeConfig, ctx: &ExecutionContext) -> Result<Outcome, NodeError> {
        let NodeConfig::Delay { seconds } = config else {
            return Err(NodeError::configuration(format!(
                "delay handler received a {} config",
                config.kind()
            )));
        };

        let resume_at = i64::try_from(*seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| ctx.now.checked_add_signed(d))
            .ok_or_else(|| NodeError::configuration(format!("delay of {seconds}s is out of range")))?;

        Ok(Outcome::suspend(resume_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::ctx;
    use serde_json::json;

    #[tokio::test]
    async fn suspends_for_configured_duration() {
        let c = ctx(json!({}));
        let out = DelayHandler
            .execute(&NodeConfig::Delay { seconds: 86_400 }, &c)
            .await
            .unwrap();
        assert_eq!(out.suspend_until, Some(c.now + Duration::hours(24)));
        assert!(out.patch.is_empty());
    }

    #[tokio::test]
    async fn absurd_delay_is_rejected() {
        let out = DelayHandler
            .execute(&NodeConfig::Delay { seconds: u64::MAX }, &ctx(json!({})))
            .await;
        assert!(matches!(out, Err(NodeError::Configuration(_))));
    }
}
