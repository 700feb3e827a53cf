//! Action handler: one external collaborator call per node.
//!
//! Transient collaborator failures (`NodeError::Retryable`) are retried here
//! with exponential back-off, up to `RetryPolicy::max_attempts`. The engine
//! itself never retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::ai::AiManager;
use crate::messaging::{Channel, Messenger, OutboundMessage};
use crate::template::render;
use crate::{ActionOperation, ExecutionContext, NodeConfig, NodeError, NodeHandler, Outcome};

/// Handler-local retry knobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per node, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential back-off between attempts.
    pub base_delay: Duration,
    /// Ceiling for any single back-off.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Back-off before the attempt following failed attempt number `attempt`
    /// (1-based): `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

pub struct ActionHandler {
    ai: Arc<AiManager>,
    messenger: Arc<dyn Messenger>,
    retry: RetryPolicy,
}

impl ActionHandler {
    pub fn new(ai: Arc<AiManager>, messenger: Arc<dyn Messenger>, retry: RetryPolicy) -> Self {
        Self { ai, messenger, retry }
    }

    async fn send(&self, ctx: &ExecutionContext, message: OutboundMessage) -> Result<Outcome, NodeError> {
        let channel = message.channel;
        let recipient = message.recipient.clone();
        let receipt = self
            .with_retry(channel.as_str(), || {
                let message = message.clone();
                async move { self.messenger.send(message).await.map_err(NodeError::from) }
            })
            .await?;

        info!(
            instance_id = %ctx.instance_id,
            node_id = %ctx.node_id,
            channel = channel.as_str(),
            message_id = %receipt.message_id,
            "message sent"
        );

        Ok(Outcome::patch(single(
            "last_message",
            json!({
                "channel": channel.as_str(),
                "recipient": recipient,
                "message_id": receipt.message_id,
            }),
        )))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, NodeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match call().await {
                Ok(value) => return Ok(value),

                Err(NodeError::Retryable(msg)) => {
                    if attempts >= max_attempts {
                        return Err(NodeError::Fatal(format!(
                            "{operation} failed after {attempts} attempts: {msg}"
                        )));
                    }

                    let delay = self.retry.backoff(attempts);
                    warn!(
                        "{} transient error (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempts, max_attempts, delay, msg
                    );
                    tokio::time::sleep(delay).await;
                }

                Err(other) => return Err(other),
            }
        }
    }
}

#[async_trait]
impl NodeHandler for ActionHandler {
    async fn execute(&self, config: &NodeConfig, ctx: &ExecutionContext) -> Result<Outcome, NodeError> {
        let NodeConfig::Action { action } = config else {
            return Err(NodeError::configuration(format!(
                "action handler received a {} config",
                config.kind()
            )));
        };

        match action {
            ActionOperation::SendEmail { to, template, subject } => {
                let message = OutboundMessage {
                    tenant_id: ctx.tenant_id,
                    instance_id: ctx.instance_id,
                    channel: Channel::Email,
                    recipient: render(to, &ctx.data)?,
                    template: Some(template.clone()),
                    subject: subject.as_deref().map(|s| render(s, &ctx.data)).transpose()?,
                    body: None,
                };
                self.send(ctx, message).await
            }

            ActionOperation::SendSms { to, body } => {
                let message = OutboundMessage {
                    tenant_id: ctx.tenant_id,
                    instance_id: ctx.instance_id,
                    channel: Channel::Sms,
                    recipient: render(to, &ctx.data)?,
                    template: None,
                    subject: None,
                    body: Some(render(body, &ctx.data)?),
                };
                self.send(ctx, message).await
            }

            ActionOperation::GenerateAiText { prompt, model, output_key } => {
                let prompt = render(prompt, &ctx.data)?;
                let prompt = prompt.as_str();
                let text = self
                    .with_retry("generate_ai_text", || async move {
                        self.ai.generate_text(prompt, model).await.map_err(NodeError::from)
                    })
                    .await?;
                Ok(Outcome::patch(single(output_key, Value::String(text))))
            }

            ActionOperation::GenerateAiImage { prompt, model, output_key } => {
                let prompt = render(prompt, &ctx.data)?;
                let prompt = prompt.as_str();
                let url = self
                    .with_retry("generate_ai_image", || async move {
                        self.ai.generate_image(prompt, model).await.map_err(NodeError::from)
                    })
                    .await?;
                Ok(Outcome::patch(single(output_key, url.map_or(Value::Null, Value::String))))
            }

            ActionOperation::SetFields { values } => Ok(Outcome::patch(values.clone())),
        }
    }
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_owned(), value);
    map
}
