//! Messaging collaborator used by `send_email` / `send_sms` actions.
//!
//! A send counts as done once the messenger returns a receipt. Delivery is
//! at-least-once: if the process dies after the provider accepted a message
//! but before the engine logged it, the step runs again on the next attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub tenant_id: Uuid,
    pub instance_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    /// Email template name; `None` for SMS.
    pub template: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// Acknowledgement from the messaging provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// Worth trying again (timeouts, rate limits).
    #[error("transient messaging failure: {0}")]
    Transient(String),

    /// The provider refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl From<MessagingError> for NodeError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Transient(_) => NodeError::Retryable(err.to_string()),
            MessagingError::Rejected(_) => NodeError::Fatal(err.to_string()),
        }
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<MessageReceipt, MessagingError>;
}

/// Messenger that only writes the message to the log. Used by local runs.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, message: OutboundMessage) -> Result<MessageReceipt, MessagingError> {
        let message_id = Uuid::new_v4().to_string();
        info!(
            channel = message.channel.as_str(),
            recipient = %message.recipient,
            template = ?message.template,
            %message_id,
            "message dispatched"
        );
        Ok(MessageReceipt { message_id })
    }
}
