//! Test doubles for handlers and collaborators.
//!
//! Useful in unit and integration tests where a real messaging provider or
//! AI backend is either unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ai::{AiError, AiProvider, Capability};
use crate::messaging::{MessageReceipt, Messenger, MessagingError, OutboundMessage};
use crate::{ExecutionContext, NodeConfig, NodeError, NodeHandler, Outcome};

// ---------------------------------------------------------------------------
// MockNode
// ---------------------------------------------------------------------------

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Succeed with the given context patch.
    ReturnPatch(Map<String, Value>),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// A handler that records every context it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the handler will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All contexts seen by this handler (in call order).
    pub calls: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl MockNode {
    /// A mock that always succeeds with the given patch (`value` must be a
    /// JSON object; anything else yields an empty patch).
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnPatch(value.as_object().cloned().unwrap_or_default()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Contexts received, oldest first.
    pub fn inputs(&self) -> Vec<Map<String, Value>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeHandler for MockNode {
    async fn execute(&self, _config: &NodeConfig, ctx: &ExecutionContext) -> Result<Outcome, NodeError> {
        self.calls.lock().unwrap().push(ctx.data.clone());

        match &self.behaviour {
            MockBehaviour::ReturnPatch(patch) => Ok(Outcome::patch(patch.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingMessenger
// ---------------------------------------------------------------------------

/// A messenger that keeps every delivered message in memory.
///
/// Optionally fails the first `n` attempts with a transient error.
#[derive(Default)]
pub struct RecordingMessenger {
    fail_first: usize,
    attempts: AtomicUsize,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_transiently(times: usize) -> Self {
        Self {
            fail_first: times,
            ..Self::default()
        }
    }

    /// Successfully delivered messages, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Every call to `send`, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, message: OutboundMessage) -> Result<MessageReceipt, MessagingError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(MessagingError::Transient(format!("attempt {} timed out", attempt + 1)));
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(message);
        Ok(MessageReceipt {
            message_id: format!("msg-{}", sent.len()),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// An AI provider that returns a fixed answer for one capability.
pub struct ScriptedProvider {
    capabilities: Vec<Capability>,
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            capabilities: vec![Capability::Text],
            answer: answer.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            capabilities: vec![Capability::Image],
            answer: url.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn generate_text(&self, prompt: &str, _model: &str) -> Result<String, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        Ok(self.answer.clone())
    }

    async fn generate_image(&self, prompt: &str, _model: &str) -> Result<Option<String>, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        Ok(Some(self.answer.clone()))
    }
}
