//! Built-in handlers, one per node type, and the closed dispatch table the
//! engine uses to pick between them.

mod action;
mod condition;
mod delay;
mod trigger;

use std::sync::Arc;

pub use action::{ActionHandler, RetryPolicy};
pub use condition::{ConditionHandler, FALSE_PATH, TRUE_PATH};
pub use delay::DelayHandler;
pub use trigger::TriggerHandler;

use crate::ai::AiManager;
use crate::messaging::Messenger;
use crate::{NodeHandler, NodeKind};

/// One handler per [`NodeKind`].
#[derive(Clone)]
pub struct Handlers {
    trigger: Arc<dyn NodeHandler>,
    action: Arc<dyn NodeHandler>,
    condition: Arc<dyn NodeHandler>,
    delay: Arc<dyn NodeHandler>,
}

impl Handlers {
    /// The built-in handler set, wired to the given collaborators.
    pub fn new(ai: Arc<AiManager>, messenger: Arc<dyn Messenger>, retry: RetryPolicy) -> Self {
        Self {
            trigger: Arc::new(TriggerHandler),
            action: Arc::new(ActionHandler::new(ai, messenger, retry)),
            condition: Arc::new(ConditionHandler),
            delay: Arc::new(DelayHandler),
        }
    }

    /// Replace the action handler (e.g. with a test double).
    pub fn with_action(mut self, handler: Arc<dyn NodeHandler>) -> Self {
        self.action = handler;
        self
    }

    /// Replace the delay handler.
    pub fn with_delay(mut self, handler: Arc<dyn NodeHandler>) -> Self {
        self.delay = handler;
        self
    }

    pub fn for_kind(&self, kind: NodeKind) -> &dyn NodeHandler {
        match kind {
            NodeKind::Trigger => self.trigger.as_ref(),
            NodeKind::Action => self.action.as_ref(),
            NodeKind::Condition => self.condition.as_ref(),
            NodeKind::Delay => self.delay.as_ref(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use serde_json::{Map, Value};
    use uuid::Uuid;

    use crate::ExecutionContext;

    pub fn ctx(data: Value) -> ExecutionContext {
        ExecutionContext {
            tenant_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            instance_id: Uuid::new_v4(),
            node_id: Uuid::new_v4(),
            data: data.as_object().cloned().unwrap_or_else(Map::new),
            now: Utc::now(),
        }
    }
}
