//! Hooks run on every item an agent produces, before it joins the history.

use crate::{
    agent::ChatAgent,
    conversation::{ChatMessage, Content},
};

/// What an [InvokedFilter] gets to see about a produced item.
pub struct InvokedContext<'a> {
    agent: &'a dyn ChatAgent,
    history: &'a [ChatMessage],
    message: &'a Content,
    suppress_message: bool,
}

impl<'a> InvokedContext<'a> {
    pub(crate) fn new(agent: &'a dyn ChatAgent, history: &'a [ChatMessage], message: &'a Content) -> Self {
        Self {
            agent,
            history,
            message,
            suppress_message: false,
        }
    }

    /// The agent that produced the item.
    pub fn agent(&self) -> &dyn ChatAgent {
        self.agent
    }

    /// The history as it stands, without the item.
    pub fn history(&self) -> &[ChatMessage] {
        self.history
    }

    pub fn message(&self) -> &Content {
        self.message
    }

    /// Keep the item out of the history. It is not returned to the caller either.
    pub fn suppress_message(&mut self) {
        self.suppress_message = true;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppress_message
    }
}

/// Called once per produced item, in registration order.
pub trait InvokedFilter: Send + Sync {
    fn on_agent_invoked(&self, context: &mut InvokedContext<'_>);
}

impl<F> InvokedFilter for F
where
    F: Fn(&mut InvokedContext<'_>) + Send + Sync,
{
    fn on_agent_invoked(&self, context: &mut InvokedContext<'_>) {
        (self)(context)
    }
}
