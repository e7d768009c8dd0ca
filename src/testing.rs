//! Scripted agents shared by the unit tests.

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use tokio_util::sync::CancellationToken;

use crate::{
    agent::{AgentError, ChatAgent},
    conversation::{ChatMessage, Content},
};

#[derive(Clone, Debug)]
enum Step {
    Reply(String),
    Fail(String),
    Hang,
}

/// An agent that plays back a fixed script on every turn.
///
/// Without a script it answers with its name and the number of messages it
/// was shown.
#[derive(Clone, Debug)]
pub(crate) struct ScriptedAgent {
    name: String,
    steps: Vec<Step>,
}

impl ScriptedAgent {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn reply(mut self, text: &str) -> Self {
        self.steps.push(Step::Reply(text.to_owned()));
        self
    }

    pub(crate) fn fail(mut self, message: &str) -> Self {
        self.steps.push(Step::Fail(message.to_owned()));
        self
    }

    /// Block until cancelled.
    pub(crate) fn hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    pub(crate) fn shared(self) -> Arc<dyn ChatAgent> {
        Arc::new(self)
    }
}

impl ChatAgent for ScriptedAgent {
    fn id(&self) -> String {
        format!("{}-id", self.name)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Scripted agent {}", self.name)
    }

    fn invoke(
        &self,
        history: Arc<[ChatMessage]>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Content, AgentError>> {
        let steps = if self.steps.is_empty() {
            vec![Step::Reply(format!("{} saw {}", self.name, history.len()))]
        } else {
            self.steps.clone()
        };

        futures::stream::iter(steps)
            .then(move |step| {
                let cancel = cancel.clone();
                async move {
                    match step {
                        Step::Reply(text) => Ok(Content::Text(text)),
                        Step::Fail(message) => Err(AgentError::TestError(message)),
                        Step::Hang => {
                            cancel.cancelled().await;
                            Err(AgentError::Cancelled)
                        }
                    }
                }
            })
            .boxed()
    }
}

pub(crate) fn roster(names: &[&str]) -> Vec<Arc<dyn ChatAgent>> {
    names.iter().map(|name| ScriptedAgent::new(name).shared()).collect()
}
