use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use rig::completion::{Chat, Message, PromptError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::conversation::{ChatMessage, Content};

#[cfg(test)]
use mockall::automock;

/// A participant of a group chat.
///
/// Agents are immutable once created and shared by reference (`Arc<dyn ChatAgent>`)
/// between the caller and every chat they join.
#[cfg_attr(test, automock)]
pub trait ChatAgent: Send + Sync {
    /// Get agent ID
    fn id(&self) -> String;

    /// Get agent name, unique within a chat
    fn name(&self) -> String;

    /// Get agent description
    fn description(&self) -> String;

    /// Respond to the conversation so far.
    ///
    /// Items are appended to the chat history in the order they are yielded.
    /// The stream should end early with [AgentError::Cancelled] once `cancel`
    /// fires.
    fn invoke(
        &self,
        history: Arc<[ChatMessage]>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Content, AgentError>>;
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent prompt error: {0}")]
    PromptError(#[from] PromptError),
    #[error("Agent invocation failed: {0}")]
    Invocation(String),
    #[error("Agent invocation cancelled")]
    Cancelled,
    #[cfg(test)]
    #[error("Test error: {0}")]
    TestError(String),
}

#[derive(Clone)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn agent_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = Some(description.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = instructions.into();
        self
    }

    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.config.model_name = model_name.into();
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u64) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    pub fn build(self) -> AgentConfig {
        self.config
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub instructions: String,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder {
            config: AgentConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Agent".to_owned(),
            description: None,
            instructions: "You are a helpful assistant.".to_owned(),
            model_name: "gpt-4o".to_owned(),
            temperature: 0.7,
            max_tokens: 8192,
        }
    }
}

/// A [ChatAgent] backed by any `rig` chat-capable model or agent.
pub struct RigChatAgent<A> {
    config: AgentConfig,
    inner: Arc<A>,
}

impl<A> RigChatAgent<A>
where
    A: Chat + Send + Sync + 'static,
{
    pub fn new(config: AgentConfig, agent: A) -> Self {
        Self {
            config,
            inner: Arc::new(agent),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

impl<A> ChatAgent for RigChatAgent<A>
where
    A: Chat + Send + Sync + 'static,
{
    fn id(&self) -> String {
        self.config.id.clone()
    }

    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn description(&self) -> String {
        self.config.description.clone().unwrap_or_default()
    }

    fn invoke(
        &self,
        history: Arc<[ChatMessage]>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Content, AgentError>> {
        let inner = Arc::clone(&self.inner);
        let name = self.config.name.clone();

        futures::stream::once(async move {
            let (prompt, chat_history) = to_rig_messages(&history, &name);
            tracing::debug!(agent = %name, history_len = chat_history.len(), "invoking rig agent");

            let completion = async { inner.chat(prompt, chat_history).await };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                reply = completion => Ok(Content::Text(reply?)),
            }
        })
        .boxed()
    }
}

/// Split a chat history into a prompt (the latest message) and the preceding
/// messages, from the point of view of the agent called `agent_name`.
///
/// The agent's own messages become assistant turns; everyone else speaks as
/// the user, prefixed with their name when they have one.
fn to_rig_messages(history: &[ChatMessage], agent_name: &str) -> (Message, Vec<Message>) {
    let mut messages: Vec<Message> = history
        .iter()
        .map(|message| {
            if message.is_from_agent(agent_name) {
                Message::assistant(message.text())
            } else {
                match &message.author_name {
                    Some(author) => Message::user(format!("{author}: {}", message.text())),
                    None => Message::user(message.text()),
                }
            }
        })
        .collect();

    let prompt = messages.pop().unwrap_or_else(|| Message::user(String::new()));
    (prompt, messages)
}
